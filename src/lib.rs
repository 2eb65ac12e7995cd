pub mod config;
pub mod detection;
pub mod geolocation;
pub mod input;
pub mod models;
pub mod output;
pub mod scheduler;

// Re-export commonly used types
pub use config::{Config, DetectionConfig, GeoFencePolicy};
pub use detection::{aggregate, reconcile, DetectionPipeline, EngineState, RuleEvaluator, TickReport};
pub use geolocation::{GeoInfo, GeoIpService, GeoResolver};
pub use models::{Alert, AlertId, LogEntry, Outcome, RuleType, Severity};
pub use scheduler::{AlertSnapshot, Scheduler, SchedulerHandle, SchedulerState, TickTrigger};
