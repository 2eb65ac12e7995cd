pub mod alert;
pub mod event;

pub use alert::{Alert, AlertDetails, AlertId, ParseSeverityError, RuleType, Severity};
pub use event::{LogEntry, Outcome, UNKNOWN_COUNTRY};
