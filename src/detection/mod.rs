pub mod aggregator;
pub mod evaluator;
pub mod lifecycle;
pub mod pipeline;
pub mod rule_anomaly_rate;
pub mod rule_brute_force;
pub mod rule_credential_stuffing;
pub mod rule_geo_fence;
pub mod rule_rate_limit;
pub mod rule_suspicious_account;

#[cfg(test)]
pub(crate) mod testutil;

pub use aggregator::{aggregate, AggregateWindow, Aggregates};
pub use evaluator::{EvaluationContext, RuleError, RuleEvaluator};
pub use lifecycle::{reconcile, Reconciled};
pub use pipeline::{DetectionPipeline, EngineState, TickReport};
pub use rule_anomaly_rate::AnomalyRateRule;
pub use rule_brute_force::BruteForceRule;
pub use rule_credential_stuffing::CredentialStuffingRule;
pub use rule_geo_fence::GeoFenceRule;
pub use rule_rate_limit::RateLimitRule;
pub use rule_suspicious_account::SuspiciousAccountRule;
