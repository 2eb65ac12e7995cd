//! Shared fixtures for rule tests

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::config::DetectionConfig;
use crate::detection::aggregator::aggregate;
use crate::detection::evaluator::{EvaluationContext, RuleError, RuleEvaluator};
use crate::models::{Alert, LogEntry, Outcome};

pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn failed(ip: &str, user: &str, minutes_ago: i64) -> LogEntry {
    LogEntry::new(now() - Duration::minutes(minutes_ago), ip, user, Outcome::Failed, 22)
}

pub fn success(ip: &str, user: &str, minutes_ago: i64) -> LogEntry {
    LogEntry::new(now() - Duration::minutes(minutes_ago), ip, user, Outcome::Success, 22)
}

/// Aggregate `entries` at `now()` and run a single rule over them
pub fn evaluate(
    rule: &dyn RuleEvaluator,
    entries: &[LogEntry],
    config: &DetectionConfig,
) -> Result<Vec<Alert>, RuleError> {
    let aggregates = aggregate(entries, now(), config.effective_window_minutes());
    let ctx = EvaluationContext {
        aggregates: &aggregates,
        entries,
        config,
        now: now(),
    };
    rule.evaluate(&ctx)
}
