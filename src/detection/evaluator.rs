//! Rule evaluator interface shared by all detection rules

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::DetectionConfig;
use crate::detection::aggregator::Aggregates;
use crate::models::{Alert, LogEntry, RuleType};

/// Errors a rule can report for one tick
///
/// None of these are fatal: the pipeline logs them and keeps evaluating the
/// remaining rules.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuleError {
    #[error("{rule}: invalid threshold: {reason}")]
    InvalidThreshold { rule: RuleType, reason: String },

    #[error("{0}: evaluator panicked")]
    Panicked(RuleType),
}

impl RuleError {
    pub fn rule(&self) -> RuleType {
        match self {
            RuleError::InvalidThreshold { rule, .. } => *rule,
            RuleError::Panicked(rule) => *rule,
        }
    }
}

/// Everything a rule may look at during one tick
#[derive(Debug, Clone, Copy)]
pub struct EvaluationContext<'a> {
    pub aggregates: &'a Aggregates,
    /// Raw entries, for rules that need per-entry fields aggregation drops
    pub entries: &'a [LogEntry],
    pub config: &'a DetectionConfig,
    pub now: DateTime<Utc>,
}

/// A stateless detection rule
///
/// Implementations are pure functions of the context: the same context
/// always yields the same candidates in the same order.
pub trait RuleEvaluator: Send + Sync {
    fn rule_type(&self) -> RuleType;

    /// Whether the operator has this rule switched on
    fn is_enabled(&self, config: &DetectionConfig) -> bool;

    /// Produce candidate alerts for this tick
    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<Vec<Alert>, RuleError>;
}

pub(crate) fn invalid_threshold(rule: RuleType, reason: impl Into<String>) -> RuleError {
    RuleError::InvalidThreshold {
        rule,
        reason: reason.into(),
    }
}
