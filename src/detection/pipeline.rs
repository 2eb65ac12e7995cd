//! One detection pass: aggregate, evaluate every rule, reconcile
//!
//! The pipeline holds no alert state of its own. The caller passes the
//! current `EngineState` in and gets the next one back.

use chrono::{DateTime, Utc};
use std::panic::{self, AssertUnwindSafe};

use crate::config::DetectionConfig;
use crate::detection::aggregator::{aggregate, Aggregates};
use crate::detection::evaluator::{EvaluationContext, RuleError, RuleEvaluator};
use crate::detection::lifecycle::reconcile;
use crate::detection::{
    AnomalyRateRule, BruteForceRule, CredentialStuffingRule, GeoFenceRule, RateLimitRule,
    SuspiciousAccountRule,
};
use crate::models::{Alert, LogEntry};

/// Alert state carried from one tick to the next
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineState {
    /// Active published alerts
    pub alerts: Vec<Alert>,
    /// Number of completed ticks
    pub ticks: u64,
    pub last_tick: Option<DateTime<Utc>>,
}

/// Summary of a single tick
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub at: Option<DateTime<Utc>>,
    /// Distinct source addresses inside the window
    pub addresses_seen: usize,
    pub candidates: usize,
    pub published: Vec<Alert>,
    pub suppressed: usize,
    pub evicted: usize,
    pub failed_rules: Vec<RuleError>,
}

/// The ordered rule set run on every tick
pub struct DetectionPipeline {
    rules: Vec<Box<dyn RuleEvaluator>>,
}

impl DetectionPipeline {
    /// Pipeline with all six built-in rules in evaluation order
    pub fn new() -> Self {
        DetectionPipeline {
            rules: vec![
                Box::new(BruteForceRule),
                Box::new(CredentialStuffingRule),
                Box::new(SuspiciousAccountRule),
                Box::new(RateLimitRule),
                Box::new(AnomalyRateRule),
                Box::new(GeoFenceRule),
            ],
        }
    }

    /// Pipeline with a custom rule set
    pub fn with_rules(rules: Vec<Box<dyn RuleEvaluator>>) -> Self {
        DetectionPipeline { rules }
    }

    /// Run every enabled rule, isolating failures
    ///
    /// A rule that returns an error or panics contributes no candidates;
    /// the others still run.
    pub fn evaluate(
        &self,
        aggregates: &Aggregates,
        entries: &[LogEntry],
        config: &DetectionConfig,
        now: DateTime<Utc>,
    ) -> (Vec<Alert>, Vec<RuleError>) {
        let ctx = EvaluationContext {
            aggregates,
            entries,
            config,
            now,
        };

        let mut candidates = Vec::new();
        let mut failures = Vec::new();

        for rule in &self.rules {
            if !rule.is_enabled(config) {
                continue;
            }

            let result = panic::catch_unwind(AssertUnwindSafe(|| rule.evaluate(&ctx)))
                .unwrap_or_else(|_| Err(RuleError::Panicked(rule.rule_type())));

            match result {
                Ok(alerts) => {
                    log::debug!("Rule {} produced {} candidate(s)", rule.rule_type(), alerts.len());
                    candidates.extend(alerts);
                }
                Err(e) => {
                    log::warn!("Skipping rule for this tick: {}", e);
                    failures.push(e);
                }
            }
        }

        (candidates, failures)
    }

    /// Run one full tick against `state`, returning the next state
    pub fn run(
        &self,
        state: &EngineState,
        entries: &[LogEntry],
        config: &DetectionConfig,
        now: DateTime<Utc>,
    ) -> (EngineState, TickReport) {
        let aggregates = aggregate(entries, now, config.effective_window_minutes());
        let (candidates, failed_rules) = self.evaluate(&aggregates, entries, config, now);
        let candidate_count = candidates.len();

        let reconciled = reconcile(
            &state.alerts,
            candidates,
            now,
            config.alert_retention_minutes,
        );

        let next = EngineState {
            alerts: reconciled.alerts,
            ticks: state.ticks + 1,
            last_tick: Some(now),
        };
        let report = TickReport {
            at: Some(now),
            addresses_seen: aggregates.by_address.len(),
            candidates: candidate_count,
            published: reconciled.published,
            suppressed: reconciled.suppressed,
            evicted: reconciled.evicted,
            failed_rules,
        };

        (next, report)
    }
}

impl Default for DetectionPipeline {
    fn default() -> Self {
        Self::new()
    }
}
