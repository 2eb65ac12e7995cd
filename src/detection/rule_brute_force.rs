//! Brute force detection
//!
//! Flags source addresses with too many failed attempts inside the window.

use crate::config::DetectionConfig;
use crate::detection::evaluator::{invalid_threshold, EvaluationContext, RuleError, RuleEvaluator};
use crate::models::{Alert, AlertDetails, RuleType, Severity};

pub struct BruteForceRule;

impl BruteForceRule {
    fn calculate_severity(failed_attempts: usize, threshold: usize) -> Severity {
        if failed_attempts > threshold.saturating_mul(2) {
            Severity::High
        } else {
            Severity::Medium
        }
    }
}

impl RuleEvaluator for BruteForceRule {
    fn rule_type(&self) -> RuleType {
        RuleType::BruteForce
    }

    fn is_enabled(&self, config: &DetectionConfig) -> bool {
        config.enable_brute_force
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<Vec<Alert>, RuleError> {
        let threshold = ctx.config.brute_force_threshold;
        if threshold == 0 {
            return Err(invalid_threshold(
                RuleType::BruteForce,
                "brute_force_threshold must be at least 1",
            ));
        }

        let alerts = ctx
            .aggregates
            .by_address
            .iter()
            .filter(|(_, window)| window.failed_attempts >= threshold)
            .map(|(address, window)| {
                Alert::new(
                    RuleType::BruteForce,
                    address.clone(),
                    Self::calculate_severity(window.failed_attempts, threshold),
                    format!(
                        "{} failed login attempts from {} in the last {} minutes \
                         (threshold: {}) across {} account(s).",
                        window.failed_attempts,
                        address,
                        ctx.config.effective_window_minutes(),
                        threshold,
                        window.distinct_accounts.len()
                    ),
                    ctx.now,
                    AlertDetails::BruteForce {
                        failed_attempts: window.failed_attempts,
                        total_attempts: window.total_attempts,
                        distinct_accounts: window.distinct_accounts.len(),
                    },
                )
            })
            .collect();

        Ok(alerts)
    }
}
