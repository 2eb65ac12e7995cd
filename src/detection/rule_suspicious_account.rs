//! Privileged / well-known account probing

use crate::config::DetectionConfig;
use crate::detection::evaluator::{EvaluationContext, RuleError, RuleEvaluator};
use crate::models::{Alert, AlertDetails, RuleType, Severity};

pub struct SuspiciousAccountRule;

impl RuleEvaluator for SuspiciousAccountRule {
    fn rule_type(&self) -> RuleType {
        RuleType::SuspiciousAccount
    }

    fn is_enabled(&self, config: &DetectionConfig) -> bool {
        config.enable_suspicious_account
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<Vec<Alert>, RuleError> {
        let mut alerts = Vec::new();

        for account in &ctx.config.suspicious_accounts {
            let window = match ctx.aggregates.by_account.get(account) {
                Some(window) if window.failed_attempts > 0 => window,
                _ => continue,
            };

            // Lowest address keeps the representative stable between ticks
            let source_address = window
                .distinct_addresses
                .iter()
                .next()
                .cloned()
                .unwrap_or_default();

            alerts.push(Alert::new(
                RuleType::SuspiciousAccount,
                account.clone(),
                Severity::Low,
                format!(
                    "Failed login to sensitive account '{}' from {} ({} failed attempt(s), \
                     {} source address(es)).",
                    account,
                    source_address,
                    window.failed_attempts,
                    window.distinct_addresses.len()
                ),
                ctx.now,
                AlertDetails::SuspiciousAccount {
                    account: account.clone(),
                    failed_attempts: window.failed_attempts,
                    source_address,
                },
            ));
        }

        Ok(alerts)
    }
}
