//! Credential stuffing detection
//!
//! One source trying many distinct accounts, with at least one failure,
//! looks like account enumeration rather than a user mistyping a password.

use crate::config::DetectionConfig;
use crate::detection::evaluator::{EvaluationContext, RuleError, RuleEvaluator};
use crate::models::{Alert, AlertDetails, RuleType, Severity};

/// Distinct accounts from one address needed to fire
pub const MIN_DISTINCT_ACCOUNTS: usize = 3;

pub struct CredentialStuffingRule;

impl RuleEvaluator for CredentialStuffingRule {
    fn rule_type(&self) -> RuleType {
        RuleType::CredentialStuffing
    }

    fn is_enabled(&self, config: &DetectionConfig) -> bool {
        config.enable_credential_stuffing
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<Vec<Alert>, RuleError> {
        let alerts = ctx
            .aggregates
            .by_address
            .iter()
            .filter(|(_, window)| {
                window.distinct_accounts.len() >= MIN_DISTINCT_ACCOUNTS
                    && window.failed_attempts > 0
            })
            .map(|(address, window)| {
                let accounts: Vec<String> = window.distinct_accounts.iter().cloned().collect();
                Alert::new(
                    RuleType::CredentialStuffing,
                    address.clone(),
                    Severity::Medium,
                    format!(
                        "{} attempted logins to {} distinct accounts ({} failed). \
                         Possible automated account enumeration.",
                        address,
                        accounts.len(),
                        window.failed_attempts
                    ),
                    ctx.now,
                    AlertDetails::CredentialStuffing {
                        failed_attempts: window.failed_attempts,
                        distinct_accounts: accounts.len(),
                        accounts,
                    },
                )
            })
            .collect();

        Ok(alerts)
    }
}
