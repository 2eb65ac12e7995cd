//! Raw attempt volume per source address, regardless of outcome

use crate::config::DetectionConfig;
use crate::detection::evaluator::{invalid_threshold, EvaluationContext, RuleError, RuleEvaluator};
use crate::models::{Alert, AlertDetails, RuleType, Severity};

pub struct RateLimitRule;

impl RuleEvaluator for RateLimitRule {
    fn rule_type(&self) -> RuleType {
        RuleType::RateLimit
    }

    fn is_enabled(&self, config: &DetectionConfig) -> bool {
        config.enable_rate_limit
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<Vec<Alert>, RuleError> {
        let threshold = ctx.config.rate_limit_threshold;
        if threshold == 0 {
            return Err(invalid_threshold(
                RuleType::RateLimit,
                "rate_limit_threshold must be at least 1",
            ));
        }

        let alerts = ctx
            .aggregates
            .by_address
            .iter()
            .filter(|(_, window)| window.total_attempts >= threshold)
            .map(|(address, window)| {
                Alert::new(
                    RuleType::RateLimit,
                    address.clone(),
                    Severity::Medium,
                    format!(
                        "IP {} made {} login attempts in the last {} minutes (threshold: {}).",
                        address,
                        window.total_attempts,
                        ctx.config.effective_window_minutes(),
                        threshold
                    ),
                    ctx.now,
                    AlertDetails::RateLimit {
                        total_attempts: window.total_attempts,
                        threshold,
                    },
                )
            })
            .collect();

        Ok(alerts)
    }
}
