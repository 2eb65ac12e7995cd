//! Failure-ratio anomaly detection

use crate::config::DetectionConfig;
use crate::detection::evaluator::{invalid_threshold, EvaluationContext, RuleError, RuleEvaluator};
use crate::models::{Alert, AlertDetails, RuleType, Severity};

pub struct AnomalyRateRule;

impl RuleEvaluator for AnomalyRateRule {
    fn rule_type(&self) -> RuleType {
        RuleType::AnomalyRate
    }

    fn is_enabled(&self, config: &DetectionConfig) -> bool {
        config.enable_anomaly_rate
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<Vec<Alert>, RuleError> {
        let rate_threshold = ctx.config.anomaly_failure_rate_threshold;
        if !(rate_threshold > 0.0 && rate_threshold <= 1.0) {
            return Err(invalid_threshold(
                RuleType::AnomalyRate,
                format!(
                    "anomaly_failure_rate_threshold must be in (0, 1], got {}",
                    rate_threshold
                ),
            ));
        }
        // A zero minimum would let the ratio be taken over no attempts
        let min_attempts = ctx.config.anomaly_min_attempts.max(1);

        let mut alerts = Vec::new();
        for (address, window) in &ctx.aggregates.by_address {
            if window.total_attempts < min_attempts {
                continue;
            }
            let failure_rate = match window.failure_rate() {
                Some(rate) if rate >= rate_threshold => rate,
                _ => continue,
            };

            alerts.push(Alert::new(
                RuleType::AnomalyRate,
                address.clone(),
                Severity::High,
                format!(
                    "{:.0}% of {} login attempts from {} failed (threshold: {:.0}%).",
                    failure_rate * 100.0,
                    window.total_attempts,
                    address,
                    rate_threshold * 100.0
                ),
                ctx.now,
                AlertDetails::AnomalyRate {
                    total_attempts: window.total_attempts,
                    failed_attempts: window.failed_attempts,
                    failure_rate,
                },
            ));
        }

        Ok(alerts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::testutil::{evaluate, failed, success};

    fn config(min_attempts: usize, rate: f64) -> DetectionConfig {
        DetectionConfig {
            anomaly_min_attempts: min_attempts,
            anomaly_failure_rate_threshold: rate,
            ..DetectionConfig::default()
        }
    }

    #[test]
    fn test_minimum_attempts_guard() {
        let entries = vec![failed("10.0.0.4", "a", 1), failed("10.0.0.4", "b", 1)];
        assert!(evaluate(&AnomalyRateRule, &entries, &config(3, 0.8))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_high_failure_ratio() {
        let entries = vec![
            failed("10.0.0.4", "a", 1),
            failed("10.0.0.4", "a", 1),
            failed("10.0.0.4", "a", 1),
            failed("10.0.0.4", "a", 1),
            success("10.0.0.4", "a", 1),
        ];
        let alerts = evaluate(&AnomalyRateRule, &entries, &config(3, 0.8)).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::High);
        match alerts[0].details {
            AlertDetails::AnomalyRate { failure_rate, .. } => {
                assert!((failure_rate - 0.8).abs() < f64::EPSILON)
            }
            ref other => panic!("unexpected details: {:?}", other),
        }
    }

    #[test]
    fn test_low_failure_ratio() {
        let entries = vec![
            failed("10.0.0.4", "a", 1),
            success("10.0.0.4", "a", 1),
            success("10.0.0.4", "a", 1),
        ];
        assert!(evaluate(&AnomalyRateRule, &entries, &config(3, 0.8))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_zero_minimum_clamped() {
        let entries = vec![failed("10.0.0.4", "a", 1)];
        let alerts = evaluate(&AnomalyRateRule, &entries, &config(0, 0.5)).unwrap();
        assert_eq!(alerts.len(), 1);
    }

    #[test]
    fn test_out_of_range_rate_rejected() {
        let entries = vec![failed("10.0.0.4", "a", 1)];
        assert!(evaluate(&AnomalyRateRule, &entries, &config(1, 0.0)).is_err());
        assert!(evaluate(&AnomalyRateRule, &entries, &config(1, 1.5)).is_err());
        assert!(evaluate(&AnomalyRateRule, &entries, &config(1, f64::NAN)).is_err());
    }
}
