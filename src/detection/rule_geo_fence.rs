//! Geo-fencing
//!
//! Works on raw entries rather than aggregates because it needs each
//! attempt's country. Alerts are keyed by (account, country, day) so a
//! user repeatedly logging in from a restricted country raises one alert
//! per day instead of one per login.
//!
//! An unresolved location counts as the country "Unknown": it is not on
//! any allow-list, and a deny-list may name it explicitly.

use std::collections::BTreeMap;

use crate::config::DetectionConfig;
use crate::detection::aggregator::in_window;
use crate::detection::evaluator::{EvaluationContext, RuleError, RuleEvaluator};
use crate::models::{Alert, AlertDetails, LogEntry, RuleType, Severity, UNKNOWN_COUNTRY};

pub struct GeoFenceRule;

impl GeoFenceRule {
    fn alert_key(account: &str, country: &str, day: chrono::NaiveDate) -> String {
        format!("{}|{}|{}", account, country, day)
    }

    fn build_alert(
        entry: &LogEntry,
        country: &str,
        key: String,
        day: chrono::NaiveDate,
        ctx: &EvaluationContext<'_>,
    ) -> Alert {
        Alert::new(
            RuleType::GeoFence,
            key,
            Severity::High,
            format!(
                "Login attempt for '{}' from {} ({}) violates the geo-fencing policy.",
                entry.account, entry.source_address, country
            ),
            ctx.now,
            AlertDetails::GeoFence {
                account: entry.account.clone(),
                country: country.to_string(),
                day,
                source_address: entry.source_address.clone(),
            },
        )
    }
}

impl RuleEvaluator for GeoFenceRule {
    fn rule_type(&self) -> RuleType {
        RuleType::GeoFence
    }

    fn is_enabled(&self, config: &DetectionConfig) -> bool {
        config.enable_geo_fence && config.geo_fence.is_some()
    }

    fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Result<Vec<Alert>, RuleError> {
        let policy = match &ctx.config.geo_fence {
            Some(policy) => policy,
            None => return Ok(Vec::new()),
        };
        let window = ctx.config.effective_window_minutes();

        let mut violations: BTreeMap<String, Alert> = BTreeMap::new();
        let mut unlocated = 0usize;

        for entry in ctx.entries {
            if !in_window(entry, ctx.now, window) {
                continue;
            }
            let country = if entry.needs_location() {
                unlocated += 1;
                UNKNOWN_COUNTRY
            } else {
                entry.country.as_str()
            };
            if !policy.is_restricted(country) {
                continue;
            }
            let day = match entry.timestamp {
                Some(ts) => ts.date_naive(),
                None => continue,
            };
            let key = Self::alert_key(&entry.account, country, day);
            violations.entry(key).or_insert_with_key(|key| {
                Self::build_alert(entry, country, key.clone(), day, ctx)
            });
        }

        if unlocated > 0 {
            log::debug!("Geo-fence saw {} entries with unknown location", unlocated);
        }

        Ok(violations.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeoFencePolicy;
    use crate::detection::testutil::{evaluate, failed, success};

    fn allow_us() -> DetectionConfig {
        DetectionConfig {
            geo_fence: Some(GeoFencePolicy::allow(["United States"])),
            ..DetectionConfig::default()
        }
    }

    #[test]
    fn test_allow_list_flags_other_country() {
        let entries = vec![success("5.6.7.8", "alice", 1).with_country("Germany")];
        let alerts = evaluate(&GeoFenceRule, &entries, &allow_us()).unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, Severity::High);
        assert!(alerts[0].key().starts_with("alice|Germany|"));
    }

    #[test]
    fn test_allow_list_passes_listed_country() {
        let entries = vec![success("5.6.7.8", "alice", 1).with_country("United States")];
        assert!(evaluate(&GeoFenceRule, &entries, &allow_us()).unwrap().is_empty());
    }

    #[test]
    fn test_deny_list() {
        let config = DetectionConfig {
            geo_fence: Some(GeoFencePolicy::deny(["Germany"])),
            ..DetectionConfig::default()
        };
        let entries = vec![
            failed("5.6.7.8", "alice", 1).with_country("Germany"),
            failed("9.9.9.9", "alice", 1).with_country("France"),
        ];
        let alerts = evaluate(&GeoFenceRule, &entries, &config).unwrap();
        assert_eq!(alerts.len(), 1);
        match &alerts[0].details {
            AlertDetails::GeoFence { country, .. } => assert_eq!(country, "Germany"),
            other => panic!("unexpected details: {:?}", other),
        }
    }

    #[test]
    fn test_one_alert_per_account_country_day() {
        let entries = vec![
            success("5.6.7.8", "alice", 1).with_country("Germany"),
            failed("5.6.7.9", "alice", 2).with_country("Germany"),
            failed("5.6.7.9", "bob", 2).with_country("Germany"),
        ];
        let alerts = evaluate(&GeoFenceRule, &entries, &allow_us()).unwrap();
        assert_eq!(alerts.len(), 2);
    }

    #[test]
    fn test_unknown_country_outside_allow_list() {
        let entries = vec![failed("5.6.7.8", "alice", 1)];
        let alerts = evaluate(&GeoFenceRule, &entries, &allow_us()).unwrap();
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].key().starts_with("alice|Unknown|"));
        match &alerts[0].details {
            AlertDetails::GeoFence { country, .. } => assert_eq!(country, UNKNOWN_COUNTRY),
            other => panic!("unexpected details: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_country_under_deny_list() {
        let entries = vec![failed("5.6.7.8", "alice", 1).with_country("")];
        let deny_germany = DetectionConfig {
            geo_fence: Some(GeoFencePolicy::deny(["Germany"])),
            ..DetectionConfig::default()
        };
        assert!(evaluate(&GeoFenceRule, &entries, &deny_germany).unwrap().is_empty());

        let deny_unknown = DetectionConfig {
            geo_fence: Some(GeoFencePolicy::deny([UNKNOWN_COUNTRY])),
            ..DetectionConfig::default()
        };
        assert_eq!(evaluate(&GeoFenceRule, &entries, &deny_unknown).unwrap().len(), 1);
    }

    #[test]
    fn test_disabled_without_policy() {
        assert!(!GeoFenceRule.is_enabled(&DetectionConfig::default()));
        assert!(GeoFenceRule.is_enabled(&allow_us()));
    }
}
