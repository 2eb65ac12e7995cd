//! Trailing-window aggregation of login attempts
//!
//! Builds per-address and per-account counters from the raw entries that
//! fall inside the lookback window. Nothing is carried between calls: each
//! tick rebuilds the maps from scratch, so stale entries drop out as `now`
//! advances.

use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, BTreeSet};

use crate::models::LogEntry;

/// Rolling counters for one key (an address or an account)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateWindow {
    pub total_attempts: usize,
    pub failed_attempts: usize,
    pub distinct_accounts: BTreeSet<String>,
    pub distinct_addresses: BTreeSet<String>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl AggregateWindow {
    fn record(&mut self, entry: &LogEntry, timestamp: DateTime<Utc>) {
        self.total_attempts += 1;
        if entry.outcome.is_failure() {
            self.failed_attempts += 1;
        }
        self.distinct_accounts.insert(entry.account.clone());
        self.distinct_addresses.insert(entry.source_address.clone());
        if self.last_seen.map_or(true, |seen| timestamp > seen) {
            self.last_seen = Some(timestamp);
        }
    }

    /// Fraction of attempts that failed, `None` when there were no attempts
    pub fn failure_rate(&self) -> Option<f64> {
        if self.total_attempts == 0 {
            None
        } else {
            Some(self.failed_attempts as f64 / self.total_attempts as f64)
        }
    }
}

/// Aggregation result for one tick, keyed two ways
#[derive(Debug, Clone, Default)]
pub struct Aggregates {
    pub by_address: BTreeMap<String, AggregateWindow>,
    pub by_account: BTreeMap<String, AggregateWindow>,
}

/// `minutes` as a duration, saturating where chrono's range ends
pub(crate) fn saturating_minutes(minutes: i64) -> Duration {
    Duration::try_minutes(minutes).unwrap_or(if minutes < 0 {
        Duration::MIN
    } else {
        Duration::MAX
    })
}

/// Whether an entry falls inside the trailing window ending at `now`
///
/// Entries stamped in the future (clock skew) have a negative age and are
/// kept. Entries without a usable timestamp are treated as very old.
pub fn in_window(entry: &LogEntry, now: DateTime<Utc>, window_minutes: i64) -> bool {
    match entry.timestamp {
        Some(ts) => now - ts <= saturating_minutes(window_minutes),
        None => false,
    }
}

/// Aggregate the entries inside the window by source address and by account
pub fn aggregate(entries: &[LogEntry], now: DateTime<Utc>, window_minutes: i64) -> Aggregates {
    let mut aggregates = Aggregates::default();
    let mut skipped = 0usize;

    for entry in entries {
        let timestamp = match entry.timestamp {
            Some(ts) => ts,
            None => {
                skipped += 1;
                continue;
            }
        };
        if !in_window(entry, now, window_minutes) {
            continue;
        }

        aggregates
            .by_address
            .entry(entry.source_address.clone())
            .or_default()
            .record(entry, timestamp);
        aggregates
            .by_account
            .entry(entry.account.clone())
            .or_default()
            .record(entry, timestamp);
    }

    if skipped > 0 {
        log::debug!("Skipped {} entries without a valid timestamp", skipped);
    }

    aggregates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Outcome;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn entry(minutes_ago: i64, ip: &str, user: &str, outcome: Outcome) -> LogEntry {
        LogEntry::new(now() - Duration::minutes(minutes_ago), ip, user, outcome, 22)
    }

    #[test]
    fn test_counts_by_address_and_account() {
        let entries = vec![
            entry(1, "10.0.0.1", "alice", Outcome::Failed),
            entry(2, "10.0.0.1", "bob", Outcome::Failed),
            entry(3, "10.0.0.1", "alice", Outcome::Success),
            entry(1, "10.0.0.2", "alice", Outcome::Failed),
        ];

        let agg = aggregate(&entries, now(), 5);

        let addr = &agg.by_address["10.0.0.1"];
        assert_eq!(addr.total_attempts, 3);
        assert_eq!(addr.failed_attempts, 2);
        assert_eq!(addr.distinct_accounts.len(), 2);
        assert_eq!(addr.last_seen, Some(now() - Duration::minutes(1)));

        let alice = &agg.by_account["alice"];
        assert_eq!(alice.total_attempts, 3);
        assert_eq!(alice.failed_attempts, 2);
        assert_eq!(alice.distinct_addresses.len(), 2);
    }

    #[test]
    fn test_window_boundary_inclusive() {
        let entries = vec![
            entry(5, "10.0.0.1", "alice", Outcome::Failed),
            entry(6, "10.0.0.1", "alice", Outcome::Failed),
        ];
        let agg = aggregate(&entries, now(), 5);
        assert_eq!(agg.by_address["10.0.0.1"].total_attempts, 1);
    }

    #[test]
    fn test_future_entries_included() {
        let entries = vec![entry(-3, "10.0.0.9", "carol", Outcome::Failed)];
        let agg = aggregate(&entries, now(), 5);
        assert_eq!(agg.by_address["10.0.0.9"].failed_attempts, 1);
    }

    #[test]
    fn test_missing_timestamp_excluded() {
        let mut bad = entry(1, "10.0.0.3", "dave", Outcome::Failed);
        bad.timestamp = None;
        let agg = aggregate(&[bad], now(), 5);
        assert!(agg.by_address.is_empty());
        assert!(agg.by_account.is_empty());
    }

    #[test]
    fn test_out_of_order_arrival() {
        let entries = vec![
            entry(1, "10.0.0.1", "alice", Outcome::Failed),
            entry(4, "10.0.0.1", "alice", Outcome::Failed),
            entry(2, "10.0.0.1", "alice", Outcome::Failed),
        ];
        let agg = aggregate(&entries, now(), 5);
        assert_eq!(
            agg.by_address["10.0.0.1"].last_seen,
            Some(now() - Duration::minutes(1))
        );
    }

    #[test]
    fn test_failure_rate() {
        let window = AggregateWindow::default();
        assert_eq!(window.failure_rate(), None);

        let entries = vec![
            entry(1, "10.0.0.1", "a", Outcome::Failed),
            entry(1, "10.0.0.1", "a", Outcome::Success),
        ];
        let agg = aggregate(&entries, now(), 5);
        assert_eq!(agg.by_address["10.0.0.1"].failure_rate(), Some(0.5));
    }

    #[test]
    fn test_huge_window_does_not_overflow() {
        let entries = vec![
            entry(1, "10.0.0.1", "alice", Outcome::Failed),
            entry(60 * 24 * 365, "10.0.0.1", "bob", Outcome::Failed),
        ];

        let agg = aggregate(&entries, now(), i64::MAX);
        assert_eq!(agg.by_address["10.0.0.1"].total_attempts, 2);
        assert!(!in_window(&entries[0], now(), i64::MIN));
    }
}
