//! Alert lifecycle: expiry and deduplication
//!
//! Candidates are merged into the active alert set by identity. A
//! candidate whose identity is already active is dropped; the active
//! alert keeps its original `created_at`.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::detection::aggregator::saturating_minutes;
use crate::models::{Alert, AlertId};

/// Result of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciled {
    /// The full active alert set after this pass
    pub alerts: Vec<Alert>,
    /// Candidates that became published alerts in this pass
    pub published: Vec<Alert>,
    /// Candidates dropped as duplicates of an active alert
    pub suppressed: usize,
    /// Existing alerts removed because they outlived the retention horizon
    pub evicted: usize,
}

/// Whether an alert is past its retention horizon at `now`
pub fn is_expired(alert: &Alert, now: DateTime<Utc>, retention_minutes: i64) -> bool {
    now - alert.created_at > saturating_minutes(retention_minutes)
}

/// Merge candidate alerts into the existing set
///
/// Survivors keep their order; newly published alerts follow in candidate
/// order. Calling this again with the same candidates and the same `now`
/// returns the same set.
pub fn reconcile(
    existing: &[Alert],
    candidates: Vec<Alert>,
    now: DateTime<Utc>,
    retention_minutes: i64,
) -> Reconciled {
    let retention_minutes = if retention_minutes < 0 {
        log::warn!(
            "alert_retention_minutes = {} is negative, using 0",
            retention_minutes
        );
        0
    } else {
        retention_minutes
    };

    let mut alerts: Vec<Alert> = existing
        .iter()
        .filter(|alert| !is_expired(alert, now, retention_minutes))
        .cloned()
        .collect();
    let evicted = existing.len() - alerts.len();

    let mut active: HashSet<AlertId> = alerts.iter().map(|a| a.id.clone()).collect();
    let mut published = Vec::new();
    let mut suppressed = 0;

    for candidate in candidates {
        if active.insert(candidate.id.clone()) {
            published.push(candidate);
        } else {
            suppressed += 1;
        }
    }

    alerts.extend(published.iter().cloned());

    Reconciled {
        alerts,
        published,
        suppressed,
        evicted,
    }
}
