//! Periodic and on-demand evaluation of the detection pipeline
//!
//! A single task owns the alert state. Timer ticks and bulk-import
//! triggers go through the same tick path, so both converge on one alert
//! set. Readers only ever see published, immutable snapshots.

pub mod clock;
pub mod engine;

use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;

use crate::models::{Alert, RuleType};

pub use clock::{Clock, FixedClock, SystemClock};
pub use engine::{RunningScheduler, Scheduler, SchedulerHandle};

/// Errors returned by the scheduler handle
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Scheduler is stopped")]
    Stopped,

    #[error("Scheduler task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Scheduler execution state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Ticking,
}

/// What caused a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickTrigger {
    Timer,
    BulkImport,
    Manual,
}

impl fmt::Display for TickTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TickTrigger::Timer => "timer",
            TickTrigger::BulkImport => "bulk-import",
            TickTrigger::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// Read-only view of the alert set published after a tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlertSnapshot {
    /// Increments with every published tick; 0 before the first one
    pub generation: u64,
    pub trigger: Option<TickTrigger>,
    pub taken_at: Option<DateTime<Utc>>,
    /// All active alerts
    pub alerts: Vec<Alert>,
    /// Alerts first published by this tick
    pub newly_published: Vec<Alert>,
    /// Rules skipped during this tick
    pub failed_rules: Vec<RuleType>,
}

impl AlertSnapshot {
    pub fn alerts_for(&self, rule_type: RuleType) -> impl Iterator<Item = &Alert> {
        self.alerts.iter().filter(move |a| a.rule_type() == rule_type)
    }
}
