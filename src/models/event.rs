use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Country placeholder used when a source address cannot be located
pub const UNKNOWN_COUNTRY: &str = "Unknown";

/// Result of a single authentication attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failed,
}

impl Outcome {
    pub fn is_failure(self) -> bool {
        matches!(self, Outcome::Failed)
    }
}

/// A single authentication log record
///
/// Entries are immutable once ingested. `timestamp` is `None` when the
/// ingestion layer could not parse the record's time; such entries never
/// enter an aggregation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: Option<DateTime<Utc>>,
    pub source_address: String,
    pub account: String,
    pub outcome: Outcome,
    pub port: u16,
    pub country: String,
}

impl LogEntry {
    pub fn new(
        timestamp: DateTime<Utc>,
        source_address: impl Into<String>,
        account: impl Into<String>,
        outcome: Outcome,
        port: u16,
    ) -> Self {
        LogEntry {
            timestamp: Some(timestamp),
            source_address: source_address.into(),
            account: account.into(),
            outcome,
            port,
            country: UNKNOWN_COUNTRY.to_string(),
        }
    }

    /// Set the resolved country for this entry
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = country.into();
        self
    }

    /// Whether the entry still needs a location lookup
    pub fn needs_location(&self) -> bool {
        self.country.is_empty() || self.country == UNKNOWN_COUNTRY
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_new_entry_defaults_to_unknown_country() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let entry = LogEntry::new(ts, "10.0.0.1", "alice", Outcome::Failed, 22);
        assert_eq!(entry.country, UNKNOWN_COUNTRY);
        assert!(entry.needs_location());

        let located = entry.with_country("Germany");
        assert!(!located.needs_location());
    }

    #[test]
    fn test_outcome_serializes_snake_case() {
        let json = serde_json::to_string(&Outcome::Failed).unwrap();
        assert_eq!(json, "\"failed\"");
        assert!(Outcome::Failed.is_failure());
        assert!(!Outcome::Success.is_failure());
    }
}
