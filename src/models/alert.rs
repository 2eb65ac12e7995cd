//! Alert types produced by the rule evaluators

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Detection rule that produced an alert
///
/// Declaration order is the evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    BruteForce,
    CredentialStuffing,
    SuspiciousAccount,
    RateLimit,
    AnomalyRate,
    GeoFence,
}

impl RuleType {
    pub fn as_str(self) -> &'static str {
        match self {
            RuleType::BruteForce => "brute_force",
            RuleType::CredentialStuffing => "credential_stuffing",
            RuleType::SuspiciousAccount => "suspicious_account",
            RuleType::RateLimit => "rate_limit",
            RuleType::AnomalyRate => "anomaly_rate",
            RuleType::GeoFence => "geo_fence",
        }
    }

    /// Human readable rule title
    pub fn title(self) -> &'static str {
        match self {
            RuleType::BruteForce => "Brute Force Attack",
            RuleType::CredentialStuffing => "Credential Stuffing",
            RuleType::SuspiciousAccount => "Suspicious Account Probe",
            RuleType::RateLimit => "Rate Limit Exceeded",
            RuleType::AnomalyRate => "Anomalous Failure Rate",
            RuleType::GeoFence => "Geo-Fence Violation",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// A severity name that is not one of low, medium, high or critical
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown severity '{0}'")]
pub struct ParseSeverityError(pub String);

impl FromStr for Severity {
    type Err = ParseSeverityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(ParseSeverityError(s.to_string())),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// Deterministic alert identity: the rule plus the key it fired on
///
/// Two candidates with the same identity are the same alert, regardless of
/// when they were produced.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlertId {
    pub rule_type: RuleType,
    pub key: String,
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.rule_type, self.key)
    }
}

/// Rule-specific payload attached to an alert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertDetails {
    BruteForce {
        failed_attempts: usize,
        total_attempts: usize,
        distinct_accounts: usize,
    },
    CredentialStuffing {
        failed_attempts: usize,
        distinct_accounts: usize,
        accounts: Vec<String>,
    },
    SuspiciousAccount {
        account: String,
        failed_attempts: usize,
        source_address: String,
    },
    RateLimit {
        total_attempts: usize,
        threshold: usize,
    },
    AnomalyRate {
        total_attempts: usize,
        failed_attempts: usize,
        failure_rate: f64,
    },
    GeoFence {
        account: String,
        country: String,
        day: NaiveDate,
        source_address: String,
    },
}

/// A detection alert
///
/// Created by a rule evaluator as a candidate and published by the
/// lifecycle manager when no alert with the same identity is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub severity: Severity,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub details: AlertDetails,
}

impl Alert {
    pub fn new(
        rule_type: RuleType,
        key: impl Into<String>,
        severity: Severity,
        description: String,
        created_at: DateTime<Utc>,
        details: AlertDetails,
    ) -> Self {
        Alert {
            id: AlertId {
                rule_type,
                key: key.into(),
            },
            severity,
            description,
            created_at,
            details,
        }
    }

    pub fn rule_type(&self) -> RuleType {
        self.id.rule_type
    }

    pub fn key(&self) -> &str {
        &self.id.key
    }
}
