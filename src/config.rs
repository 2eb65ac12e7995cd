use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur while loading or saving configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Configuration for the authwatch daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Input source configuration
    pub input: InputConfig,
    /// Detection rules configuration
    pub detection: DetectionConfig,
    /// Evaluation scheduling
    pub scheduler: SchedulerConfig,
    /// Geolocation configuration
    pub geo: GeoConfig,
    /// Output configuration
    pub output: OutputConfig,
}

/// Input source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Path to the auth log to tail
    pub file_path: Option<PathBuf>,
    /// Import the existing file contents on startup instead of only tailing
    pub import_existing: bool,
    /// How often the tailer checks for new lines
    pub poll_interval_ms: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        InputConfig {
            file_path: Some(PathBuf::from("/var/log/auth.log")),
            import_existing: true,
            poll_interval_ms: 500,
        }
    }
}

/// Country policy for geo-fencing
///
/// Exactly one mode applies. With an allow-list, any country not listed is
/// restricted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "countries", rename_all = "snake_case")]
pub enum GeoFencePolicy {
    Allow(BTreeSet<String>),
    Deny(BTreeSet<String>),
}

impl GeoFencePolicy {
    pub fn allow<I, S>(countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        GeoFencePolicy::Allow(countries.into_iter().map(Into::into).collect())
    }

    pub fn deny<I, S>(countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        GeoFencePolicy::Deny(countries.into_iter().map(Into::into).collect())
    }

    /// Whether an attempt from `country` violates the policy
    pub fn is_restricted(&self, country: &str) -> bool {
        match self {
            GeoFencePolicy::Allow(allowed) => !allowed.contains(country),
            GeoFencePolicy::Deny(denied) => denied.contains(country),
        }
    }
}

/// Detection thresholds and rule toggles
///
/// Read once at the start of each tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Failed attempts from one address that count as brute force
    pub brute_force_threshold: usize,
    /// Trailing window length used for aggregation
    pub time_window_minutes: i64,
    /// Privileged or well-known account names worth flagging on failure
    pub suspicious_accounts: BTreeSet<String>,
    /// Total attempts from one address that exceed the rate limit
    pub rate_limit_threshold: usize,
    /// Minimum attempts before the failure ratio is considered
    pub anomaly_min_attempts: usize,
    /// Failure ratio (0.0, 1.0] that marks an address as anomalous
    pub anomaly_failure_rate_threshold: f64,
    /// Geo-fencing policy; `None` disables the rule
    pub geo_fence: Option<GeoFencePolicy>,
    /// How long a published alert stays active
    pub alert_retention_minutes: i64,
    pub enable_brute_force: bool,
    pub enable_credential_stuffing: bool,
    pub enable_suspicious_account: bool,
    pub enable_rate_limit: bool,
    pub enable_anomaly_rate: bool,
    pub enable_geo_fence: bool,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        DetectionConfig {
            brute_force_threshold: 5,
            time_window_minutes: 5,
            suspicious_accounts: [
                "root",
                "admin",
                "administrator",
                "test",
                "guest",
                "oracle",
                "postgres",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            rate_limit_threshold: 20,
            anomaly_min_attempts: 5,
            anomaly_failure_rate_threshold: 0.8,
            geo_fence: None,
            alert_retention_minutes: 60,
            enable_brute_force: true,
            enable_credential_stuffing: true,
            enable_suspicious_account: true,
            enable_rate_limit: true,
            enable_anomaly_rate: true,
            enable_geo_fence: true,
        }
    }
}

impl DetectionConfig {
    /// Aggregation window, clamped to at least one minute
    pub fn effective_window_minutes(&self) -> i64 {
        if self.time_window_minutes < 1 {
            log::warn!(
                "time_window_minutes = {} is out of range, using 1",
                self.time_window_minutes
            );
            1
        } else {
            self.time_window_minutes
        }
    }
}

/// Evaluation scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between periodic pipeline runs
    pub tick_interval_secs: u64,
    /// Upper bound on retained log entries; oldest arrivals are dropped first
    pub max_entries: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            tick_interval_secs: 10,
            max_entries: 100_000,
        }
    }
}

/// Geolocation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeoConfig {
    /// Path to a MaxMind GeoLite2-City database
    pub database_path: Option<PathBuf>,
    /// Fixed address -> country mappings, consulted before the database
    pub overrides: BTreeMap<String, String>,
    /// Cache successful lookups across ticks
    pub cache: bool,
}

impl Default for GeoConfig {
    fn default() -> Self {
        GeoConfig {
            database_path: None,
            overrides: BTreeMap::new(),
            cache: true,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format: "json", "jsonl", or "console"
    pub format: String,
    /// Output file path (if format is not "console")
    pub file_path: Option<PathBuf>,
    /// Lowest severity written: "low", "medium", "high" or "critical"
    pub min_severity: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            format: "jsonl".to_string(),
            file_path: Some(PathBuf::from("alerts.jsonl")),
            min_severity: "low".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
