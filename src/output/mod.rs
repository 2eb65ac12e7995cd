use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::OutputConfig;
use crate::models::{Alert, AlertId, Severity};

/// Errors raised while writing alerts
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to serialize alert: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Unknown output format '{0}'")]
    UnknownFormat(String),
}

/// Output sink for published alerts
pub struct OutputHandler {
    format: OutputFormat,
    min_severity: Severity,
    writer: Box<dyn Write + Send>,
    /// Alerts of the last fully written active set, by identity and age
    written: HashSet<(AlertId, DateTime<Utc>)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Jsonl,
    Console,
}

impl FromStr for OutputFormat {
    type Err = OutputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "jsonl" => Ok(OutputFormat::Jsonl),
            "console" => Ok(OutputFormat::Console),
            _ => Err(OutputError::UnknownFormat(s.to_string())),
        }
    }
}

impl OutputHandler {
    /// Create a handler appending to `file_path`, or writing to stdout
    pub fn new(
        format: OutputFormat,
        file_path: Option<PathBuf>,
        min_severity: Severity,
    ) -> Result<Self, OutputError> {
        let writer: Box<dyn Write + Send> = match (format, file_path) {
            (OutputFormat::Console, _) | (_, None) => Box::new(io::stdout()),
            (_, Some(path)) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Box::new(BufWriter::new(file))
            }
        };
        Ok(Self::with_writer(format, min_severity, writer))
    }

    pub fn from_config(config: &OutputConfig) -> Result<Self, OutputError> {
        let min_severity = config.min_severity.parse().unwrap_or_else(|e| {
            log::warn!("{}, writing all alerts", e);
            Severity::Low
        });
        let format = config.format.parse().unwrap_or_else(|e| {
            log::warn!("{}, using jsonl", e);
            OutputFormat::Jsonl
        });
        Self::new(format, config.file_path.clone(), min_severity)
    }

    pub fn with_writer(
        format: OutputFormat,
        min_severity: Severity,
        writer: Box<dyn Write + Send>,
    ) -> Self {
        OutputHandler {
            format,
            min_severity,
            writer,
            written: HashSet::new(),
        }
    }

    /// Write one alert; returns whether it passed the severity filter
    pub fn write_alert(&mut self, alert: &Alert) -> Result<bool, OutputError> {
        if alert.severity < self.min_severity {
            return Ok(false);
        }

        let output = match self.format {
            OutputFormat::Json => format!("{}\n", serde_json::to_string_pretty(alert)?),
            OutputFormat::Jsonl => format!("{}\n", serde_json::to_string(alert)?),
            OutputFormat::Console => format!(
                "[{}] {} {} - {} ({})\n",
                alert.created_at.format("%Y-%m-%d %H:%M:%S"),
                alert.severity,
                alert.rule_type().title(),
                alert.description,
                alert.id
            ),
        };
        self.writer.write_all(output.as_bytes())?;
        self.writer.flush()?;
        Ok(true)
    }

    /// Write a batch, returning how many alerts were written
    pub fn write_alerts(&mut self, alerts: &[Alert]) -> Result<usize, OutputError> {
        let mut written = 0;
        for alert in alerts {
            if self.write_alert(alert)? {
                written += 1;
            }
        }
        Ok(written)
    }

    /// Write the alerts of an active set that were not written before
    ///
    /// An alert that expired and fired again has a new `created_at` and is
    /// written again. If a write fails the set is not recorded, so the
    /// unwritten alerts are retried with the next set.
    pub fn write_new_alerts(&mut self, active: &[Alert]) -> Result<usize, OutputError> {
        let fresh: Vec<Alert> = active
            .iter()
            .filter(|a| !self.written.contains(&(a.id.clone(), a.created_at)))
            .cloned()
            .collect();
        let count = self.write_alerts(&fresh)?;
        self.written = active
            .iter()
            .map(|a| (a.id.clone(), a.created_at))
            .collect();
        Ok(count)
    }

    pub fn flush(&mut self) -> Result<(), OutputError> {
        self.writer.flush()?;
        Ok(())
    }
}
