//! OpenSSH auth log parsing
//!
//! Handles `sshd` lines with either an RFC 3339 prefix (rsyslog high
//! precision format, journald exports) or the classic `Mmm dd hh:mm:ss`
//! syslog prefix. Classic prefixes carry no year or zone; they are read as
//! UTC in the parser's reference year.

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::input::InputError;
use crate::models::{LogEntry, Outcome, UNKNOWN_COUNTRY};

static SSHD_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<ts>.+?)\s+\S+\s+sshd(?:-session)?(?:\[\d+\])?:\s+(?P<msg>.*)$")
        .expect("sshd line pattern")
});

static FAILED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^Failed \S+ for (?:invalid user )?(?P<user>\S*) from (?P<addr>\S+) port (?P<port>\d+)",
    )
    .expect("failed pattern")
});

static ACCEPTED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Accepted \S+ for (?P<user>\S+) from (?P<addr>\S+) port (?P<port>\d+)")
        .expect("accepted pattern")
});

static INVALID_USER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Invalid user (?P<user>\S*) from (?P<addr>\S+)(?: port (?P<port>\d+))?")
        .expect("invalid user pattern")
});

const DEFAULT_SSH_PORT: u16 = 22;

/// Parser for sshd authentication lines
#[derive(Debug, Clone, Copy)]
pub struct AuthLogParser {
    year: i32,
}

impl AuthLogParser {
    /// Parser that dates classic syslog lines in the current year
    pub fn new() -> Self {
        AuthLogParser {
            year: Utc::now().year(),
        }
    }

    pub fn with_year(year: i32) -> Self {
        AuthLogParser { year }
    }

    /// Parse a single line
    ///
    /// Returns `Ok(None)` for lines that are not authentication attempts.
    /// A line whose timestamp cannot be read still yields an entry, with
    /// no timestamp.
    pub fn parse_line(&self, line: &str) -> Result<Option<LogEntry>, InputError> {
        let line = line.trim_end();
        let caps = match SSHD_LINE.captures(line) {
            Some(caps) => caps,
            None => return Ok(None),
        };
        let msg = &caps["msg"];

        let (outcome, attempt) = if let Some(c) = FAILED.captures(msg) {
            (Outcome::Failed, c)
        } else if let Some(c) = ACCEPTED.captures(msg) {
            (Outcome::Success, c)
        } else if let Some(c) = INVALID_USER.captures(msg) {
            (Outcome::Failed, c)
        } else {
            return Ok(None);
        };

        let port = match attempt.name("port") {
            Some(port) => port.as_str().parse::<u16>().map_err(|e| {
                InputError::Unparseable {
                    line: line.to_string(),
                    reason: format!("bad port: {}", e),
                }
            })?,
            None => DEFAULT_SSH_PORT,
        };

        let timestamp = self.parse_timestamp(&caps["ts"]);
        if timestamp.is_none() {
            log::debug!("Unreadable timestamp in line: {}", line);
        }

        Ok(Some(LogEntry {
            timestamp,
            source_address: attempt["addr"].to_string(),
            account: attempt["user"].to_string(),
            outcome,
            port,
            country: UNKNOWN_COUNTRY.to_string(),
        }))
    }

    fn parse_timestamp(&self, raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.with_timezone(&Utc));
        }

        let parts: Vec<&str> = raw.split_whitespace().collect();
        if parts.len() != 3 {
            return None;
        }
        let normalized = format!("{} {} {} {}", self.year, parts[0], parts[1], parts[2]);
        NaiveDateTime::parse_from_str(&normalized, "%Y %b %d %H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc())
    }

    /// Parse every authentication line of a reader, skipping bad lines
    pub fn parse_reader<R: BufRead>(&self, reader: R) -> Result<Vec<LogEntry>, InputError> {
        let mut entries = Vec::new();
        let mut rejected = 0usize;

        for line in reader.lines() {
            match self.parse_line(&line?) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => {}
                Err(e) => {
                    rejected += 1;
                    log::debug!("{}", e);
                }
            }
        }

        if rejected > 0 {
            log::warn!("Skipped {} malformed authentication line(s)", rejected);
        }
        Ok(entries)
    }
}

impl Default for AuthLogParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a whole auth log for bulk import
pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Vec<LogEntry>, InputError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| InputError::Open {
        path: path.to_path_buf(),
        source: e,
    })?;
    let entries = AuthLogParser::new().parse_reader(BufReader::new(file))?;
    log::info!("Loaded {} entries from {}", entries.len(), path.display());
    Ok(entries)
}
