use std::path::PathBuf;
use structopt::StructOpt;

use chrono::{DateTime, Utc};

use authwatch::config::Config;
use authwatch::detection::{DetectionPipeline, EngineState};
use authwatch::geolocation::{enrich_entries, resolver_from_config};
use authwatch::input::load_file;
use authwatch::models::{LogEntry, Severity};
use authwatch::output::{OutputFormat, OutputHandler};

/// authwatch command line interface
#[derive(StructOpt, Debug)]
#[structopt(name = "authwatch", about = "SSH authentication log detection engine")]
pub enum Cli {
    /// Generate a default configuration file
    Config {
        /// Output path for the configuration file
        #[structopt(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
    /// Run every detection rule once over a log file
    Scan {
        /// Path to log file
        #[structopt(short, long)]
        file: PathBuf,
        /// Path to configuration file
        #[structopt(short, long)]
        config: Option<PathBuf>,
        /// Evaluation time: RFC 3339, "latest" (newest entry) or omitted for now
        #[structopt(long)]
        at: Option<String>,
        /// Print alerts as JSON lines instead of console lines
        #[structopt(long)]
        json: bool,
    },
    /// Parse and display log entries from a file
    Parse {
        /// Path to log file
        #[structopt(short, long)]
        file: PathBuf,
        /// Number of entries to display
        #[structopt(short, long, default_value = "10")]
        lines: usize,
    },
}

fn evaluation_time(at: Option<&str>, entries: &[LogEntry]) -> Result<DateTime<Utc>, String> {
    match at {
        None => Ok(Utc::now()),
        Some("latest") => entries
            .iter()
            .filter_map(|e| e.timestamp)
            .max()
            .ok_or_else(|| "no timestamped entries in file".to_string()),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| format!("invalid --at '{}': {}", raw, e)),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env()
        .init();

    let cli = Cli::from_args();

    match cli {
        Cli::Config { output } => {
            let config = Config::default();
            config.to_file(&output)?;
            println!("Default configuration written to: {:?}", output);
        }
        Cli::Scan {
            file,
            config,
            at,
            json,
        } => {
            let config = match config {
                Some(path) => Config::from_file(&path)?,
                None => Config::default(),
            };

            let mut entries = load_file(&file)?;
            if let Some(resolver) = resolver_from_config(&config.geo) {
                entries = enrich_entries(&entries, &*resolver);
            }
            let now = evaluation_time(at.as_deref(), &entries)?;

            let (state, report) = DetectionPipeline::new().run(
                &EngineState::default(),
                &entries,
                &config.detection,
                now,
            );

            println!(
                "Scanned {} entries at {} ({} addresses in window, {} alert(s))\n",
                entries.len(),
                now.to_rfc3339(),
                report.addresses_seen,
                state.alerts.len()
            );
            for failure in &report.failed_rules {
                eprintln!("  skipped: {}", failure);
            }

            let format = if json {
                OutputFormat::Jsonl
            } else {
                OutputFormat::Console
            };
            let min_severity = config
                .output
                .min_severity
                .parse()
                .unwrap_or(Severity::Low);
            let mut output = OutputHandler::new(format, None, min_severity)?;
            output.write_alerts(&state.alerts)?;
        }
        Cli::Parse { file, lines } => {
            if !file.exists() {
                eprintln!("File not found: {:?}", file);
                std::process::exit(1);
            }

            let entries = load_file(&file)?;
            let display_count = std::cmp::min(lines, entries.len());

            println!("Parsed {} entries (showing {}):\n", entries.len(), display_count);
            for entry in entries.iter().take(display_count) {
                let timestamp = entry
                    .timestamp
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "  {}  {:?}  user={}  from={}:{}",
                    timestamp, entry.outcome, entry.account, entry.source_address, entry.port
                );
            }
        }
    }

    Ok(())
}
