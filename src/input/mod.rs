//! Auth log ingestion: bulk loading and tailing

pub mod auth_log;
pub mod file_tailer;

use std::path::PathBuf;
use thiserror::Error;

pub use auth_log::{load_file, AuthLogParser};
pub use file_tailer::AsyncFileTailer;

/// Errors raised while reading authentication logs
#[derive(Error, Debug)]
pub enum InputError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unparseable line ({reason}): {line}")]
    Unparseable { line: String, reason: String },
}
