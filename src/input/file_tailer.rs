use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::sleep;

use crate::input::{AuthLogParser, InputError};
use crate::models::LogEntry;

/// Follows an auth log and forwards parsed entries in batches
///
/// Every poll drains whatever complete lines are available and sends them
/// as one batch. A file that shrinks is assumed to have been rotated or
/// truncated and is reopened from the start.
pub struct AsyncFileTailer {
    file_path: PathBuf,
    parser: AuthLogParser,
    poll_interval: Duration,
    from_start: bool,
}

impl AsyncFileTailer {
    pub fn new(file_path: PathBuf, poll_interval: Duration) -> Self {
        AsyncFileTailer {
            file_path,
            parser: AuthLogParser::new(),
            poll_interval: poll_interval.max(Duration::from_millis(10)),
            from_start: false,
        }
    }

    /// Read existing contents instead of starting at the end of the file
    pub fn from_start(mut self, from_start: bool) -> Self {
        self.from_start = from_start;
        self
    }

    pub fn with_parser(mut self, parser: AuthLogParser) -> Self {
        self.parser = parser;
        self
    }

    async fn open(&self, at_end: bool) -> Result<(BufReader<File>, u64), InputError> {
        let file = File::open(&self.file_path)
            .await
            .map_err(|e| InputError::Open {
                path: self.file_path.clone(),
                source: e,
            })?;
        let mut reader = BufReader::new(file);
        let position = if at_end {
            reader.seek(SeekFrom::End(0)).await?
        } else {
            0
        };
        Ok((reader, position))
    }

    /// Run until the receiving side is dropped
    pub async fn run(&mut self, tx: mpsc::Sender<Vec<LogEntry>>) -> Result<(), InputError> {
        let (mut reader, mut position) = self.open(!self.from_start).await?;
        log::info!("File tailer started for {:?}", self.file_path);

        let mut pending = String::new();
        loop {
            let mut batch = Vec::new();

            loop {
                let read = match reader.read_line(&mut pending).await {
                    Ok(read) => read,
                    Err(e) => {
                        log::error!("Error reading {:?}: {}", self.file_path, e);
                        sleep(Duration::from_secs(1)).await;
                        break;
                    }
                };
                if read == 0 {
                    break;
                }
                position += read as u64;

                // Partial line; the rest arrives with a later write
                if !pending.ends_with('\n') {
                    continue;
                }
                match self.parser.parse_line(&pending) {
                    Ok(Some(entry)) => batch.push(entry),
                    Ok(None) => {}
                    Err(e) => log::debug!("{}", e),
                }
                pending.clear();
            }

            if !batch.is_empty() {
                log::debug!("Forwarding {} new entries", batch.len());
                if tx.send(batch).await.is_err() {
                    log::info!("Channel closed, stopping file tailer");
                    return Ok(());
                }
            }

            sleep(self.poll_interval).await;

            match tokio::fs::metadata(&self.file_path).await {
                Ok(meta) if meta.len() < position => {
                    log::info!("{:?} was truncated or rotated, reopening", self.file_path);
                    let (fresh, start) = self.open(false).await?;
                    reader = fresh;
                    position = start;
                    pending.clear();
                }
                Ok(_) => {}
                Err(e) => log::debug!("Cannot stat {:?}: {}", self.file_path, e),
            }
        }
    }
}
