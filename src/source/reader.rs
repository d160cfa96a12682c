use crate::sink::{Sink, SinkError};
use crate::source::record::parse_line;
use std::fs::Metadata;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, trace, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to deliver record from {}: {source}", path.display())]
    Sink {
        path: PathBuf,
        #[source]
        source: SinkError,
    },
}

/// Line counters for one finished read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadSummary {
    pub lines: u64,
    pub records: u64,
    pub skipped: u64,
}

/// Reads one log file from its start and hands every parsed record to its
/// sinks, in order, waiting on each.
pub struct SourceReader {
    path: PathBuf,
    sinks: Vec<Box<dyn Sink>>,
    poll_interval: Duration,

    // Internal state
    file: Option<BufReader<File>>,
    current_offset: u64,
    partial: Vec<u8>, // Bytes of a line whose newline has not been written yet
    file_inode: Option<u64>,
    unflushed: bool,
    summary: ReadSummary,
}

impl SourceReader {
    pub fn new(path: impl Into<PathBuf>, sinks: Vec<Box<dyn Sink>>) -> Self {
        Self {
            path: path.into(),
            sinks,
            poll_interval: DEFAULT_POLL_INTERVAL,
            file: None,
            current_offset: 0,
            partial: Vec::new(),
            file_inode: None,
            unflushed: false,
            summary: ReadSummary::default(),
        }
    }

    /// How long to sleep at end of file before checking for new content
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the file.
    ///
    /// Without `follow` this returns at end of file. With `follow` it keeps
    /// waiting for appended lines and only returns on error.
    pub async fn read(mut self, follow: bool) -> Result<ReadSummary, ReaderError> {
        self.open().await?;
        debug!(path = %self.path.display(), follow, "Reading");

        loop {
            match self.next_line().await? {
                Some(line) => self.process_line(&line).await?,
                None if follow => {
                    self.flush_sinks().await?;
                    self.wait_for_growth().await?;
                }
                None => break,
            }
        }

        // A final line without a newline is complete once we stop reading
        if !self.partial.is_empty() {
            let line = std::mem::take(&mut self.partial);
            self.process_line(strip_line_ending(&line)).await?;
        }
        self.flush_sinks().await?;

        info!(
            path = %self.path.display(),
            lines = self.summary.lines,
            records = self.summary.records,
            skipped = self.summary.skipped,
            "Finished reading"
        );
        Ok(self.summary)
    }

    async fn open(&mut self) -> Result<(), ReaderError> {
        let file = File::open(&self.path).await.map_err(|source| ReaderError::Open {
            path: self.path.clone(),
            source,
        })?;
        let metadata = file.metadata().await.map_err(|source| ReaderError::Open {
            path: self.path.clone(),
            source,
        })?;

        self.file_inode = get_inode(&metadata);
        self.file = Some(BufReader::new(file));
        self.current_offset = 0;
        self.partial.clear();
        Ok(())
    }

    /// Next complete line without its line ending, or `None` at end of file.
    async fn next_line(&mut self) -> Result<Option<Vec<u8>>, ReaderError> {
        let Some(file) = self.file.as_mut() else {
            return Ok(None);
        };

        let bytes_read = file
            .read_until(b'\n', &mut self.partial)
            .await
            .map_err(|source| ReaderError::Read {
                path: self.path.clone(),
                source,
            })?;
        self.current_offset += bytes_read as u64;

        if self.partial.last() != Some(&b'\n') {
            return Ok(None);
        }

        let line = std::mem::take(&mut self.partial);
        Ok(Some(strip_line_ending(&line).to_vec()))
    }

    async fn process_line(&mut self, line: &[u8]) -> Result<(), ReaderError> {
        self.summary.lines += 1;

        let parsed = match std::str::from_utf8(line) {
            Ok(text) => parse_line(text).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        let record = match parsed {
            Ok(record) => Arc::new(record),
            Err(e) => {
                self.summary.skipped += 1;
                trace!(path = %self.path.display(), error = %e, "Skipping unparsable line");
                return Ok(());
            }
        };

        for sink in self.sinks.iter_mut() {
            sink.write(&record).await.map_err(|source| ReaderError::Sink {
                path: self.path.clone(),
                source,
            })?;
        }
        self.summary.records += 1;
        self.unflushed = true;
        Ok(())
    }

    async fn flush_sinks(&mut self) -> Result<(), ReaderError> {
        if !self.unflushed {
            return Ok(());
        }
        for sink in self.sinks.iter_mut() {
            sink.flush().await.map_err(|source| ReaderError::Sink {
                path: self.path.clone(),
                source,
            })?;
        }
        self.unflushed = false;
        Ok(())
    }

    /// Sleep until the file has new bytes, was truncated, or was replaced.
    async fn wait_for_growth(&mut self) -> Result<(), ReaderError> {
        loop {
            sleep(self.poll_interval).await;

            let metadata = match fs::metadata(&self.path).await {
                Ok(metadata) => metadata,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    // Mid-rotation; the writer will recreate it
                    continue;
                }
                Err(source) => {
                    return Err(ReaderError::Read {
                        path: self.path.clone(),
                        source,
                    })
                }
            };

            if self.check_file_rotation(&metadata) {
                info!(path = %self.path.display(), "File rotated, reopening from start");
                return self.open().await;
            }

            if metadata.len() < self.current_offset {
                warn!(
                    path = %self.path.display(),
                    previous_offset = self.current_offset,
                    current_size = metadata.len(),
                    "File truncated, reading from start"
                );
                return self.rewind().await;
            }

            if metadata.len() > self.current_offset {
                return Ok(());
            }
        }
    }

    async fn rewind(&mut self) -> Result<(), ReaderError> {
        if let Some(file) = self.file.as_mut() {
            file.seek(SeekFrom::Start(0))
                .await
                .map_err(|source| ReaderError::Read {
                    path: self.path.clone(),
                    source,
                })?;
        }
        self.current_offset = 0;
        self.partial.clear();
        Ok(())
    }

    /// Check if the path now points at a different file (inode changed)
    fn check_file_rotation(&self, metadata: &Metadata) -> bool {
        match (self.file_inode, get_inode(metadata)) {
            (Some(original), Some(current)) => original != current,
            _ => false,
        }
    }
}

fn strip_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(unix)]
fn get_inode(metadata: &Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(metadata.ino())
}

// No stable file identity off unix; rotation is then only seen as truncation
#[cfg(not(unix))]
fn get_inode(_metadata: &Metadata) -> Option<u64> {
    None
}
