pub mod format;

use crate::source::record::LogRecord;
use async_trait::async_trait;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub use format::{Formatter, HumanReadableFormatter};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to write to {sink}: {source}")]
    Io {
        sink: String,
        #[source]
        source: std::io::Error,
    },

    #[error("merge engine is no longer accepting records")]
    Closed,
}

/// Consumer of parsed records.
///
/// Sinks run on their caller's task: a direct sink inside its source reader,
/// a merged sink inside the merge engine.
#[async_trait]
pub trait Sink: Send {
    async fn write(&mut self, record: &Arc<LogRecord>) -> Result<(), SinkError>;

    /// Called once the caller has no further records to hand over for now
    /// (end of a merged batch, or a reader catching up with its file).
    async fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Formats each record and appends the text to a byte destination.
pub struct FormattedWriter {
    name: String,
    formatter: Arc<dyn Formatter>,
    out: Box<dyn Write + Send>,
}

impl FormattedWriter {
    pub fn new(
        name: impl Into<String>,
        formatter: Arc<dyn Formatter>,
        out: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            name: name.into(),
            formatter,
            out,
        }
    }

    /// Create (or truncate) an output file.
    pub fn create_file(path: &Path, formatter: Arc<dyn Formatter>) -> Result<Self, SinkError> {
        let name = path.display().to_string();
        let file = File::create(path).map_err(|source| SinkError::Io {
            sink: name.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Created output file");
        Ok(Self::new(name, formatter, Box::new(BufWriter::new(file))))
    }

    pub fn stdout(formatter: Arc<dyn Formatter>) -> Self {
        Self::new("stdout", formatter, Box::new(std::io::stdout()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn io_error(&self, source: std::io::Error) -> SinkError {
        SinkError::Io {
            sink: self.name.clone(),
            source,
        }
    }
}

#[async_trait]
impl Sink for FormattedWriter {
    async fn write(&mut self, record: &Arc<LogRecord>) -> Result<(), SinkError> {
        let text = self.formatter.format(record);
        self.out
            .write_all(text.as_bytes())
            .map_err(|e| self.io_error(e))
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.out.flush().map_err(|e| self.io_error(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenPipe;

    impl Write for BrokenPipe {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
        }
    }

    fn record(what: &str) -> Arc<LogRecord> {
        let line = format!(
            r#"{{"when":"2020-01-01T00:00:00","who":"svc","what":"{}","severity":"INFO"}}"#,
            what
        );
        Arc::new(LogRecord::parse(&line).unwrap())
    }

    #[tokio::test]
    async fn test_formatted_writer_appends() {
        let buffer = SharedBuffer::default();
        let formatter = Arc::new(HumanReadableFormatter::new(false, 45));
        let mut writer = FormattedWriter::new("memory", formatter, Box::new(buffer.clone()));

        writer.write(&record("first")).await.unwrap();
        writer.write(&record("second")).await.unwrap();
        writer.flush().await.unwrap();

        let text = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("(I) first"));
        assert!(lines[1].contains("(I) second"));
    }

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let formatter = Arc::new(HumanReadableFormatter::new(false, 45));
        let mut writer = FormattedWriter::new("broken", formatter, Box::new(BrokenPipe));

        let err = writer.write(&record("x")).await.unwrap_err();
        assert!(matches!(err, SinkError::Io { ref sink, .. } if sink == "broken"));
        assert!(writer.flush().await.is_err());
    }

    #[tokio::test]
    async fn test_create_file_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.fmt");
        std::fs::write(&path, "stale content\n").unwrap();

        let formatter = Arc::new(HumanReadableFormatter::new(false, 45));
        let mut writer = FormattedWriter::create_file(&path, formatter).unwrap();
        writer.write(&record("fresh")).await.unwrap();
        writer.flush().await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(!text.contains("stale"));
        assert!(text.contains("(I) fresh"));
    }
}
