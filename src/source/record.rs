use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Layout of the `when` field. Writers emit local-time literals without a zone
/// suffix; they are read as UTC.
const WHEN_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid timestamp '{value}': {source}")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("timestamp '{0}' is outside the nanosecond range")]
    TimestampRange(String),

    #[error("unknown severity '{0}'")]
    Severity(String),
}

/// Closed set of levels emitted by the services we read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Trace,
    Verbose,
    Debug,
    Info,
    Warning,
    Error,
    Critical,
    Fatal,
    Panic,
}

impl Severity {
    /// Single character shown in formatted output.
    pub fn code(self) -> char {
        match self {
            Severity::Trace => 'T',
            Severity::Verbose => 'V',
            Severity::Debug => 'D',
            Severity::Info => 'I',
            Severity::Warning => 'W',
            Severity::Error => 'E',
            Severity::Critical => 'C',
            Severity::Fatal => 'F',
            Severity::Panic => 'P',
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Verbose => "VERBOSE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
            Severity::Fatal => "FATAL",
            Severity::Panic => "PANIC",
        }
    }
}

impl FromStr for Severity {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let severity = match s.to_ascii_uppercase().as_str() {
            "TRACE" => Severity::Trace,
            "VERBOSE" => Severity::Verbose,
            "DEBUG" => Severity::Debug,
            "INFO" => Severity::Info,
            "WARN" | "WARNING" => Severity::Warning,
            "ERROR" => Severity::Error,
            "CRITICAL" => Severity::Critical,
            "FATAL" => Severity::Fatal,
            "PANIC" => Severity::Panic,
            _ => return Err(ParseError::Severity(s.to_string())),
        };
        Ok(severity)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed log line. Never mutated after parsing; readers hand it to sinks
/// behind an `Arc`.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub logged_at: DateTime<Utc>,
    pub logged_at_nanos: i64,
    pub source: String,
    pub message: String,
    pub severity: Severity,
    pub attributes: Map<String, Value>,
    pub context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRecord {
    when: String,
    #[serde(default)]
    who: Option<String>,
    #[serde(default)]
    what: Option<String>,
    severity: String,
    #[serde(default)]
    more: Option<Map<String, Value>>,
    #[serde(default)]
    ctx: Option<String>,
}

impl LogRecord {
    /// Parse one raw line.
    ///
    /// An `Err` means the line is unparsable; callers skip it and keep going.
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let raw: RawRecord = serde_json::from_str(line)?;

        let logged_at = parse_when(&raw.when)?;
        let logged_at_nanos = logged_at
            .timestamp_nanos_opt()
            .ok_or_else(|| ParseError::TimestampRange(raw.when.clone()))?;
        let severity = raw.severity.parse()?;

        Ok(Self {
            logged_at,
            logged_at_nanos,
            source: raw.who.unwrap_or_default(),
            message: raw.what.unwrap_or_default(),
            severity,
            attributes: raw.more.unwrap_or_default(),
            context: raw.ctx.filter(|ctx| !ctx.is_empty()),
        })
    }
}

/// Parse one line as read from a source file.
pub fn parse_line(line: &str) -> Result<LogRecord, ParseError> {
    LogRecord::parse(line)
}

fn parse_when(value: &str) -> Result<DateTime<Utc>, ParseError> {
    NaiveDateTime::parse_from_str(value, WHEN_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|source| ParseError::Timestamp {
            value: value.to_string(),
            source,
        })
}
