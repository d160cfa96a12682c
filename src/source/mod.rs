pub mod discovery;
pub mod reader;
pub mod record;

pub use discovery::{discover_log_files, single_file, DiscoveryError, FileFilter};
pub use reader::{ReadSummary, ReaderError, SourceReader};
pub use record::{parse_line, LogRecord, ParseError, Severity};
