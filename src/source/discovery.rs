use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("'--regex' and '--no-regex' are mutually exclusive")]
    ConflictingFilters,

    #[error("invalid file filter '{pattern}': {source}")]
    InvalidFilter {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("failed to list log directory {}: {source}", path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("file {} not found in input directory: {source}", path.display())]
    MissingFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Restricts which discovered files are read, by base name.
#[derive(Debug, Clone)]
pub enum FileFilter {
    All,
    Include(Regex),
    Exclude(Regex),
}

impl FileFilter {
    /// Build from the include/exclude options; at most one may be set.
    pub fn new(include: Option<&str>, exclude: Option<&str>) -> Result<Self, DiscoveryError> {
        let include = include.filter(|p| !p.is_empty());
        let exclude = exclude.filter(|p| !p.is_empty());

        match (include, exclude) {
            (Some(_), Some(_)) => Err(DiscoveryError::ConflictingFilters),
            (Some(pattern), None) => Ok(FileFilter::Include(compile(pattern)?)),
            (None, Some(pattern)) => Ok(FileFilter::Exclude(compile(pattern)?)),
            (None, None) => Ok(FileFilter::All),
        }
    }

    pub fn accepts(&self, file_name: &str) -> bool {
        match self {
            FileFilter::All => true,
            FileFilter::Include(re) => re.is_match(file_name),
            FileFilter::Exclude(re) => !re.is_match(file_name),
        }
    }
}

fn compile(pattern: &str) -> Result<Regex, DiscoveryError> {
    Regex::new(pattern).map_err(|source| DiscoveryError::InvalidFilter {
        pattern: pattern.to_string(),
        source,
    })
}

const LOG_FILE_PATTERN: &str = r"^.*\.(log|log\.[0-9]+)$";

static LOG_FILE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(LOG_FILE_PATTERN).expect("failed to compile log file name regex"));

/// Whether a file name looks like a log: `*.log` or `*.log.<digits>`.
pub fn is_log_file_name(file_name: &str) -> bool {
    LOG_FILE_REGEX.is_match(file_name)
}

/// List the log files in `dir` that pass `filter`, as base names sorted by name.
pub fn discover_log_files(dir: &Path, filter: &FileFilter) -> Result<Vec<String>, DiscoveryError> {
    let read_dir_error = |source| DiscoveryError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };

    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(read_dir_error)? {
        let entry = entry.map_err(read_dir_error)?;
        let Ok(file_name) = entry.file_name().into_string() else {
            continue;
        };

        if !is_log_file_name(&file_name) {
            continue;
        }
        if !entry.file_type().map(|t| !t.is_dir()).unwrap_or(false) {
            continue;
        }
        if filter.accepts(&file_name) {
            names.push(file_name);
        }
    }

    names.sort();
    debug!(dir = %dir.display(), count = names.len(), "Discovered log files");
    Ok(names)
}

/// Restrict input to one named file, which must exist in `dir`.
pub fn single_file(dir: &Path, file_name: &str) -> Result<Vec<String>, DiscoveryError> {
    let path = dir.join(file_name);
    std::fs::metadata(&path).map_err(|source| DiscoveryError::MissingFile {
        path: path.clone(),
        source,
    })?;
    Ok(vec![file_name.to_string()])
}
