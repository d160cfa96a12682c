use crate::merge::{MergeEngine, MergeError, MergeSettings, MergeStats};
use crate::sink::Sink;
use crate::source::reader::{ReadSummary, ReaderError, SourceReader};
use futures::future::join_all;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Errors that stop a whole run rather than a single source
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("merge engine error: {0}")]
    Merge(#[from] MergeError),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Reader behaviour shared by every source in one run
#[derive(Debug, Clone, Copy)]
pub struct ReadOptions {
    pub follow: bool,
    pub poll_interval: Duration,
}

/// How one source ended.
#[derive(Debug)]
pub struct SourceOutcome {
    pub path: PathBuf,
    pub result: Result<ReadSummary, ReaderError>,
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub sources: Vec<SourceOutcome>,
    /// Present when the sources were merged
    pub merge: Option<MergeStats>,
}

impl RunSummary {
    pub fn failed(&self) -> impl Iterator<Item = &SourceOutcome> {
        self.sources.iter().filter(|outcome| outcome.result.is_err())
    }

    /// Records parsed across all sources that finished reading
    pub fn records(&self) -> u64 {
        self.sources
            .iter()
            .filter_map(|outcome| outcome.result.as_ref().ok())
            .map(|summary| summary.records)
            .sum()
    }
}

/// Read every path and merge the records into one time-ordered stream.
///
/// Each reader gets its own submitter; the engine sees its inputs close once
/// all readers are done.
pub async fn run_merged(
    paths: Vec<PathBuf>,
    options: ReadOptions,
    settings: MergeSettings,
    sinks: Vec<Box<dyn Sink>>,
) -> Result<RunSummary, PipelineError> {
    let (submitter, engine) = MergeEngine::spawn(settings, sinks);

    let mut readers = Vec::new();
    for path in dedupe(paths) {
        let reader = SourceReader::new(path, vec![Box::new(submitter.clone()) as Box<dyn Sink>])
            .with_poll_interval(options.poll_interval);
        readers.push(spawn_reader(reader, options.follow));
    }
    drop(submitter);

    info!(sources = readers.len(), "Merging sources");
    let sources = collect(readers).await?;
    let stats = engine.wait().await?;

    Ok(RunSummary {
        sources,
        merge: Some(stats),
    })
}

/// Read each path straight into its own sinks.
pub async fn run_per_file(
    inputs: Vec<(PathBuf, Vec<Box<dyn Sink>>)>,
    options: ReadOptions,
) -> Result<RunSummary, PipelineError> {
    let mut seen = HashSet::new();
    let mut readers = Vec::new();
    for (path, sinks) in inputs {
        if !seen.insert(path.clone()) {
            warn!(path = %path.display(), "Ignoring duplicate source");
            continue;
        }
        let reader = SourceReader::new(path, sinks).with_poll_interval(options.poll_interval);
        readers.push(spawn_reader(reader, options.follow));
    }

    info!(sources = readers.len(), "Reading sources");
    let sources = collect(readers).await?;
    Ok(RunSummary {
        sources,
        merge: None,
    })
}

type ReaderTask = (PathBuf, JoinHandle<Result<ReadSummary, ReaderError>>);

fn spawn_reader(reader: SourceReader, follow: bool) -> ReaderTask {
    let path = reader.path().to_path_buf();
    info!(path = %path.display(), follow, "Starting source reader");
    (path, tokio::spawn(reader.read(follow)))
}

async fn collect(readers: Vec<ReaderTask>) -> Result<Vec<SourceOutcome>, PipelineError> {
    let (paths, handles): (Vec<_>, Vec<_>) = readers.into_iter().unzip();

    let mut sources = Vec::with_capacity(paths.len());
    for (path, joined) in paths.into_iter().zip(join_all(handles).await) {
        let result = joined?;
        if let Err(e) = &result {
            error!(path = %path.display(), error = %e, "Source reader failed");
        }
        sources.push(SourceOutcome { path, result });
    }
    Ok(sources)
}

fn dedupe(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    paths
        .into_iter()
        .filter(|path| {
            let fresh = seen.insert(path.clone());
            if !fresh {
                warn!(path = %path.display(), "Ignoring duplicate source");
            }
            fresh
        })
        .collect()
}
