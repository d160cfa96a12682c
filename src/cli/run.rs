use crate::config::{self, ColorMode, Config, OutputMode};
use crate::merge::MergeSettings;
use crate::pipeline::{run_merged, run_per_file, ReadOptions, RunSummary};
use crate::sink::{Formatter, FormattedWriter, HumanReadableFormatter, Sink};
use crate::source::{discover_log_files, single_file, FileFilter};
use futures::FutureExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tracing::{info, warn};

/// File written in `single` mode when no output path is given
pub const MERGED_FILE_NAME: &str = "merged.log.fmt";
/// Appended to each input name in `per` mode
pub const FORMATTED_SUFFIX: &str = ".fmt";

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("input error: {0}")]
    Discovery(#[from] crate::source::DiscoveryError),

    #[error("output error: {0}")]
    Sink(#[from] crate::sink::SinkError),

    #[error("pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),
}

/// Everything the command line decides about one run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub input_path: PathBuf,
    /// Read only this file from `input_path`
    pub file_name: Option<String>,
    pub follow: bool,
    pub output_path: Option<PathBuf>,
    pub output_mode: OutputMode,
    pub stdout: bool,
    pub include: Option<String>,
    pub exclude: Option<String>,
    /// Overrides `output.color` from the config file
    pub color: Option<ColorMode>,
    /// Overrides `output.who_width` from the config file
    pub who_width: Option<usize>,
    pub config_path: Option<PathBuf>,
}

/// Where formatted output goes once the options are resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputTarget {
    /// One merged stream, written to the file and/or stdout (file first)
    Merged { file: Option<PathBuf>, stdout: bool },
    /// One `<name>.fmt` file per input in this directory
    PerFile(PathBuf),
}

impl RunOptions {
    /// `--stdout` implies a single merged stream.
    pub fn effective_mode(&self) -> OutputMode {
        if self.stdout {
            OutputMode::Single
        } else {
            self.output_mode
        }
    }

    /// Without `--output-path` the file lands next to the inputs, unless
    /// `--stdout` alone was asked for.
    pub fn output_target(&self) -> OutputTarget {
        match self.effective_mode() {
            OutputMode::Single => {
                let file = match (&self.output_path, self.stdout) {
                    (Some(path), _) => Some(path.clone()),
                    (None, true) => None,
                    (None, false) => Some(self.input_path.join(MERGED_FILE_NAME)),
                };
                OutputTarget::Merged {
                    file,
                    stdout: self.stdout,
                }
            }
            OutputMode::Per => OutputTarget::PerFile(
                self.output_path
                    .clone()
                    .unwrap_or_else(|| self.input_path.clone()),
            ),
        }
    }
}

/// Decide whether one output gets colour escapes. Files stay plain unless
/// colour is forced.
pub fn use_color(mode: ColorMode, to_stdout: bool) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Off => false,
        ColorMode::On => to_stdout && console::Term::stdout().is_term(),
    }
}

pub async fn run(options: RunOptions) -> Result<(), RunError> {
    let config = config::load_or_default(options.config_path.as_deref())?;

    match process_logs(&options, &config).await? {
        Some(summary) => {
            let failed = summary.failed().count();
            if failed > 0 {
                warn!(failed, "Some sources could not be read");
            }
            info!(
                sources = summary.sources.len(),
                records = summary.records(),
                "Done"
            );
        }
        None => info!("Interrupted"),
    }
    Ok(())
}

/// Discover inputs, open outputs and run the pipeline.
///
/// Returns `None` when interrupted by Ctrl-C. Setup problems are errors;
/// a source that fails while reading is only reported in the summary.
pub async fn process_logs(options: &RunOptions, config: &Config) -> Result<Option<RunSummary>, RunError> {
    let names = match &options.file_name {
        Some(name) => single_file(&options.input_path, name)?,
        None => {
            let filter = FileFilter::new(options.include.as_deref(), options.exclude.as_deref())?;
            discover_log_files(&options.input_path, &filter)?
        }
    };
    if names.is_empty() {
        warn!(input_path = %options.input_path.display(), "No log files found");
    }

    let target = options.output_target();
    let color_mode = options.color.unwrap_or(config.output.color);
    let who_width = options.who_width.unwrap_or(config.output.who_width);
    let formatter = |to_stdout: bool| -> Arc<dyn Formatter> {
        Arc::new(HumanReadableFormatter::new(use_color(color_mode, to_stdout), who_width))
    };

    let read_options = ReadOptions {
        follow: options.follow,
        poll_interval: config.reader.poll_interval,
    };
    let paths: Vec<PathBuf> = names.iter().map(|name| options.input_path.join(name)).collect();

    info!(
        sources = paths.len(),
        follow = options.follow,
        target = ?target,
        "Processing logs"
    );

    let settings = MergeSettings::from_config(&config.merge, options.follow);
    let pipeline = match &target {
        OutputTarget::Merged { file, stdout } => {
            let sinks = merged_writers(file.as_deref(), *stdout, formatter)?
                .into_iter()
                .map(|writer| Box::new(writer) as Box<dyn Sink>)
                .collect();
            run_merged(paths, read_options, settings, sinks).boxed()
        }
        OutputTarget::PerFile(dir) => {
            let inputs = per_file_sinks(&names, &paths, dir, &formatter(false))?;
            run_per_file(inputs, read_options).boxed()
        }
    };

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(None)
        }
        result = pipeline => Ok(Some(result?)),
    }
}

/// Writers for the merged stream: the file first, then stdout.
pub fn merged_writers(
    file: Option<&Path>,
    stdout: bool,
    formatter: impl Fn(bool) -> Arc<dyn Formatter>,
) -> Result<Vec<FormattedWriter>, RunError> {
    let mut writers = Vec::with_capacity(2);
    if let Some(path) = file {
        writers.push(FormattedWriter::create_file(path, formatter(false))?);
    }
    if stdout {
        writers.push(FormattedWriter::stdout(formatter(true)));
    }
    Ok(writers)
}

fn per_file_sinks(
    names: &[String],
    paths: &[PathBuf],
    dir: &Path,
    formatter: &Arc<dyn Formatter>,
) -> Result<Vec<(PathBuf, Vec<Box<dyn Sink>>)>, RunError> {
    let mut inputs = Vec::with_capacity(names.len());
    for (name, path) in names.iter().zip(paths) {
        let out = dir.join(format!("{}{}", name, FORMATTED_SUFFIX));
        let writer = FormattedWriter::create_file(&out, formatter.clone())?;
        inputs.push((path.clone(), vec![Box::new(writer) as Box<dyn Sink>]));
    }
    Ok(inputs)
}
