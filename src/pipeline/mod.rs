pub mod runner;

pub use runner::{run_merged, run_per_file, PipelineError, ReadOptions, RunSummary, SourceOutcome};
