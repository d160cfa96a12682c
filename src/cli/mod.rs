pub mod run;

pub use run::{process_logs, run, OutputTarget, RunError, RunOptions};
