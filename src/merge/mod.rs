pub mod batch;
pub mod engine;

pub use batch::{FlushPolicy, FlushReason, PendingBatch};
pub use engine::{MergeEngine, MergeError, MergeHandle, MergeSettings, MergeStats, MergeSubmitter};
