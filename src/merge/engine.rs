use crate::config::{FlushTimeouts, MergeConfig};
use crate::merge::batch::{FlushPolicy, FlushReason, PendingBatch};
use crate::sink::{Sink, SinkError};
use crate::source::record::LogRecord;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("merge engine is no longer accepting records")]
    Closed,

    #[error("join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Configuration for one merge engine run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSettings {
    pub policy: FlushPolicy,
    /// Stop once a flush has happened. Used when every input is finite.
    pub stop_after_first_flush: bool,
    pub poll_interval: Duration,
    pub queue_capacity: usize,
}

impl MergeSettings {
    /// Finite inputs: one quiet second means every reader has delivered.
    pub fn batch() -> Self {
        Self {
            policy: FlushPolicy {
                inactivity_timeout: Duration::from_secs(1),
                force_timeout: Duration::ZERO,
            },
            stop_after_first_flush: true,
            poll_interval: DEFAULT_POLL_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Tailed inputs: shorter quiet period, and nothing waits longer than 2s.
    pub fn follow() -> Self {
        Self {
            policy: FlushPolicy {
                inactivity_timeout: Duration::from_millis(750),
                force_timeout: Duration::from_secs(2),
            },
            stop_after_first_flush: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    pub fn for_mode(follow: bool) -> Self {
        if follow {
            Self::follow()
        } else {
            Self::batch()
        }
    }

    /// Settings for the given mode with the timeouts taken from config.
    pub fn from_config(config: &MergeConfig, follow: bool) -> Self {
        let timeouts = if follow { &config.follow } else { &config.batch };
        Self {
            policy: FlushPolicy::from(timeouts),
            stop_after_first_flush: !follow,
            poll_interval: config.poll_interval,
            queue_capacity: config.queue_capacity,
        }
    }
}

impl From<&FlushTimeouts> for FlushPolicy {
    fn from(timeouts: &FlushTimeouts) -> Self {
        Self {
            inactivity_timeout: timeouts.inactivity_flush_timeout,
            force_timeout: timeouts.force_flush_timeout,
        }
    }
}

/// Counters reported when the engine stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub batches: u64,
    pub records: u64,
    pub sink_errors: u64,
}

/// Fan-in point for every source reader in merged output mode.
///
/// A single task owns the pending batch and the downstream sinks; readers
/// talk to it through [`MergeSubmitter`] clones.
pub struct MergeEngine {
    settings: MergeSettings,
    sinks: Vec<Box<dyn Sink>>,
    batch: PendingBatch,
    stats: MergeStats,
}

impl MergeEngine {
    /// Start the engine task.
    ///
    /// The engine stops after its first flush when `stop_after_first_flush`
    /// is set, or once every submitter has been dropped (remaining records
    /// are flushed first).
    pub fn spawn(settings: MergeSettings, sinks: Vec<Box<dyn Sink>>) -> (MergeSubmitter, MergeHandle) {
        let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
        let engine = Self {
            settings,
            sinks,
            batch: PendingBatch::new(),
            stats: MergeStats::default(),
        };

        let task = tokio::spawn(engine.run(rx));
        (MergeSubmitter { tx }, MergeHandle { task })
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Arc<LogRecord>>) -> MergeStats {
        let poll_interval = self.settings.poll_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + poll_interval, poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(
            sinks = self.sinks.len(),
            inactivity_timeout = ?self.settings.policy.inactivity_timeout,
            force_timeout = ?self.settings.policy.force_timeout,
            "Merge engine started"
        );

        loop {
            tokio::select! {
                received = rx.recv() => {
                    match received {
                        Some(record) => {
                            self.batch.push(record, Instant::now());
                            if self.check_flush().await && self.settings.stop_after_first_flush {
                                break;
                            }
                        }
                        None => {
                            debug!("All inputs closed");
                            if !self.batch.is_empty() {
                                self.flush(FlushReason::InputsClosed).await;
                            }
                            break;
                        }
                    }
                }

                _ = ticker.tick() => {
                    if self.check_flush().await && self.settings.stop_after_first_flush {
                        break;
                    }
                }
            }
        }

        rx.close();
        let mut dropped = 0usize;
        while rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            warn!(dropped, "Records arrived after the final flush and were discarded");
        }

        info!(
            batches = self.stats.batches,
            records = self.stats.records,
            sink_errors = self.stats.sink_errors,
            "Merge engine stopped"
        );
        self.stats
    }

    async fn check_flush(&mut self) -> bool {
        match self.batch.flush_due(Instant::now(), &self.settings.policy) {
            Some(reason) => {
                self.flush(reason).await;
                true
            }
            None => false,
        }
    }

    async fn flush(&mut self, reason: FlushReason) {
        let records = self.batch.take_sorted();
        debug!(count = records.len(), reason = ?reason, "Flushing merged batch");

        let mut failures = FlushFailures::new(self.sinks.len());
        for record in &records {
            for (idx, sink) in self.sinks.iter_mut().enumerate() {
                if let Err(e) = sink.write(record).await {
                    failures.record(idx, e);
                }
            }
        }
        for (idx, failed, first) in failures.reports() {
            self.stats.sink_errors += failed;
            error!(
                sink = idx,
                failed,
                total = records.len(),
                error = %first,
                "Failed to write merged records"
            );
        }

        for (idx, sink) in self.sinks.iter_mut().enumerate() {
            if let Err(e) = sink.flush().await {
                self.stats.sink_errors += 1;
                error!(sink = idx, error = %e, "Failed to flush sink");
            }
        }

        self.stats.batches += 1;
        self.stats.records += records.len() as u64;
    }
}

/// Write failures seen during one flush, kept per sink so a broken sink is
/// reported once per flush instead of once per record.
struct FlushFailures {
    per_sink: Vec<(u64, Option<SinkError>)>,
}

impl FlushFailures {
    fn new(sinks: usize) -> Self {
        Self {
            per_sink: (0..sinks).map(|_| (0, None)).collect(),
        }
    }

    fn record(&mut self, sink: usize, error: SinkError) {
        if let Some((failed, first)) = self.per_sink.get_mut(sink) {
            *failed += 1;
            first.get_or_insert(error);
        }
    }

    /// `(sink index, failed writes, first error)` for every sink that failed
    fn reports(self) -> impl Iterator<Item = (usize, u64, SinkError)> {
        self.per_sink
            .into_iter()
            .enumerate()
            .filter_map(|(idx, (failed, first))| first.map(|e| (idx, failed, e)))
    }
}

/// Cloneable input side of a running [`MergeEngine`].
#[derive(Debug, Clone)]
pub struct MergeSubmitter {
    tx: mpsc::Sender<Arc<LogRecord>>,
}

impl MergeSubmitter {
    /// Queue one record. Waits while the queue is full, never drops.
    pub async fn submit(&self, record: Arc<LogRecord>) -> Result<(), MergeError> {
        self.tx.send(record).await.map_err(|_| MergeError::Closed)
    }
}

#[async_trait]
impl Sink for MergeSubmitter {
    async fn write(&mut self, record: &Arc<LogRecord>) -> Result<(), SinkError> {
        self.submit(record.clone())
            .await
            .map_err(|_| SinkError::Closed)
    }
}

/// Handle to the running engine task
pub struct MergeHandle {
    task: JoinHandle<MergeStats>,
}

impl MergeHandle {
    /// Wait for the engine to stop
    pub async fn wait(self) -> Result<MergeStats, MergeError> {
        Ok(self.task.await?)
    }

    pub fn abort(&self) {
        self.task.abort();
    }
}
