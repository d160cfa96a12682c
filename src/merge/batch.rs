use crate::source::record::LogRecord;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// When a pending batch must be flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushPolicy {
    /// Quiet time after the newest pending record.
    pub inactivity_timeout: Duration,
    /// Maximum age of the oldest pending record. Zero disables it.
    pub force_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Inactivity,
    Forced,
    InputsClosed,
}

/// Records accumulated since the last flush, in arrival order.
///
/// Owned by the merge engine's task only.
#[derive(Debug, Default)]
pub struct PendingBatch {
    records: Vec<Arc<LogRecord>>,
    newest_enqueued_at: Option<Instant>,
    oldest_enqueued_at: Option<Instant>,
}

impl PendingBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: Arc<LogRecord>, now: Instant) {
        if self.records.is_empty() {
            self.oldest_enqueued_at = Some(now);
        }
        self.records.push(record);
        self.newest_enqueued_at = Some(now);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn oldest_enqueued_at(&self) -> Option<Instant> {
        self.oldest_enqueued_at
    }

    pub fn newest_enqueued_at(&self) -> Option<Instant> {
        self.newest_enqueued_at
    }

    /// Evaluate the flush policy at `now`. An empty batch is never due.
    pub fn flush_due(&self, now: Instant, policy: &FlushPolicy) -> Option<FlushReason> {
        let (Some(newest), Some(oldest)) = (self.newest_enqueued_at, self.oldest_enqueued_at)
        else {
            return None;
        };

        if now.saturating_duration_since(newest) > policy.inactivity_timeout {
            return Some(FlushReason::Inactivity);
        }

        if !policy.force_timeout.is_zero()
            && now.saturating_duration_since(oldest) > policy.force_timeout
        {
            return Some(FlushReason::Forced);
        }

        None
    }

    /// Drain the batch sorted by `logged_at_nanos`. Equal timestamps keep
    /// arrival order.
    pub fn take_sorted(&mut self) -> Vec<Arc<LogRecord>> {
        let mut records = std::mem::take(&mut self.records);
        records.sort_by_key(|record| record.logged_at_nanos);
        self.newest_enqueued_at = None;
        self.oldest_enqueued_at = None;
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record_at(nanos: i64, what: &str) -> Arc<LogRecord> {
        let line = format!(
            r#"{{"when":"2020-01-01T00:00:00","who":"svc","what":"{}","severity":"INFO"}}"#,
            what
        );
        let mut record = LogRecord::parse(&line).unwrap();
        record.logged_at_nanos = nanos;
        Arc::new(record)
    }

    fn batch_policy() -> FlushPolicy {
        FlushPolicy {
            inactivity_timeout: Duration::from_secs(1),
            force_timeout: Duration::ZERO,
        }
    }

    fn follow_policy() -> FlushPolicy {
        FlushPolicy {
            inactivity_timeout: Duration::from_millis(750),
            force_timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_empty_batch_never_due() {
        let batch = PendingBatch::new();
        let later = Instant::now() + Duration::from_secs(3600);
        assert_eq!(batch.flush_due(later, &follow_policy()), None);
    }

    #[test]
    fn test_timestamps_track_first_and_last_push() {
        let start = Instant::now();
        let mut batch = PendingBatch::new();

        batch.push(record_at(1, "a"), start);
        assert_eq!(batch.oldest_enqueued_at(), Some(start));
        assert_eq!(batch.newest_enqueued_at(), Some(start));

        let later = start + Duration::from_millis(300);
        batch.push(record_at(2, "b"), later);
        assert_eq!(batch.oldest_enqueued_at(), Some(start));
        assert_eq!(batch.newest_enqueued_at(), Some(later));
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_inactivity_is_strictly_greater() {
        let start = Instant::now();
        let mut batch = PendingBatch::new();
        batch.push(record_at(1, "a"), start);

        let policy = batch_policy();
        assert_eq!(batch.flush_due(start + Duration::from_secs(1), &policy), None);
        assert_eq!(
            batch.flush_due(start + Duration::from_millis(1001), &policy),
            Some(FlushReason::Inactivity)
        );
    }

    #[test]
    fn test_force_flush_despite_activity() {
        let start = Instant::now();
        let mut batch = PendingBatch::new();
        let policy = follow_policy();

        for step in 0..=20 {
            let now = start + Duration::from_millis(100 * step);
            batch.push(record_at(step as i64, "tick"), now);
            assert_eq!(batch.flush_due(now, &policy), None);
        }

        let now = start + Duration::from_millis(2100);
        batch.push(record_at(21, "tick"), now);
        assert_eq!(batch.flush_due(now, &policy), Some(FlushReason::Forced));
    }

    #[test]
    fn test_zero_force_timeout_disables_force_flush() {
        let start = Instant::now();
        let mut batch = PendingBatch::new();
        let policy = batch_policy();

        for step in 0..100 {
            let now = start + Duration::from_millis(500 * step);
            batch.push(record_at(step as i64, "tick"), now);
            assert_eq!(batch.flush_due(now, &policy), None);
        }
    }

    #[test]
    fn test_take_sorted_clears_state() {
        let start = Instant::now();
        let mut batch = PendingBatch::new();
        batch.push(record_at(0, "x"), start);
        batch.push(record_at(-5_000_000, "y"), start);

        let flushed = batch.take_sorted();
        let order: Vec<&str> = flushed.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(order, vec!["y", "x"]);

        assert!(batch.is_empty());
        assert_eq!(batch.oldest_enqueued_at(), None);
        assert_eq!(batch.flush_due(start + Duration::from_secs(10), &batch_policy()), None);
    }

    #[test]
    fn test_ties_keep_arrival_order() {
        let now = Instant::now();
        let mut batch = PendingBatch::new();
        for name in ["first", "second", "third"] {
            batch.push(record_at(42, name), now);
        }
        batch.push(record_at(7, "early"), now);

        let order: Vec<String> = batch
            .take_sorted()
            .iter()
            .map(|r| r.message.clone())
            .collect();
        assert_eq!(order, vec!["early", "first", "second", "third"]);
    }

    proptest! {
        #[test]
        fn prop_flushed_batch_is_sorted(stamps in proptest::collection::vec(any::<i64>(), 0..200)) {
            let now = Instant::now();
            let mut batch = PendingBatch::new();
            for (i, nanos) in stamps.iter().enumerate() {
                batch.push(record_at(*nanos, &i.to_string()), now);
            }

            let flushed = batch.take_sorted();
            prop_assert_eq!(flushed.len(), stamps.len());
            for pair in flushed.windows(2) {
                prop_assert!(pair[0].logged_at_nanos <= pair[1].logged_at_nanos);
                if pair[0].logged_at_nanos == pair[1].logged_at_nanos {
                    let a: usize = pair[0].message.parse().unwrap();
                    let b: usize = pair[1].message.parse().unwrap();
                    prop_assert!(a < b);
                }
            }
        }
    }
}
