//! Size- and time-bounded batching.
//!
//! A [`Batcher`] is owned by exactly one pipeline worker, so its buffer is
//! never shared. The worker pushes every incoming batch and exports whatever
//! `push` returns; it also sleeps until [`Batcher::deadline`] and calls
//! [`Batcher::flush`] when the timer fires or on shutdown.

use shared::config::BatchConfig;
use shared::models::Batch;
use std::time::Duration;
use tokio::time::Instant;

/// Accumulates items until a size threshold or a timeout is reached.
#[derive(Debug)]
pub struct Batcher {
    send_batch_size: usize,
    send_batch_max_size: Option<usize>,
    timeout: Duration,
    buffer: Option<Batch>,
    first_item_at: Option<Instant>,
}

impl Batcher {
    /// Creates an empty batcher.
    #[must_use]
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            send_batch_size: config.send_batch_size.max(1),
            send_batch_max_size: Some(config.send_batch_max_size).filter(|max| *max > 0),
            timeout: config.timeout,
            buffer: None,
            first_item_at: None,
        }
    }

    /// Number of buffered items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.as_ref().map_or(0, Batch::len)
    }

    /// Whether nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// When the buffered items must be flushed at the latest.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.first_item_at.map(|at| at + self.timeout)
    }

    /// Adds a batch, returning the batches that are ready to send.
    ///
    /// A buffer whose deadline has passed by `now` is flushed before the new
    /// items are buffered, so a queue that never runs empty still honours the
    /// timeout. A buffer that reaches `send_batch_size` is flushed right away,
    /// split into chunks of at most `send_batch_max_size`. A remainder smaller
    /// than `send_batch_size` stays buffered and keeps the original deadline.
    pub fn push(&mut self, batch: Batch, now: Instant) -> Vec<Batch> {
        if batch.is_empty() {
            return Vec::new();
        }

        let expired = self.deadline().is_some_and(|deadline| deadline <= now);
        // Pipelines carry one signal type, but a mismatch must never drop data
        let mismatched = self
            .buffer
            .as_ref()
            .is_some_and(|buffered| buffered.signal_type() != batch.signal_type());
        let mut ready = if expired || mismatched {
            self.flush()
        } else {
            Vec::new()
        };

        match &mut self.buffer {
            Some(buffered) => {
                let appended = buffered.append(batch);
                debug_assert!(appended.is_ok(), "buffer of another signal left unflushed: {appended:?}");
            }
            None => {
                self.buffer = Some(batch);
                self.first_item_at = Some(now);
            }
        }

        ready.extend(self.take_full());
        ready
    }

    /// Flushes everything buffered, in order.
    pub fn flush(&mut self) -> Vec<Batch> {
        self.first_item_at = None;
        let Some(mut buffered) = self.buffer.take() else {
            return Vec::new();
        };

        let mut out = Vec::new();
        if let Some(max) = self.send_batch_max_size {
            while buffered.len() > max {
                let rest = buffered.split_off(max);
                out.push(std::mem::replace(&mut buffered, rest));
            }
        }
        out.push(buffered);
        out
    }

    fn take_full(&mut self) -> Vec<Batch> {
        let threshold = self.send_batch_size;
        let max = self.send_batch_max_size;
        let mut out = Vec::new();

        while let Some(buffered) = self.buffer.as_mut().filter(|b| b.len() >= threshold) {
            let chunk = max.map_or(buffered.len(), |max| max.min(buffered.len()));
            let rest = buffered.split_off(chunk);
            out.push(std::mem::replace(buffered, rest));
        }

        if self.buffer.as_ref().is_some_and(Batch::is_empty) {
            self.buffer = None;
            self.first_item_at = None;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{InstrumentationScope, LogRecord, Resource, SignalItem, Span, SpanId, TraceId};
    use std::sync::Arc;

    fn config(size: usize, max: usize) -> BatchConfig {
        BatchConfig {
            send_batch_size: size,
            timeout: Duration::from_millis(200),
            send_batch_max_size: max,
        }
    }

    fn logs(resource: &Arc<Resource>, range: std::ops::Range<i64>) -> Batch {
        let scope = Arc::new(InstrumentationScope::default());
        range
            .map(|i| {
                LogRecord::new(Arc::clone(resource), Arc::clone(&scope), "line").with_attribute("seq", i)
            })
            .collect::<Vec<_>>()
            .into()
    }

    fn seqs(batches: &[Batch]) -> Vec<i64> {
        batches
            .iter()
            .flat_map(|b| match b {
                Batch::Logs(records) => records
                    .iter()
                    .map(|r| match r.attributes()["seq"] {
                        shared::models::AttributeValue::Int(i) => i,
                        _ => unreachable!(),
                    })
                    .collect::<Vec<_>>(),
                _ => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn test_flushes_exactly_at_threshold() {
        let resource = Arc::new(Resource::new());
        let mut batcher = Batcher::new(&config(10, 0));
        let now = Instant::now();

        assert!(batcher.push(logs(&resource, 0..9), now).is_empty());
        assert_eq!(batcher.len(), 9);
        assert_eq!(batcher.deadline(), Some(now + Duration::from_millis(200)));

        let ready = batcher.push(logs(&resource, 9..10), now);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].len(), 10);
        assert!(batcher.is_empty());
        assert_eq!(batcher.deadline(), None);
    }

    #[test]
    fn test_oversize_push_is_split_by_max_size() {
        let resource = Arc::new(Resource::new());
        let mut batcher = Batcher::new(&config(4, 4));
        let now = Instant::now();

        let ready = batcher.push(logs(&resource, 0..11), now);
        assert_eq!(ready.iter().map(Batch::len).collect::<Vec<_>>(), vec![4, 4]);
        assert_eq!(batcher.len(), 3);
        assert_eq!(batcher.deadline(), Some(now + Duration::from_millis(200)));

        let flushed = batcher.flush();
        let mut all = ready;
        all.extend(flushed);
        assert_eq!(seqs(&all), (0..11).collect::<Vec<_>>());
    }

    #[test]
    fn test_flush_preserves_order_across_resources() {
        let a = Arc::new(Resource::new().with_attribute("service.name", "a"));
        let b = Arc::new(Resource::new().with_attribute("service.name", "b"));
        let mut batcher = Batcher::new(&config(100, 3));
        let now = Instant::now();

        batcher.push(logs(&a, 0..2), now);
        batcher.push(logs(&b, 2..4), now);
        batcher.push(logs(&a, 4..5), now);

        let flushed = batcher.flush();
        assert_eq!(flushed.iter().map(Batch::len).collect::<Vec<_>>(), vec![3, 2]);
        assert_eq!(seqs(&flushed), vec![0, 1, 2, 3, 4]);

        let Batch::Logs(records) = &flushed[0] else { unreachable!() };
        assert_eq!(records[2].resource.service_name(), Some("b"));
        assert!(batcher.flush().is_empty());
    }

    #[test]
    fn test_signal_change_flushes_previous_buffer() {
        let resource = Arc::new(Resource::new());
        let scope = Arc::new(InstrumentationScope::default());
        let mut batcher = Batcher::new(&config(100, 0));
        let now = Instant::now();

        batcher.push(logs(&resource, 0..3), now);
        let span = Span::new(resource, scope, TraceId([1; 16]), SpanId([1; 8]), "op");
        let ready = batcher.push(Batch::from(vec![span]), now);

        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].len(), 3);
        assert_eq!(batcher.len(), 1);
    }

    #[test]
    fn test_expired_buffer_is_flushed_on_next_push() {
        let resource = Arc::new(Resource::new());
        let mut batcher = Batcher::new(&config(100, 0));
        let start = Instant::now();

        assert!(batcher.push(logs(&resource, 0..2), start).is_empty());
        assert!(batcher
            .push(logs(&resource, 2..3), start + Duration::from_millis(199))
            .is_empty());

        let later = start + Duration::from_millis(250);
        let ready = batcher.push(logs(&resource, 3..5), later);
        assert_eq!(seqs(&ready), vec![0, 1, 2]);
        assert_eq!(batcher.len(), 2);
        assert_eq!(batcher.deadline(), Some(later + Duration::from_millis(200)));
    }

    #[test]
    fn test_empty_push_does_not_start_timer() {
        let mut batcher = Batcher::new(&config(10, 0));
        assert!(batcher.push(Batch::Logs(Vec::new()), Instant::now()).is_empty());
        assert_eq!(batcher.deadline(), None);
    }
}
