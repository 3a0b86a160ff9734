//! Atomic counters for receivers, pipelines and exporters.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

fn to_u64(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

fn add(counter: &AtomicU64, n: usize) {
    counter.fetch_add(to_u64(n), Ordering::Relaxed);
}

fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

/// Counters of one receiver.
#[derive(Debug, Default)]
pub struct ReceiverCounters {
    accepted_items: AtomicU64,
    refused_items: AtomicU64,
    rejected_items: AtomicU64,
    rejected_requests: AtomicU64,
}

impl ReceiverCounters {
    /// Items handed to every pipeline the receiver feeds.
    pub fn record_accepted(&self, items: usize) {
        add(&self.accepted_items, items);
    }

    /// Items a pipeline refused because of backpressure.
    pub fn record_refused(&self, items: usize) {
        add(&self.refused_items, items);
    }

    /// Items dropped during decoding and reported as partial success.
    pub fn record_rejected_items(&self, items: usize) {
        add(&self.rejected_items, items);
    }

    /// Requests that failed to decode.
    pub fn record_rejected_request(&self) {
        self.rejected_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Current values.
    #[must_use]
    pub fn snapshot(&self) -> ReceiverSnapshot {
        ReceiverSnapshot {
            accepted_items: load(&self.accepted_items),
            refused_items: load(&self.refused_items),
            rejected_items: load(&self.rejected_items),
            rejected_requests: load(&self.rejected_requests),
        }
    }
}

/// Counters of one pipeline.
#[derive(Debug, Default)]
pub struct PipelineCounters {
    admitted_items: AtomicU64,
    refused_items: AtomicU64,
    in_flight_items: AtomicU64,
    lost_items: AtomicU64,
}

impl PipelineCounters {
    /// Items enqueued; they stay in flight until [`Self::record_settled`].
    pub fn record_admitted(&self, items: usize) {
        add(&self.admitted_items, items);
        add(&self.in_flight_items, items);
    }

    /// Items the pipeline refused at admission or enqueue.
    pub fn record_refused(&self, items: usize) {
        add(&self.refused_items, items);
    }

    /// Items whose export fan-out finished, successfully or not.
    pub fn record_settled(&self, items: usize) {
        let items = to_u64(items);
        // Saturate so a stray double settle cannot wrap the gauge.
        let _ = self
            .in_flight_items
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(items))
            });
    }

    /// Counts everything still in flight as lost and resets the gauge.
    ///
    /// Returns the number of items written off.
    pub fn write_off_in_flight(&self) -> u64 {
        let lost = self.in_flight_items.swap(0, Ordering::Relaxed);
        self.lost_items.fetch_add(lost, Ordering::Relaxed);
        lost
    }

    /// Items currently between enqueue and the end of export.
    #[must_use]
    pub fn in_flight(&self) -> u64 {
        load(&self.in_flight_items)
    }

    /// Current values.
    #[must_use]
    pub fn snapshot(&self) -> PipelineSnapshot {
        PipelineSnapshot {
            admitted_items: load(&self.admitted_items),
            refused_items: load(&self.refused_items),
            in_flight_items: load(&self.in_flight_items),
            lost_items: load(&self.lost_items),
        }
    }
}

/// Counters of one exporter, shared by every pipeline using it.
#[derive(Debug, Default)]
pub struct ExporterCounters {
    sent_items: AtomicU64,
    failed_attempts: AtomicU64,
    retries: AtomicU64,
    lost_items: AtomicU64,
}

impl ExporterCounters {
    /// Items acknowledged by the sink.
    pub fn record_sent(&self, items: usize) {
        add(&self.sent_items, items);
    }

    /// One attempt that did not succeed.
    pub fn record_failed_attempt(&self) {
        self.failed_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// One retry started.
    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// Items dropped after a permanent failure or an exhausted retry budget.
    pub fn record_lost(&self, items: usize) {
        add(&self.lost_items, items);
    }

    /// Current values.
    #[must_use]
    pub fn snapshot(&self) -> ExporterSnapshot {
        ExporterSnapshot {
            sent_items: load(&self.sent_items),
            failed_attempts: load(&self.failed_attempts),
            retries: load(&self.retries),
            lost_items: load(&self.lost_items),
        }
    }
}

/// Point-in-time values of a receiver's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverSnapshot {
    /// Items accepted into pipelines.
    pub accepted_items: u64,
    /// Items refused because of backpressure.
    pub refused_items: u64,
    /// Items dropped during decoding.
    pub rejected_items: u64,
    /// Requests that failed to decode.
    pub rejected_requests: u64,
}

/// Point-in-time values of a pipeline's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSnapshot {
    /// Items enqueued.
    pub admitted_items: u64,
    /// Items refused at admission or enqueue.
    pub refused_items: u64,
    /// Items enqueued but not yet settled.
    pub in_flight_items: u64,
    /// Items written off at drain timeout.
    pub lost_items: u64,
}

/// Point-in-time values of an exporter's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExporterSnapshot {
    /// Items acknowledged by the sink.
    pub sent_items: u64,
    /// Attempts that did not succeed.
    pub failed_attempts: u64,
    /// Retries started.
    pub retries: u64,
    /// Items dropped.
    pub lost_items: u64,
}

/// Snapshot of every registered counter, keyed by component or pipeline ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Receiver counters.
    pub receivers: BTreeMap<String, ReceiverSnapshot>,
    /// Pipeline counters.
    pub pipelines: BTreeMap<String, PipelineSnapshot>,
    /// Exporter counters.
    pub exporters: BTreeMap<String, ExporterSnapshot>,
}

type Registry<T> = Mutex<BTreeMap<String, Arc<T>>>;

fn register<T: Default>(registry: &Registry<T>, id: &str) -> Arc<T> {
    let mut entries = registry.lock().unwrap_or_else(PoisonError::into_inner);
    Arc::clone(entries.entry(id.to_string()).or_default())
}

fn snapshot_all<T, S>(registry: &Registry<T>, f: impl Fn(&T) -> S) -> BTreeMap<String, S> {
    registry
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .map(|(id, counters)| (id.clone(), f(counters)))
        .collect()
}

/// Process-wide collector counters.
///
/// Components register once at startup and keep the returned `Arc`, so the
/// hot path only touches atomics. The registry lock is taken again only to
/// build a [`MetricsSnapshot`].
///
/// # Example
///
/// ```
/// use collector::metrics::CollectorMetrics;
///
/// let metrics = CollectorMetrics::new();
/// metrics.exporter("debug").record_sent(3);
///
/// let snapshot = metrics.snapshot();
/// assert_eq!(snapshot.exporters["debug"].sent_items, 3);
/// ```
#[derive(Debug, Default)]
pub struct CollectorMetrics {
    receivers: Registry<ReceiverCounters>,
    pipelines: Registry<PipelineCounters>,
    exporters: Registry<ExporterCounters>,
}

impl CollectorMetrics {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters for receiver `id`, registering them on first use.
    pub fn receiver(&self, id: &str) -> Arc<ReceiverCounters> {
        register(&self.receivers, id)
    }

    /// Counters for pipeline `id`, registering them on first use.
    pub fn pipeline(&self, id: &str) -> Arc<PipelineCounters> {
        register(&self.pipelines, id)
    }

    /// Counters for exporter `id`, registering them on first use.
    pub fn exporter(&self, id: &str) -> Arc<ExporterCounters> {
        register(&self.exporters, id)
    }

    /// Current values of every registered counter.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            receivers: snapshot_all(&self.receivers, ReceiverCounters::snapshot),
            pipelines: snapshot_all(&self.pipelines, PipelineCounters::snapshot),
            exporters: snapshot_all(&self.exporters, ExporterCounters::snapshot),
        }
    }
}
