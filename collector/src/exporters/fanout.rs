//! Delivery of a batch to every exporter of a pipeline.
//!
//! Each pipeline worker owns a [`Dispatcher`] with one bounded queue and one
//! sender task per exporter. The worker hands every batch to all queues
//! without waiting, so an exporter that is retrying holds back only its own
//! queue. A batch is settled in the pipeline counters once the last exporter
//! is done with it.

use super::retry::RetryingExporter;
use crate::metrics::PipelineCounters;
use shared::config::PipelineId;
use shared::models::Batch;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

/// The exporters of one pipeline.
#[derive(Debug, Clone)]
pub struct FanOut {
    exporters: Vec<Arc<RetryingExporter>>,
}

impl FanOut {
    /// Creates a fan-out over `exporters`.
    #[must_use]
    pub fn new(exporters: Vec<Arc<RetryingExporter>>) -> Self {
        Self { exporters }
    }

    /// Number of exporters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exporters.len()
    }

    /// Whether there are no exporters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exporters.is_empty()
    }

    /// Spawns the sender tasks of one worker of `pipeline`.
    ///
    /// The tasks belong to the returned dispatcher; dropping it aborts them.
    #[must_use]
    pub fn spawn(&self, pipeline: PipelineId, counters: Arc<PipelineCounters>) -> Dispatcher {
        let mut tasks = JoinSet::new();
        let senders = self
            .exporters
            .iter()
            .map(|exporter| {
                let (tx, rx) = mpsc::channel(exporter.queue_size());
                tasks.spawn(send_loop(Arc::clone(exporter), rx));
                (Arc::clone(exporter), tx)
            })
            .collect();
        Dispatcher {
            pipeline,
            counters,
            senders,
            tasks,
        }
    }
}

/// A batch waiting in one exporter queue.
struct Job {
    batch: Arc<Batch>,
    settlement: Arc<Settlement>,
}

/// Exporters that still hold one batch.
struct Settlement {
    pipeline: PipelineId,
    counters: Arc<PipelineCounters>,
    items: usize,
    pending: AtomicUsize,
    lost: AtomicUsize,
}

impl Settlement {
    fn finish(&self, delivered: bool) {
        if !delivered {
            self.lost.fetch_add(1, Ordering::AcqRel);
        }
        if self.pending.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        self.counters.record_settled(self.items);
        let lost = self.lost.load(Ordering::Acquire);
        if lost > 0 {
            warn!(
                pipeline = %self.pipeline,
                items = self.items,
                lost_exporters = lost,
                "Batch not delivered to every exporter"
            );
        }
    }
}

/// One worker's queues into the exporters of its pipeline.
pub struct Dispatcher {
    pipeline: PipelineId,
    counters: Arc<PipelineCounters>,
    senders: Vec<(Arc<RetryingExporter>, mpsc::Sender<Job>)>,
    tasks: JoinSet<()>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pipeline", &self.pipeline)
            .field("exporters", &self.senders.len())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Hands `batch` to every exporter queue without waiting.
    ///
    /// An exporter whose queue is full loses the batch and counts it; the
    /// other exporters still receive it.
    pub fn dispatch(&self, batch: Batch) {
        let items = batch.len();
        if items == 0 {
            return;
        }
        if self.senders.is_empty() {
            self.counters.record_settled(items);
            return;
        }

        let batch = Arc::new(batch);
        let settlement = Arc::new(Settlement {
            pipeline: self.pipeline.clone(),
            counters: Arc::clone(&self.counters),
            items,
            pending: AtomicUsize::new(self.senders.len()),
            lost: AtomicUsize::new(0),
        });
        for (exporter, queue) in &self.senders {
            let job = Job {
                batch: Arc::clone(&batch),
                settlement: Arc::clone(&settlement),
            };
            let reason = match queue.try_send(job) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "sending queue is full",
                Err(mpsc::error::TrySendError::Closed(_)) => "exporter stopped",
            };
            exporter.counters().record_lost(items);
            error!(
                exporter = %exporter.id(),
                pipeline = %self.pipeline,
                signal = %batch.signal_type(),
                items,
                reason,
                "Dropping batch"
            );
            settlement.finish(false);
        }
    }

    /// Closes the queues and waits until every exporter has settled what it
    /// holds.
    pub async fn close(mut self) {
        self.senders.clear();
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(e) = joined {
                warn!(pipeline = %self.pipeline, error = %e, "Exporter sender failed");
            }
        }
    }
}

async fn send_loop(exporter: Arc<RetryingExporter>, mut queue: mpsc::Receiver<Job>) {
    while let Some(job) = queue.recv().await {
        let delivery = exporter.deliver(&job.batch).await;
        job.settlement.finish(delivery.is_delivered());
    }
    debug!(exporter = %exporter.id(), "Exporter sender stopped");
}
