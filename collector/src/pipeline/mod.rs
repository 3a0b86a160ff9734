//! Pipeline runtime: bounded queues and the worker pool behind them.
//!
//! A pipeline owns `num_workers` workers. Each worker has its own bounded
//! queue, its own [`Batcher`](crate::processors::Batcher) and its own
//! sending queue per exporter. Batches are routed to a worker by resource
//! fingerprint, so all data of one resource passes through one FIFO queue
//! and reaches every exporter in ingestion order.
//!
//! Receivers talk to a pipeline through a cloneable [`PipelineHandle`].

pub mod worker;

pub use worker::Worker;

use crate::exporters::FanOut;
use crate::metrics::PipelineCounters;
use crate::processors::{AdmissionRefused, MemoryLimiter, ProcessorChain};
use shared::config::{PipelineConfig, PipelineId};
use shared::models::{Batch, BatchError, SignalType};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

/// Why a pipeline did not take a batch. Every variant is retryable for the
/// sender.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsumeError {
    /// The memory limiter refused the data.
    #[error(transparent)]
    AdmissionRefused(#[from] AdmissionRefused),

    /// The worker queue is full.
    #[error("pipeline {pipeline} queue is full")]
    QueueFull {
        /// Pipeline ID.
        pipeline: String,
    },

    /// The pipeline no longer accepts data.
    #[error("pipeline {pipeline} is shutting down")]
    Stopped {
        /// Pipeline ID.
        pipeline: String,
    },

    /// A batch of the wrong signal type was offered.
    #[error(transparent)]
    SignalMismatch(#[from] BatchError),

    /// No pipeline carries the signal.
    #[error("no pipeline accepts {0}")]
    NoPipeline(SignalType),
}

struct Shared {
    id: PipelineId,
    limiter: Option<Arc<MemoryLimiter>>,
    queues: Vec<mpsc::Sender<Batch>>,
    counters: Arc<PipelineCounters>,
    accepting: AtomicBool,
}

/// Entry point of a running pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("id", &self.shared.id)
            .field("workers", &self.shared.queues.len())
            .field("accepting", &self.is_accepting())
            .finish()
    }
}

impl PipelineHandle {
    /// Pipeline ID.
    #[must_use]
    pub fn id(&self) -> &PipelineId {
        &self.shared.id
    }

    /// Signal type carried by the pipeline.
    #[must_use]
    pub fn signal(&self) -> SignalType {
        self.shared.id.signal()
    }

    /// Counters of the pipeline.
    #[must_use]
    pub fn counters(&self) -> &Arc<PipelineCounters> {
        &self.shared.counters
    }

    /// Whether the pipeline takes new data.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
    }

    /// Stops taking new data. Already queued batches are still processed.
    pub fn close(&self) {
        if self.shared.accepting.swap(false, Ordering::AcqRel) {
            debug!(pipeline = %self.shared.id, "Pipeline closed for new data");
        }
    }

    /// Offers decoded batches to the pipeline.
    ///
    /// The memory limiter is checked once for the whole request, then every
    /// batch is enqueued without waiting. When a queue is full, batches
    /// enqueued before it stay enqueued and are counted as admitted, so a
    /// retrying sender may deliver them twice. Only the rest is counted as
    /// refused.
    ///
    /// # Errors
    ///
    /// Returns a [`ConsumeError`] if the pipeline is closed, the memory
    /// limiter refuses the data or a queue is full.
    pub fn submit(&self, batches: Vec<Batch>) -> Result<(), ConsumeError> {
        let shared = &self.shared;
        let total: usize = batches.iter().map(Batch::len).sum();

        let mut enqueued = 0;
        let result = self.admit(batches, &mut enqueued);
        if let Err(ref e) = result {
            let refused = total - enqueued;
            shared.counters.record_refused(refused);
            debug!(
                pipeline = %shared.id,
                items = refused,
                enqueued,
                error = %e,
                "Data refused"
            );
        }
        result
    }

    /// Enqueues `batches`, adding the items that made it to `enqueued`.
    fn admit(&self, batches: Vec<Batch>, enqueued: &mut usize) -> Result<(), ConsumeError> {
        let shared = &self.shared;
        if !self.is_accepting() {
            return Err(ConsumeError::Stopped {
                pipeline: shared.id.to_string(),
            });
        }
        if let Some(found) = batches
            .iter()
            .map(Batch::signal_type)
            .find(|signal| *signal != shared.id.signal())
        {
            return Err(BatchError::SignalMismatch {
                expected: shared.id.signal(),
                found,
            }
            .into());
        }
        if let Some(limiter) = &shared.limiter {
            limiter.check()?;
        }

        for batch in batches.into_iter().filter(|b| !b.is_empty()) {
            let items = batch.len();
            let queue = &shared.queues[self.route(&batch)];
            match queue.try_send(batch) {
                Ok(()) => {
                    shared.counters.record_admitted(items);
                    *enqueued += items;
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    return Err(ConsumeError::QueueFull {
                        pipeline: shared.id.to_string(),
                    })
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    return Err(ConsumeError::Stopped {
                        pipeline: shared.id.to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    fn route(&self, batch: &Batch) -> usize {
        let workers = self.shared.queues.len();
        if workers <= 1 {
            return 0;
        }
        let fingerprint = batch.first_resource().map_or(0, |r| r.fingerprint());
        // usize fits in u64 on every supported target
        #[allow(clippy::cast_possible_truncation)]
        let index = (fingerprint % workers as u64) as usize;
        index
    }
}

/// Builds a pipeline: its handle and its not yet spawned workers.
///
/// The total `queue_size` is split evenly across workers, with at least one
/// slot per worker.
#[must_use]
pub fn build(
    id: PipelineId,
    config: &PipelineConfig,
    chain: &ProcessorChain,
    fanout: &FanOut,
    counters: Arc<PipelineCounters>,
) -> (PipelineHandle, Vec<Worker>) {
    let workers = config.num_workers.max(1);
    let per_worker = (config.queue_size / workers).max(1);

    let mut queues = Vec::with_capacity(workers);
    let mut pool = Vec::with_capacity(workers);
    for index in 0..workers {
        let (tx, rx) = mpsc::channel(per_worker);
        queues.push(tx);
        pool.push(Worker::new(
            id.clone(),
            index,
            rx,
            chain.clone(),
            fanout.clone(),
            Arc::clone(&counters),
        ));
    }

    let handle = PipelineHandle {
        shared: Arc::new(Shared {
            id,
            limiter: chain.limiter.clone(),
            queues,
            counters,
            accepting: AtomicBool::new(true),
        }),
    };
    (handle, pool)
}
