//! Pipeline worker: drains one queue through the processor chain and the
//! exporters.

use crate::exporters::FanOut;
use crate::metrics::PipelineCounters;
use crate::processors::{Batcher, ProcessorChain};
use shared::config::PipelineId;
use shared::models::Batch;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One worker of a pipeline.
///
/// The worker never waits on a sink: flushed batches go to the per-exporter
/// queues of its [`Dispatcher`](crate::exporters::Dispatcher), and a sink that
/// falls behind drops batches from its own queue only.
pub struct Worker {
    pipeline: PipelineId,
    index: usize,
    queue: mpsc::Receiver<Batch>,
    chain: ProcessorChain,
    fanout: FanOut,
    counters: Arc<PipelineCounters>,
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("pipeline", &self.pipeline)
            .field("index", &self.index)
            .field("exporters", &self.fanout.len())
            .finish_non_exhaustive()
    }
}

impl Worker {
    pub(crate) fn new(
        pipeline: PipelineId,
        index: usize,
        queue: mpsc::Receiver<Batch>,
        chain: ProcessorChain,
        fanout: FanOut,
        counters: Arc<PipelineCounters>,
    ) -> Self {
        Self {
            pipeline,
            index,
            queue,
            chain,
            fanout,
            counters,
        }
    }

    /// Runs until the queue is closed and empty.
    ///
    /// Cancelling `shutdown` closes the queue; batches already in it are
    /// still processed, the batch buffer is flushed and the exporters settle
    /// everything handed to them before returning.
    pub async fn run(mut self, shutdown: CancellationToken) {
        debug!(pipeline = %self.pipeline, worker = self.index, "Worker started");
        let dispatcher = self
            .fanout
            .spawn(self.pipeline.clone(), Arc::clone(&self.counters));
        let mut batcher = self.chain.batcher();
        let mut draining = false;

        loop {
            let deadline = batcher.as_ref().and_then(Batcher::deadline);
            tokio::select! {
                biased;

                () = shutdown.cancelled(), if !draining => {
                    draining = true;
                    self.queue.close();
                    debug!(pipeline = %self.pipeline, worker = self.index, "Worker draining");
                }
                received = self.queue.recv() => {
                    let Some(batch) = received else { break };
                    let batch = self.chain.transform(batch);
                    let ready = match batcher.as_mut() {
                        Some(batcher) => batcher.push(batch, Instant::now()),
                        None => vec![batch],
                    };
                    for batch in ready {
                        dispatcher.dispatch(batch);
                    }
                }
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(batcher) = batcher.as_mut() {
                        for batch in batcher.flush() {
                            dispatcher.dispatch(batch);
                        }
                    }
                }
            }
        }

        if let Some(batcher) = batcher.as_mut() {
            for batch in batcher.flush() {
                dispatcher.dispatch(batch);
            }
        }
        dispatcher.close().await;
        info!(pipeline = %self.pipeline, worker = self.index, "Worker stopped");
    }
}
