//! Processor chain.
//!
//! A pipeline's processor list is split by role when the pipeline is built:
//!
//! - `memory_limiter` gates admission in front of the queue
//! - transforming processors such as `resource` run on each worker, in order
//! - `batch` becomes the worker's [`Batcher`]
//!
//! Configuration validation guarantees the limiter comes first and `batch`
//! last, so the split keeps the configured order.

pub mod batch;
pub mod memory_limiter;
pub mod resource;

pub use batch::Batcher;
pub use memory_limiter::{AdmissionRefused, LimiterState, MemoryLimiter, MemoryLimits};
pub use resource::ResourceProcessor;

use shared::config::{BatchConfig, ComponentId, ProcessorConfig};
use shared::models::Batch;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// A processor that transforms batches in place of their owner.
pub trait BatchProcessor: Send + Sync {
    /// Processes one batch.
    fn process(&self, batch: Batch) -> Batch;
}

/// Errors while assembling a processor chain.
#[derive(Debug, Error)]
pub enum ProcessorError {
    /// The pipeline references an undefined processor.
    #[error("processor {0} is not defined")]
    Undefined(ComponentId),

    /// No limiter instance was created for a referenced memory limiter.
    #[error("memory limiter {0} was not initialized")]
    LimiterMissing(ComponentId),
}

/// The processors of one pipeline, grouped by role.
#[derive(Clone, Default)]
pub struct ProcessorChain {
    /// Admission gate.
    pub limiter: Option<Arc<MemoryLimiter>>,
    /// Transforming processors, in order.
    pub transforms: Vec<Arc<dyn BatchProcessor>>,
    /// Settings of the worker batchers.
    pub batch: Option<BatchConfig>,
}

impl std::fmt::Debug for ProcessorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessorChain")
            .field("limiter", &self.limiter.as_ref().map(|l| l.id().to_string()))
            .field("transforms", &self.transforms.len())
            .field("batch", &self.batch)
            .finish()
    }
}

impl ProcessorChain {
    /// Builds the chain for the processor IDs of one pipeline.
    ///
    /// # Errors
    ///
    /// Returns a [`ProcessorError`] if an ID is undefined or its limiter
    /// instance is missing.
    pub fn build(
        ids: &[ComponentId],
        configs: &BTreeMap<ComponentId, ProcessorConfig>,
        limiters: &BTreeMap<ComponentId, Arc<MemoryLimiter>>,
    ) -> Result<Self, ProcessorError> {
        let mut chain = Self::default();
        for id in ids {
            match configs.get(id) {
                Some(ProcessorConfig::MemoryLimiter(_)) => {
                    let limiter = limiters
                        .get(id)
                        .ok_or_else(|| ProcessorError::LimiterMissing(id.clone()))?;
                    chain.limiter = Some(Arc::clone(limiter));
                }
                Some(ProcessorConfig::Resource(config)) => {
                    chain.transforms.push(Arc::new(ResourceProcessor::new(config)));
                }
                Some(ProcessorConfig::Batch(config)) => chain.batch = Some(config.clone()),
                None => return Err(ProcessorError::Undefined(id.clone())),
            }
        }
        Ok(chain)
    }

    /// Runs the transforming processors over `batch`.
    #[must_use]
    pub fn transform(&self, batch: Batch) -> Batch {
        self.transforms
            .iter()
            .fold(batch, |batch, processor| processor.process(batch))
    }

    /// A batcher for one worker, if the chain batches.
    #[must_use]
    pub fn batcher(&self) -> Option<Batcher> {
        self.batch.as_ref().map(Batcher::new)
    }
}
