//! Exporters deliver finalized batches to sinks.
//!
//! An [`Exporter`] performs single delivery attempts. Retries, per-attempt
//! timeouts and loss accounting are layered on top by [`RetryingExporter`].
//! A pipeline worker hands each batch to all of its exporters through the
//! per-exporter queues of a [`Dispatcher`].

pub mod debug;
pub mod fanout;
pub mod otlphttp;
pub mod retry;

pub use debug::DebugExporter;
pub use fanout::{Dispatcher, FanOut};
pub use otlphttp::OtlpHttpExporter;
pub use retry::{AttemptState, Delivery, RetryPolicy, RetryingExporter, DEFAULT_QUEUE_SIZE};

use async_trait::async_trait;
use shared::config::{ComponentId, ExporterConfig};
use shared::models::{Batch, SignalType};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Outcome of one export attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportResult {
    /// The sink acknowledged the batch.
    Success,
    /// A transient failure; the attempt may be repeated.
    RetryableFailure {
        /// What went wrong.
        reason: String,
        /// Delay requested by the sink, if any.
        retry_after: Option<Duration>,
    },
    /// A failure that repeating the attempt cannot fix.
    PermanentFailure {
        /// What went wrong.
        reason: String,
    },
}

impl ExportResult {
    /// A retryable failure without a requested delay.
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self::RetryableFailure {
            reason: reason.into(),
            retry_after: None,
        }
    }

    /// A permanent failure.
    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::PermanentFailure {
            reason: reason.into(),
        }
    }

    /// Whether the attempt succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Errors while creating or starting an exporter.
#[derive(Debug, Error)]
pub enum ExporterError {
    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    /// The settings cannot be used.
    #[error("invalid settings: {0}")]
    Config(String),

    /// A pipeline of a signal the exporter cannot send uses it.
    #[error("exporter {exporter} has no endpoint for {signal}")]
    UnsupportedSignal {
        /// Exporter ID.
        exporter: String,
        /// The signal.
        signal: SignalType,
    },
}

/// A sink for batches.
#[async_trait]
pub trait Exporter: Send + Sync {
    /// Whether the exporter can deliver batches of `signal`.
    fn supports(&self, _signal: SignalType) -> bool {
        true
    }

    /// Prepares the exporter. A failure aborts collector startup.
    async fn start(&self) -> Result<(), ExporterError> {
        Ok(())
    }

    /// Makes one delivery attempt.
    async fn export(&self, batch: &Batch) -> ExportResult;

    /// Releases resources. Called once after the last export.
    async fn shutdown(&self) {}
}

/// Creates the exporter described by `config`.
///
/// # Errors
///
/// Returns an [`ExporterError`] if the settings cannot be turned into a
/// working exporter.
pub fn build(id: &ComponentId, config: &ExporterConfig) -> Result<Arc<dyn Exporter>, ExporterError> {
    match config {
        ExporterConfig::OtlpHttp(config) => Ok(Arc::new(OtlpHttpExporter::new(id.clone(), config)?)),
        ExporterConfig::Debug(config) => Ok(Arc::new(DebugExporter::new(id.clone(), config.verbosity))),
    }
}
