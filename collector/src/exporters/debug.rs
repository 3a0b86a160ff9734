//! Debug exporter: writes batches to the collector's own log.

use super::{ExportResult, Exporter};
use async_trait::async_trait;
use shared::config::{ComponentId, Verbosity};
use shared::models::{Batch, SignalItem};
use shared::otlp::{encode_batch, Encoding};
use tracing::info;

/// Logs every batch it receives and always succeeds.
#[derive(Debug, Clone)]
pub struct DebugExporter {
    id: ComponentId,
    verbosity: Verbosity,
}

impl DebugExporter {
    /// Creates the exporter.
    #[must_use]
    pub fn new(id: ComponentId, verbosity: Verbosity) -> Self {
        Self { id, verbosity }
    }

    fn log_items(&self, batch: &Batch) {
        match batch {
            Batch::Traces(spans) => {
                for span in spans {
                    info!(
                        exporter = %self.id,
                        trace_id = %span.trace_id,
                        span_id = %span.span_id,
                        name = %span.name,
                        kind = %span.kind,
                        duration_ms = span.duration().num_milliseconds(),
                        service = span.resource.service_name().unwrap_or_default(),
                        "span"
                    );
                }
            }
            Batch::Metrics(points) => {
                for point in points {
                    info!(
                        exporter = %self.id,
                        name = %point.name,
                        value = ?point.value,
                        time = %point.timestamp(),
                        service = point.resource.service_name().unwrap_or_default(),
                        "metric point"
                    );
                }
            }
            Batch::Logs(records) => {
                for record in records {
                    info!(
                        exporter = %self.id,
                        severity = %record.severity(),
                        body = ?record.body,
                        time = %record.timestamp(),
                        service = record.resource.service_name().unwrap_or_default(),
                        "log record"
                    );
                }
            }
        }
    }
}

#[async_trait]
impl Exporter for DebugExporter {
    async fn export(&self, batch: &Batch) -> ExportResult {
        info!(
            exporter = %self.id,
            signal = %batch.signal_type(),
            items = batch.len(),
            resources = batch.resources().len(),
            "Batch received"
        );
        match self.verbosity {
            Verbosity::Basic => {}
            Verbosity::Normal => self.log_items(batch),
            Verbosity::Detailed => match encode_batch(batch, Encoding::Json) {
                Ok(payload) => info!(
                    exporter = %self.id,
                    payload = %String::from_utf8_lossy(&payload),
                    "Batch payload"
                ),
                Err(e) => info!(exporter = %self.id, error = %e, "Batch payload not encodable"),
            },
        }
        ExportResult::Success
    }
}
