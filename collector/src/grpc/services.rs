//! gRPC service implementations for the OTLP receiver.

use crate::pipeline::ConsumeError;
use crate::receivers::Consumers;
use shared::models::SignalType;
use shared::otlp::conversions::{decode_logs, decode_metrics, decode_traces};
use shared::otlp::proto::collector::logs::v1::{
    logs_service_server::LogsService, ExportLogsPartialSuccess, ExportLogsServiceRequest,
    ExportLogsServiceResponse,
};
use shared::otlp::proto::collector::metrics::v1::{
    metrics_service_server::MetricsService, ExportMetricsPartialSuccess,
    ExportMetricsServiceRequest, ExportMetricsServiceResponse,
};
use shared::otlp::proto::collector::trace::v1::{
    trace_service_server::TraceService, ExportTracePartialSuccess, ExportTraceServiceRequest,
    ExportTraceServiceResponse,
};
use shared::otlp::{DecodeError, Decoded, PartialSuccess};
use tonic::{Request, Response, Status};

/// Hands a decoded request to the pipelines and maps failures to gRPC
/// status codes.
fn ingest(
    consumers: &Consumers,
    signal: SignalType,
    decoded: Result<Decoded, DecodeError>,
) -> Result<Option<PartialSuccess>, Status> {
    let decoded = decoded.map_err(|e| {
        consumers.record_decode_failure();
        tracing::warn!(receiver = %consumers.receiver(), signal = %signal, error = %e, "Rejected OTLP/gRPC request");
        Status::invalid_argument(e.to_string())
    })?;

    consumers.consume(signal, decoded).map_err(|e| match e {
        ConsumeError::NoPipeline(_) => Status::unimplemented(e.to_string()),
        _ => Status::unavailable(e.to_string()),
    })
}

/// Implementation of the OTLP `TraceService`.
#[derive(Debug, Clone)]
pub struct TracesServiceImpl {
    consumers: Consumers,
}

impl TracesServiceImpl {
    /// Creates the service.
    #[must_use]
    pub fn new(consumers: Consumers) -> Self {
        Self { consumers }
    }
}

#[tonic::async_trait]
impl TraceService for TracesServiceImpl {
    async fn export(
        &self,
        request: Request<ExportTraceServiceRequest>,
    ) -> Result<Response<ExportTraceServiceResponse>, Status> {
        let decoded = decode_traces(&request.into_inner());
        let partial = ingest(&self.consumers, SignalType::Traces, decoded)?;
        Ok(Response::new(ExportTraceServiceResponse {
            partial_success: partial.map(|p| ExportTracePartialSuccess {
                rejected_spans: p.rejected,
                error_message: p.message,
            }),
        }))
    }
}

/// Implementation of the OTLP `MetricsService`.
#[derive(Debug, Clone)]
pub struct MetricsServiceImpl {
    consumers: Consumers,
}

impl MetricsServiceImpl {
    /// Creates the service.
    #[must_use]
    pub fn new(consumers: Consumers) -> Self {
        Self { consumers }
    }
}

#[tonic::async_trait]
impl MetricsService for MetricsServiceImpl {
    async fn export(
        &self,
        request: Request<ExportMetricsServiceRequest>,
    ) -> Result<Response<ExportMetricsServiceResponse>, Status> {
        let decoded = decode_metrics(&request.into_inner());
        let partial = ingest(&self.consumers, SignalType::Metrics, decoded)?;
        Ok(Response::new(ExportMetricsServiceResponse {
            partial_success: partial.map(|p| ExportMetricsPartialSuccess {
                rejected_data_points: p.rejected,
                error_message: p.message,
            }),
        }))
    }
}

/// Implementation of the OTLP `LogsService`.
#[derive(Debug, Clone)]
pub struct LogsServiceImpl {
    consumers: Consumers,
}

impl LogsServiceImpl {
    /// Creates the service.
    #[must_use]
    pub fn new(consumers: Consumers) -> Self {
        Self { consumers }
    }
}

#[tonic::async_trait]
impl LogsService for LogsServiceImpl {
    async fn export(
        &self,
        request: Request<ExportLogsServiceRequest>,
    ) -> Result<Response<ExportLogsServiceResponse>, Status> {
        let decoded = decode_logs(&request.into_inner());
        let partial = ingest(&self.consumers, SignalType::Logs, decoded)?;
        Ok(Response::new(ExportLogsServiceResponse {
            partial_success: partial.map(|p| ExportLogsPartialSuccess {
                rejected_log_records: p.rejected,
                error_message: p.message,
            }),
        }))
    }
}
