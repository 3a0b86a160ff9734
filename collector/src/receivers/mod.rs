//! OTLP receivers.
//!
//! A receiver binds its HTTP and gRPC listeners, decodes requests into
//! batches and hands them to the pipelines it feeds through [`Consumers`].

use crate::grpc::{LogsServiceImpl, MetricsServiceImpl, TracesServiceImpl};
use crate::metrics::ReceiverCounters;
use crate::pipeline::{ConsumeError, PipelineHandle};
use crate::routes::otlp_routes;
use shared::config::{ComponentId, OtlpReceiverConfig};
use shared::models::SignalType;
use shared::otlp::proto::collector::logs::v1::logs_service_server::LogsServiceServer;
use shared::otlp::proto::collector::metrics::v1::metrics_service_server::MetricsServiceServer;
use shared::otlp::proto::collector::trace::v1::trace_service_server::TraceServiceServer;
use shared::otlp::{Decoded, PartialSuccess};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// A listener could not be bound.
#[derive(Debug, Error)]
#[error("cannot listen on {endpoint}: {source}")]
pub struct BindError {
    /// Configured endpoint.
    pub endpoint: String,
    /// Underlying error.
    #[source]
    pub source: std::io::Error,
}

/// The pipelines fed by one receiver, by signal.
#[derive(Clone)]
pub struct Consumers {
    receiver: ComponentId,
    by_signal: Arc<BTreeMap<SignalType, Vec<PipelineHandle>>>,
    counters: Arc<ReceiverCounters>,
}

impl std::fmt::Debug for Consumers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumers")
            .field("receiver", &self.receiver)
            .field("signals", &self.by_signal.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Consumers {
    /// Groups `pipelines` by signal.
    #[must_use]
    pub fn new(
        receiver: ComponentId,
        pipelines: Vec<PipelineHandle>,
        counters: Arc<ReceiverCounters>,
    ) -> Self {
        let mut by_signal: BTreeMap<SignalType, Vec<PipelineHandle>> = BTreeMap::new();
        for pipeline in pipelines {
            by_signal.entry(pipeline.signal()).or_default().push(pipeline);
        }
        Self {
            receiver,
            by_signal: Arc::new(by_signal),
            counters,
        }
    }

    /// Receiver ID.
    #[must_use]
    pub fn receiver(&self) -> &ComponentId {
        &self.receiver
    }

    /// Whether any pipeline carries `signal`.
    #[must_use]
    pub fn accepts(&self, signal: SignalType) -> bool {
        self.by_signal.contains_key(&signal)
    }

    /// Signals with at least one pipeline.
    pub fn signals(&self) -> impl Iterator<Item = SignalType> + '_ {
        self.by_signal.keys().copied()
    }

    /// Counts a request that could not be decoded.
    pub fn record_decode_failure(&self) {
        self.counters.record_rejected_request();
    }

    /// Hands a decoded request to every pipeline of `signal`.
    ///
    /// Returns the partial success to report to the sender when the request
    /// carried items that could not be represented.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConsumeError`] of any pipeline. Pipelines earlier
    /// in the list keep what they accepted and count it as admitted; the
    /// receiver counts the whole request as refused, since that is what the
    /// sender is told and will retry.
    pub fn consume(
        &self,
        signal: SignalType,
        decoded: Decoded,
    ) -> Result<Option<PartialSuccess>, ConsumeError> {
        let Some(pipelines) = self.by_signal.get(&signal) else {
            return Err(ConsumeError::NoPipeline(signal));
        };

        let items = decoded.item_count();
        let partial = (decoded.rejected > 0).then(|| PartialSuccess {
            rejected: i64::try_from(decoded.rejected).unwrap_or(i64::MAX),
            message: format!(
                "{} data points of unsupported metric types were dropped",
                decoded.rejected
            ),
        });
        if decoded.rejected > 0 {
            self.counters.record_rejected_items(decoded.rejected);
        }
        if items == 0 {
            return Ok(partial);
        }

        let mut batches = Some(decoded.batches);
        for (position, pipeline) in pipelines.iter().enumerate() {
            let offered = if position + 1 == pipelines.len() {
                batches.take().unwrap_or_default()
            } else {
                batches.clone().unwrap_or_default()
            };
            if let Err(e) = pipeline.submit(offered) {
                self.counters.record_refused(items);
                return Err(e);
            }
        }

        self.counters.record_accepted(items);
        debug!(receiver = %self.receiver, signal = %signal, items, "Request accepted");
        Ok(partial)
    }
}

/// A started receiver.
#[derive(Debug)]
pub struct RunningReceiver {
    /// Receiver ID.
    pub id: ComponentId,
    /// Bound OTLP/HTTP address.
    pub http_addr: Option<SocketAddr>,
    /// Bound OTLP/gRPC address.
    pub grpc_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningReceiver {
    /// Server tasks; each ends once the shutdown token fires and open
    /// requests are answered.
    pub fn into_tasks(self) -> Vec<JoinHandle<()>> {
        self.tasks
    }
}

/// The OTLP receiver.
#[derive(Debug)]
pub struct OtlpReceiver {
    id: ComponentId,
    config: OtlpReceiverConfig,
    consumers: Consumers,
}

impl OtlpReceiver {
    /// Creates the receiver.
    #[must_use]
    pub fn new(id: ComponentId, config: OtlpReceiverConfig, consumers: Consumers) -> Self {
        Self {
            id,
            config,
            consumers,
        }
    }

    /// Binds the configured listeners and starts serving.
    ///
    /// Both listeners are bound before anything is served, so a failure
    /// leaves nothing running.
    ///
    /// # Errors
    ///
    /// Returns a [`BindError`] if a listener cannot be bound.
    pub async fn start(&self, shutdown: CancellationToken) -> Result<RunningReceiver, BindError> {
        let http = match &self.config.protocols.http {
            Some(http) => Some((bind(&http.endpoint).await?, http.max_request_body_size)),
            None => None,
        };
        let grpc = match &self.config.protocols.grpc {
            Some(grpc) => Some((bind(&grpc.endpoint).await?, grpc.max_recv_msg_size_mib)),
            None => None,
        };

        let mut running = RunningReceiver {
            id: self.id.clone(),
            http_addr: None,
            grpc_addr: None,
            tasks: Vec::new(),
        };

        if let Some((listener, max_body)) = http {
            running.http_addr = listener.local_addr().ok();
            let router = otlp_routes(self.consumers.clone(), max_body);
            let token = shutdown.clone();
            let id = self.id.clone();
            running.tasks.push(tokio::spawn(async move {
                let result = axum::serve(listener, router)
                    .with_graceful_shutdown(async move { token.cancelled().await })
                    .await;
                match result {
                    Ok(()) => info!(receiver = %id, "OTLP/HTTP server stopped"),
                    Err(e) => error!(receiver = %id, error = %e, "OTLP/HTTP server error"),
                }
            }));
            info!(receiver = %self.id, addr = ?running.http_addr, "OTLP/HTTP receiver listening");
        }

        if let Some((listener, max_mib)) = grpc {
            running.grpc_addr = listener.local_addr().ok();
            let limit = max_mib.saturating_mul(1024 * 1024);
            let consumers = &self.consumers;
            let traces = consumers.accepts(SignalType::Traces).then(|| {
                TraceServiceServer::new(TracesServiceImpl::new(consumers.clone()))
                    .max_decoding_message_size(limit)
            });
            let metrics = consumers.accepts(SignalType::Metrics).then(|| {
                MetricsServiceServer::new(MetricsServiceImpl::new(consumers.clone()))
                    .max_decoding_message_size(limit)
            });
            let logs = consumers.accepts(SignalType::Logs).then(|| {
                LogsServiceServer::new(LogsServiceImpl::new(consumers.clone()))
                    .max_decoding_message_size(limit)
            });

            let token = shutdown.clone();
            let id = self.id.clone();
            running.tasks.push(tokio::spawn(async move {
                let result = tonic::transport::Server::builder()
                    .add_optional_service(traces)
                    .add_optional_service(metrics)
                    .add_optional_service(logs)
                    .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                        token.cancelled().await;
                    })
                    .await;
                match result {
                    Ok(()) => info!(receiver = %id, "OTLP/gRPC server stopped"),
                    Err(e) => error!(receiver = %id, error = %e, "OTLP/gRPC server error"),
                }
            }));
            info!(receiver = %self.id, addr = ?running.grpc_addr, "OTLP/gRPC receiver listening");
        }

        Ok(running)
    }
}

async fn bind(endpoint: &str) -> Result<TcpListener, BindError> {
    TcpListener::bind(endpoint).await.map_err(|source| BindError {
        endpoint: endpoint.to_string(),
        source,
    })
}
