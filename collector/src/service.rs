//! Pipeline coordinator.
//!
//! [`Service`] turns a validated [`Config`] into running components and
//! owns their lifecycle:
//!
//! ```text
//! Unstarted --start--> Running --shutdown--> Draining --> Stopped
//! ```
//!
//! Components start downstream first (exporters, then processors and
//! workers, then receivers) and stop in the reverse order, so nothing
//! receives data that cannot be drained.

use crate::exporters::{self, Exporter, ExporterError, FanOut, RetryPolicy, RetryingExporter};
use crate::metrics::{CollectorMetrics, MemoryMonitor};
use crate::pipeline::{self, PipelineHandle};
use crate::processors::{MemoryLimiter, ProcessorChain, ProcessorError};
use crate::receivers::{BindError, Consumers, OtlpReceiver};
use crate::routes::{health_routes, HealthState};
use serde::Serialize;
use shared::config::{
    format_duration, ComponentId, Config, ConfigError, ExporterConfig, PipelineId, ProcessorConfig,
    ReceiverConfig,
};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Per-attempt timeout for exporters without their own setting.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

// Grace period for an exporter's own shutdown
const EXPORTER_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle state of the collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ServiceState {
    /// Built but not started.
    Unstarted = 0,
    /// Accepting and exporting data.
    Running = 1,
    /// Refusing new data while in-flight data is exported.
    Draining = 2,
    /// Everything released.
    Stopped = 3,
}

impl ServiceState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Unstarted,
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unstarted => "unstarted",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Shared, atomically updated [`ServiceState`].
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl Default for StateCell {
    fn default() -> Self {
        Self(AtomicU8::new(ServiceState::Unstarted as u8))
    }
}

impl StateCell {
    /// Current state.
    #[must_use]
    pub fn get(&self) -> ServiceState {
        ServiceState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: ServiceState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Errors starting or stopping the collector.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An exporter could not be created or started.
    #[error("exporter {id} failed to start: {source}")]
    ExporterInit {
        /// Exporter ID.
        id: String,
        /// Underlying error.
        #[source]
        source: ExporterError,
    },

    /// A processor chain could not be assembled.
    #[error(transparent)]
    Processor(#[from] ProcessorError),

    /// A listener could not be bound.
    #[error(transparent)]
    Bind(#[from] BindError),

    /// The operation is not allowed in the current state.
    #[error("cannot {operation} a collector that is {state}")]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// State at the time.
        state: ServiceState,
    },
}

/// Outcome of a shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Items still in flight when the drain timeout expired.
    pub lost_items: u64,
    /// Whether the drain timeout expired.
    pub drain_timed_out: bool,
}

/// Bound addresses of one receiver.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverAddrs {
    /// OTLP/HTTP listener.
    pub http: Option<SocketAddr>,
    /// OTLP/gRPC listener.
    pub grpc: Option<SocketAddr>,
}

/// Everything that exists only while the collector runs.
struct Runtime {
    pipelines: BTreeMap<PipelineId, PipelineHandle>,
    exporters: BTreeMap<ComponentId, Arc<dyn Exporter>>,
    limiters: Vec<Arc<MemoryLimiter>>,
    monitor: Arc<MemoryMonitor>,
    receiver_addrs: BTreeMap<ComponentId, ReceiverAddrs>,
    health_addr: Option<SocketAddr>,
    receiver_shutdown: CancellationToken,
    receiver_tasks: Vec<JoinHandle<()>>,
    worker_shutdown: CancellationToken,
    worker_tasks: Vec<JoinHandle<()>>,
    background_shutdown: CancellationToken,
    background_tasks: Vec<JoinHandle<()>>,
}

impl Runtime {
    fn new(monitor: Arc<MemoryMonitor>) -> Self {
        Self {
            pipelines: BTreeMap::new(),
            exporters: BTreeMap::new(),
            limiters: Vec::new(),
            monitor,
            receiver_addrs: BTreeMap::new(),
            health_addr: None,
            receiver_shutdown: CancellationToken::new(),
            receiver_tasks: Vec::new(),
            worker_shutdown: CancellationToken::new(),
            worker_tasks: Vec::new(),
            background_shutdown: CancellationToken::new(),
            background_tasks: Vec::new(),
        }
    }

    /// Stops whatever a failed start left running.
    async fn abandon(self) {
        self.receiver_shutdown.cancel();
        self.worker_shutdown.cancel();
        self.background_shutdown.cancel();
        for task in self
            .receiver_tasks
            .iter()
            .chain(&self.worker_tasks)
            .chain(&self.background_tasks)
        {
            task.abort();
        }
        shutdown_exporters(&self.exporters).await;
    }
}

/// The collector: pipelines plus their receivers, exporters and extensions.
pub struct Service {
    config: Config,
    exporter_overrides: BTreeMap<ComponentId, Arc<dyn Exporter>>,
    monitor: Option<Arc<MemoryMonitor>>,
    state: Arc<StateCell>,
    metrics: Arc<CollectorMetrics>,
    runtime: Option<Runtime>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("state", &self.state())
            .field("pipelines", &self.config.service.pipelines.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Service {
    /// Creates an unstarted collector for `config`.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            config,
            exporter_overrides: BTreeMap::new(),
            monitor: None,
            state: Arc::new(StateCell::default()),
            metrics: Arc::new(CollectorMetrics::new()),
            runtime: None,
        }
    }

    /// Uses `exporter` in place of the configured exporter `id`.
    ///
    /// The retry settings of the configured exporter still apply.
    #[must_use]
    pub fn with_exporter(mut self, id: ComponentId, exporter: Arc<dyn Exporter>) -> Self {
        self.exporter_overrides.insert(id, exporter);
        self
    }

    /// Uses `monitor` instead of sampling this process.
    #[must_use]
    pub fn with_memory_monitor(mut self, monitor: Arc<MemoryMonitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// The configuration the collector runs.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServiceState {
        self.state.get()
    }

    /// Collector counters.
    #[must_use]
    pub fn metrics(&self) -> &Arc<CollectorMetrics> {
        &self.metrics
    }

    /// Handle of a running pipeline.
    #[must_use]
    pub fn pipeline(&self, id: &PipelineId) -> Option<PipelineHandle> {
        self.runtime.as_ref()?.pipelines.get(id).cloned()
    }

    /// Memory monitor in use, once started.
    #[must_use]
    pub fn memory_monitor(&self) -> Option<Arc<MemoryMonitor>> {
        self.runtime.as_ref().map(|r| Arc::clone(&r.monitor))
    }

    /// Addresses a receiver is listening on.
    #[must_use]
    pub fn receiver_addrs(&self, id: &ComponentId) -> Option<ReceiverAddrs> {
        self.runtime.as_ref()?.receiver_addrs.get(id).copied()
    }

    /// Address of the health check endpoint, if enabled.
    #[must_use]
    pub fn health_addr(&self) -> Option<SocketAddr> {
        self.runtime.as_ref()?.health_addr
    }

    /// Starts every component.
    ///
    /// Fails fast: if any component cannot start, everything already started
    /// is stopped again and the collector stays unstarted.
    ///
    /// # Errors
    ///
    /// Returns a [`ServiceError`] if the collector is not unstarted, an
    /// exporter fails to initialize, a processor chain cannot be built or a
    /// listener cannot be bound.
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        let state = self.state();
        if state != ServiceState::Unstarted {
            return Err(ServiceError::InvalidState {
                operation: "start",
                state,
            });
        }

        let monitor = self
            .monitor
            .clone()
            .unwrap_or_else(|| Arc::new(MemoryMonitor::detect()));
        let mut runtime = Runtime::new(monitor);

        if let Err(e) = self.start_components(&mut runtime).await {
            error!(error = %e, "Collector failed to start");
            runtime.abandon().await;
            return Err(e);
        }

        self.runtime = Some(runtime);
        self.state.set(ServiceState::Running);
        info!(
            pipelines = self.config.service.pipelines.len(),
            "Collector started"
        );
        Ok(())
    }

    async fn start_components(&self, runtime: &mut Runtime) -> Result<(), ServiceError> {
        let retrying = self.start_exporters(runtime).await?;
        self.start_pipelines(runtime, &retrying)?;
        self.start_receivers(runtime).await?;
        self.start_health_check(runtime).await?;
        Ok(())
    }

    /// Creates, checks and starts every exporter used by a pipeline.
    async fn start_exporters(
        &self,
        runtime: &mut Runtime,
    ) -> Result<BTreeMap<ComponentId, Arc<RetryingExporter>>, ServiceError> {
        let mut signals_by_exporter: BTreeMap<&ComponentId, BTreeSet<_>> = BTreeMap::new();
        for (pipeline_id, pipeline) in &self.config.service.pipelines {
            for id in &pipeline.exporters {
                signals_by_exporter
                    .entry(id)
                    .or_default()
                    .insert(pipeline_id.signal());
            }
        }

        let mut retrying = BTreeMap::new();
        for (id, signals) in signals_by_exporter {
            let Some(config) = self.config.exporters.get(id) else {
                return Err(ConfigError::Validation(format!("exporter {id} is not defined")).into());
            };
            let init_error = |source| ServiceError::ExporterInit {
                id: id.to_string(),
                source,
            };

            let exporter = match self.exporter_overrides.get(id) {
                Some(exporter) => Arc::clone(exporter),
                None => exporters::build(id, config).map_err(init_error)?,
            };
            if let Some(signal) = signals.iter().find(|s| !exporter.supports(**s)) {
                return Err(init_error(ExporterError::UnsupportedSignal {
                    exporter: id.to_string(),
                    signal: *signal,
                }));
            }
            exporter.start().await.map_err(init_error)?;
            runtime.exporters.insert(id.clone(), Arc::clone(&exporter));

            let settings = delivery_settings(config);
            info!(
                exporter = %id,
                retry = settings.policy.enabled,
                attempt_timeout = %format_duration(settings.attempt_timeout),
                queue_size = settings.queue_size,
                "Exporter started"
            );
            retrying.insert(
                id.clone(),
                Arc::new(
                    RetryingExporter::new(
                        id.clone(),
                        exporter,
                        settings.policy,
                        settings.attempt_timeout,
                        self.metrics.exporter(&id.to_string()),
                    )
                    .with_queue_size(settings.queue_size),
                ),
            );
        }
        Ok(retrying)
    }

    /// Builds memory limiters and pipelines, then spawns workers and the
    /// memory sampler.
    fn start_pipelines(
        &self,
        runtime: &mut Runtime,
        retrying: &BTreeMap<ComponentId, Arc<RetryingExporter>>,
    ) -> Result<(), ServiceError> {
        let used: BTreeSet<&ComponentId> = self
            .config
            .service
            .pipelines
            .values()
            .flat_map(|p| &p.processors)
            .collect();

        let mut limiters = BTreeMap::new();
        let mut check_interval: Option<Duration> = None;
        for (id, config) in &self.config.processors {
            if let ProcessorConfig::MemoryLimiter(config) = config {
                if !used.contains(id) {
                    continue;
                }
                limiters.insert(
                    id.clone(),
                    Arc::new(MemoryLimiter::new(id.clone(), config, Arc::clone(&runtime.monitor))),
                );
                check_interval = Some(
                    check_interval.map_or(config.check_interval, |c| c.min(config.check_interval)),
                );
            }
        }

        let mut pools = Vec::new();
        for (id, config) in &self.config.service.pipelines {
            let chain = ProcessorChain::build(&config.processors, &self.config.processors, &limiters)?;
            let fanout = FanOut::new(
                config
                    .exporters
                    .iter()
                    .filter_map(|e| retrying.get(e).cloned())
                    .collect(),
            );
            let (handle, workers) = pipeline::build(
                id.clone(),
                config,
                &chain,
                &fanout,
                self.metrics.pipeline(&id.to_string()),
            );
            runtime.pipelines.insert(id.clone(), handle);
            pools.push(workers);
        }

        for worker in pools.into_iter().flatten() {
            let token = runtime.worker_shutdown.clone();
            runtime.worker_tasks.push(tokio::spawn(worker.run(token)));
        }

        runtime.limiters = limiters.into_values().collect();
        if let Some(period) = check_interval {
            let monitor = Arc::clone(&runtime.monitor);
            let limiters = runtime.limiters.clone();
            let token = runtime.background_shutdown.clone();
            runtime.background_tasks.push(tokio::spawn(async move {
                monitor
                    .sample_every(period, token, |_| {
                        for limiter in &limiters {
                            limiter.evaluate();
                        }
                    })
                    .await;
            }));
        }
        Ok(())
    }

    async fn start_receivers(&self, runtime: &mut Runtime) -> Result<(), ServiceError> {
        for (id, config) in &self.config.receivers {
            let pipelines: Vec<PipelineHandle> = self
                .config
                .pipelines_for_receiver(id)
                .into_iter()
                .filter_map(|p| runtime.pipelines.get(p).cloned())
                .collect();
            if pipelines.is_empty() {
                continue;
            }

            let consumers = Consumers::new(id.clone(), pipelines, self.metrics.receiver(&id.to_string()));
            let receiver = match config {
                ReceiverConfig::Otlp(config) => OtlpReceiver::new(id.clone(), config.clone(), consumers),
            };
            let running = receiver.start(runtime.receiver_shutdown.clone()).await?;
            runtime.receiver_addrs.insert(
                id.clone(),
                ReceiverAddrs {
                    http: running.http_addr,
                    grpc: running.grpc_addr,
                },
            );
            runtime.receiver_tasks.extend(running.into_tasks());
        }
        Ok(())
    }

    async fn start_health_check(&self, runtime: &mut Runtime) -> Result<(), ServiceError> {
        let Some(health) = self.config.health_check() else {
            return Ok(());
        };
        let listener = tokio::net::TcpListener::bind(&health.endpoint)
            .await
            .map_err(|source| BindError {
                endpoint: health.endpoint.clone(),
                source,
            })?;
        runtime.health_addr = listener.local_addr().ok();

        let router = health_routes(HealthState {
            state: Arc::clone(&self.state),
            limiters: runtime.limiters.clone(),
            metrics: Arc::clone(&self.metrics),
            monitor: Arc::clone(&runtime.monitor),
        });
        let token = runtime.background_shutdown.clone();
        runtime.background_tasks.push(tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
            {
                error!(error = %e, "Health check server error");
            }
        }));
        info!(addr = ?runtime.health_addr, "Health check extension listening");
        Ok(())
    }

    /// Drains and stops every component.
    ///
    /// Receivers stop accepting first, then workers empty their queues,
    /// flush their batch buffers and wait for their exporter queues to
    /// settle, then exporters shut down. Work still
    /// running when `service.drain_timeout` expires is aborted and its items
    /// are counted as lost.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidState`] unless the collector is
    /// running.
    pub async fn shutdown(&mut self) -> Result<ShutdownReport, ServiceError> {
        let state = self.state();
        let runtime = match (state, self.runtime.take()) {
            (ServiceState::Running, Some(runtime)) => runtime,
            (_, runtime) => {
                self.runtime = runtime;
                return Err(ServiceError::InvalidState {
                    operation: "shut down",
                    state,
                });
            }
        };

        let drain_timeout = self.config.service.drain_timeout;
        let deadline = Instant::now() + drain_timeout;
        self.state.set(ServiceState::Draining);
        info!(drain_timeout = %format_duration(drain_timeout), "Collector draining");

        runtime.receiver_shutdown.cancel();
        for handle in runtime.pipelines.values() {
            handle.close();
        }
        let receivers_done = join_until(runtime.receiver_tasks, deadline, "receiver").await;

        runtime.worker_shutdown.cancel();
        let workers_done = join_until(runtime.worker_tasks, deadline, "worker").await;

        let mut report = ShutdownReport {
            lost_items: 0,
            drain_timed_out: !(receivers_done && workers_done),
        };
        for (id, handle) in &runtime.pipelines {
            let lost = handle.counters().write_off_in_flight();
            if lost > 0 {
                error!(pipeline = %id, items = lost, "Drain timeout expired, in-flight data lost");
            }
            report.lost_items += lost;
        }

        shutdown_exporters(&runtime.exporters).await;

        runtime.background_shutdown.cancel();
        join_until(
            runtime.background_tasks,
            Instant::now() + EXPORTER_SHUTDOWN_GRACE,
            "background",
        )
        .await;

        self.state.set(ServiceState::Stopped);
        info!(
            lost_items = report.lost_items,
            drain_timed_out = report.drain_timed_out,
            "Collector stopped"
        );
        Ok(report)
    }

    /// Starts the collector, waits for `signal` and shuts down.
    ///
    /// # Errors
    ///
    /// Returns a [`ServiceError`] if the collector fails to start.
    pub async fn run_until<F>(mut self, signal: F) -> Result<ShutdownReport, ServiceError>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        signal.await;
        self.shutdown().await
    }
}

/// How batches reach a configured exporter.
#[derive(Debug)]
struct DeliverySettings {
    policy: RetryPolicy,
    attempt_timeout: Duration,
    queue_size: usize,
}

fn delivery_settings(config: &ExporterConfig) -> DeliverySettings {
    match config {
        ExporterConfig::OtlpHttp(config) => DeliverySettings {
            policy: RetryPolicy::from(&config.retry_on_failure),
            attempt_timeout: config.timeout,
            queue_size: config.sending_queue.queue_size,
        },
        ExporterConfig::Debug(config) => DeliverySettings {
            policy: RetryPolicy::default(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            queue_size: config.sending_queue.queue_size,
        },
    }
}

async fn shutdown_exporters(exporters: &BTreeMap<ComponentId, Arc<dyn Exporter>>) {
    for (id, exporter) in exporters {
        if tokio::time::timeout(EXPORTER_SHUTDOWN_GRACE, exporter.shutdown())
            .await
            .is_err()
        {
            warn!(exporter = %id, "Exporter did not shut down in time");
        }
    }
}

/// Awaits `tasks` until `deadline`, aborting the ones still running.
///
/// Returns whether every task finished on its own.
async fn join_until(tasks: Vec<JoinHandle<()>>, deadline: Instant, kind: &str) -> bool {
    let mut finished = true;
    for mut task in tasks {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match tokio::time::timeout(remaining, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(task = kind, error = %e, "Task failed during shutdown"),
            Err(_) => {
                task.abort();
                finished = false;
            }
        }
    }
    if !finished {
        warn!(task = kind, "Drain timeout reached, aborted remaining tasks");
    }
    finished
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporters::ExportResult;
    use async_trait::async_trait;
    use shared::models::{Batch, SignalType};

    const CONFIG: &str = r"
receivers:
  otlp:
    protocols:
      http:
        endpoint: 127.0.0.1:0
processors:
  batch:
    send_batch_size: 100
    timeout: 1m
exporters:
  debug:
    verbosity: basic
service:
  drain_timeout: 5s
  pipelines:
    logs:
      receivers: [otlp]
      processors: [batch]
      exporters: [debug]
";

    struct FailingStart;

    #[async_trait]
    impl Exporter for FailingStart {
        async fn start(&self) -> Result<(), ExporterError> {
            Err(ExporterError::Config("sink unreachable".to_string()))
        }

        async fn export(&self, _batch: &Batch) -> ExportResult {
            ExportResult::Success
        }
    }

    struct TracesOnly;

    #[async_trait]
    impl Exporter for TracesOnly {
        fn supports(&self, signal: SignalType) -> bool {
            signal == SignalType::Traces
        }

        async fn export(&self, _batch: &Batch) -> ExportResult {
            ExportResult::Success
        }
    }

    fn service() -> Service {
        Service::new(Config::from_yaml(CONFIG).unwrap())
            .with_memory_monitor(Arc::new(MemoryMonitor::fixed(1024 * 1024 * 1024)))
    }

    #[tokio::test]
    async fn test_lifecycle_states() {
        let mut service = service();
        assert_eq!(service.state(), ServiceState::Unstarted);

        service.start().await.unwrap();
        assert_eq!(service.state(), ServiceState::Running);
        assert!(service.pipeline(&"logs".parse().unwrap()).is_some());
        let addrs = service.receiver_addrs(&"otlp".parse().unwrap()).unwrap();
        assert!(addrs.http.is_some());
        assert!(addrs.grpc.is_none());

        let report = service.shutdown().await.unwrap();
        assert_eq!(service.state(), ServiceState::Stopped);
        assert_eq!(report, ShutdownReport::default());
    }

    #[tokio::test]
    async fn test_invalid_transitions() {
        let mut service = service();
        assert!(matches!(
            service.shutdown().await,
            Err(ServiceError::InvalidState {
                state: ServiceState::Unstarted,
                ..
            })
        ));

        service.start().await.unwrap();
        assert!(matches!(
            service.start().await,
            Err(ServiceError::InvalidState {
                state: ServiceState::Running,
                ..
            })
        ));
        service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_exporter_start_failure_is_fatal() {
        let mut service = service().with_exporter("debug".parse().unwrap(), Arc::new(FailingStart));
        let err = service.start().await.unwrap_err();
        assert!(matches!(err, ServiceError::ExporterInit { .. }));
        assert_eq!(service.state(), ServiceState::Unstarted);
        assert!(service.pipeline(&"logs".parse().unwrap()).is_none());
    }

    #[tokio::test]
    async fn test_exporter_without_signal_support_is_fatal() {
        let mut service = service().with_exporter("debug".parse().unwrap(), Arc::new(TracesOnly));
        let err = service.start().await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::ExporterInit {
                source: ExporterError::UnsupportedSignal { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_port_in_use_is_fatal() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let yaml = CONFIG.replace("127.0.0.1:0", &taken.local_addr().unwrap().to_string());
        let mut service = Service::new(Config::from_yaml(&yaml).unwrap());

        let err = service.start().await.unwrap_err();
        assert!(matches!(err, ServiceError::Bind(_)));
        assert_eq!(service.state(), ServiceState::Unstarted);
    }

    #[test]
    fn test_delivery_settings() {
        let config = Config::from_yaml(CONFIG).unwrap();
        let id: ComponentId = "debug".parse().unwrap();
        let settings = delivery_settings(&config.exporters[&id]);
        assert!(settings.policy.enabled);
        assert_eq!(settings.attempt_timeout, DEFAULT_ATTEMPT_TIMEOUT);
        assert_eq!(settings.queue_size, crate::exporters::DEFAULT_QUEUE_SIZE);

        let yaml = CONFIG.replace("verbosity: basic", "verbosity: basic\n    sending_queue:\n      queue_size: 5");
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(delivery_settings(&config.exporters[&id]).queue_size, 5);
    }
}
