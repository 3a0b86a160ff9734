//! Receiver, processor, exporter and extension settings.
//!
//! Each component section of the configuration document is parsed into one
//! of the typed configs below once its `type` is known from the component ID.

use super::duration;
use crate::models::{AttributeValue, SignalType};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use validator::{Validate, ValidationError};

fn non_zero_duration(value: &Duration) -> Result<(), ValidationError> {
    if value.is_zero() {
        return Err(ValidationError::new("zero_duration").with_message("must be greater than zero".into()));
    }
    Ok(())
}

fn http_url(value: &str) -> Result<(), ValidationError> {
    match url::Url::parse(value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(()),
        Ok(_) => Err(ValidationError::new("url_scheme").with_message("scheme must be http or https".into())),
        Err(e) => Err(ValidationError::new("url").with_message(e.to_string().into())),
    }
}

/// Treats a present-but-empty section (`grpc:`) as "enabled with defaults".
fn enabled_with_defaults<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Some(Option::<T>::deserialize(deserializer)?.unwrap_or_default()))
}

// ============================================================================
// Receivers
// ============================================================================

/// Settings of a configured receiver.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReceiverConfig {
    /// OTLP over gRPC and/or HTTP.
    Otlp(OtlpReceiverConfig),
}

/// OTLP receiver settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct OtlpReceiverConfig {
    /// Enabled protocols.
    #[serde(default)]
    #[validate(nested)]
    pub protocols: OtlpProtocols,
}

/// Protocols of the OTLP receiver. A protocol is enabled when its section is present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct OtlpProtocols {
    /// OTLP/gRPC server.
    #[serde(default, deserialize_with = "enabled_with_defaults")]
    #[validate(nested)]
    pub grpc: Option<GrpcServerConfig>,
    /// OTLP/HTTP server.
    #[serde(default, deserialize_with = "enabled_with_defaults")]
    #[validate(nested)]
    pub http: Option<HttpServerConfig>,
}

/// OTLP/gRPC listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct GrpcServerConfig {
    /// Listen address, `host:port`.
    #[serde(default = "default_grpc_endpoint")]
    #[validate(length(min = 1, message = "endpoint cannot be empty"))]
    pub endpoint: String,
    /// Maximum decoded message size in MiB.
    #[serde(default = "default_max_recv_msg_size_mib")]
    #[validate(range(min = 1, max = 1024))]
    pub max_recv_msg_size_mib: usize,
}

impl Default for GrpcServerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_grpc_endpoint(),
            max_recv_msg_size_mib: default_max_recv_msg_size_mib(),
        }
    }
}

fn default_grpc_endpoint() -> String {
    "0.0.0.0:4317".to_string()
}

fn default_max_recv_msg_size_mib() -> usize {
    4
}

/// OTLP/HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct HttpServerConfig {
    /// Listen address, `host:port`.
    #[serde(default = "default_http_endpoint")]
    #[validate(length(min = 1, message = "endpoint cannot be empty"))]
    pub endpoint: String,
    /// Maximum request body size in bytes, after decompression.
    #[serde(default = "default_max_request_body_size")]
    #[validate(range(min = 1))]
    pub max_request_body_size: usize,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            endpoint: default_http_endpoint(),
            max_request_body_size: default_max_request_body_size(),
        }
    }
}

fn default_http_endpoint() -> String {
    "0.0.0.0:4318".to_string()
}

fn default_max_request_body_size() -> usize {
    20 * 1024 * 1024 // 20MiB
}

// ============================================================================
// Processors
// ============================================================================

/// Settings of a configured processor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProcessorConfig {
    /// Memory-based admission control.
    MemoryLimiter(MemoryLimiterConfig),
    /// Batching by size and time.
    Batch(BatchConfig),
    /// Resource attribute edits.
    Resource(ResourceConfig),
}

/// Largest accepted `limit_mib` or `spike_limit_mib`: 16 TiB.
pub const MAX_LIMIT_MIB: u64 = 16 * 1024 * 1024;

/// Memory limiter settings.
///
/// The soft limit is given either in MiB or as a percentage of the memory
/// available to the process. The spike allowance is added on top of it and
/// defaults to a fifth of the soft limit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct MemoryLimiterConfig {
    /// How often memory usage is sampled.
    #[serde(default = "default_check_interval", with = "duration")]
    #[validate(custom(function = "non_zero_duration"))]
    pub check_interval: Duration,
    /// Soft limit in MiB.
    #[serde(default)]
    #[validate(range(min = 1, max = MAX_LIMIT_MIB))]
    pub limit_mib: Option<u64>,
    /// Soft limit as a percentage of available memory.
    #[serde(default)]
    #[validate(range(min = 1, max = 100))]
    pub limit_percentage: Option<u8>,
    /// Spike allowance in MiB.
    #[serde(default)]
    #[validate(range(max = MAX_LIMIT_MIB))]
    pub spike_limit_mib: Option<u64>,
    /// Spike allowance as a percentage of available memory.
    #[serde(default)]
    #[validate(range(max = 100))]
    pub spike_limit_percentage: Option<u8>,
    /// Margin below the soft limit, as a percentage of it, that usage must
    /// fall under before admissions resume.
    #[serde(default = "default_hysteresis_percentage")]
    #[validate(range(max = 50))]
    pub hysteresis_percentage: u8,
}

impl Default for MemoryLimiterConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            limit_mib: None,
            limit_percentage: Some(80),
            spike_limit_mib: None,
            spike_limit_percentage: Some(15),
            hysteresis_percentage: default_hysteresis_percentage(),
        }
    }
}

impl MemoryLimiterConfig {
    fn check_limits(&self) -> Result<(), String> {
        match (self.limit_mib, self.limit_percentage) {
            (None, None) => {
                return Err("one of limit_mib or limit_percentage is required".to_string())
            }
            (Some(_), Some(_)) => {
                return Err("limit_mib and limit_percentage are mutually exclusive".to_string())
            }
            _ => {}
        }
        if self.spike_limit_mib.is_some() && self.spike_limit_percentage.is_some() {
            return Err(
                "spike_limit_mib and spike_limit_percentage are mutually exclusive".to_string(),
            );
        }
        if let (Some(limit), Some(spike)) = (self.limit_percentage, self.spike_limit_percentage) {
            if u16::from(limit) + u16::from(spike) > 100 {
                return Err(format!(
                    "limit_percentage + spike_limit_percentage must not exceed 100 (got {limit} + {spike})"
                ));
            }
        }
        Ok(())
    }
}

fn default_check_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_hysteresis_percentage() -> u8 {
    5
}

/// Batch processor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    /// Item count that triggers a flush.
    #[serde(default = "default_send_batch_size")]
    #[validate(range(min = 1))]
    pub send_batch_size: usize,
    /// Maximum time the first buffered item waits before a flush.
    #[serde(default = "default_batch_timeout", with = "duration")]
    #[validate(custom(function = "non_zero_duration"))]
    pub timeout: Duration,
    /// Upper bound on items per flushed batch; 0 means unbounded.
    #[serde(default)]
    pub send_batch_max_size: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            send_batch_size: default_send_batch_size(),
            timeout: default_batch_timeout(),
            send_batch_max_size: 0,
        }
    }
}

fn default_send_batch_size() -> usize {
    8192
}

fn default_batch_timeout() -> Duration {
    Duration::from_millis(200)
}

/// How a resource attribute edit is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeAction {
    /// Set the key only if it is absent.
    Insert,
    /// Set the key only if it is present.
    Update,
    /// Set the key unconditionally.
    Upsert,
    /// Remove the key.
    Delete,
}

/// Scalar attribute value as written in the configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Floating point number.
    Double(f64),
    /// String.
    String(String),
}

impl From<&ConfigValue> for AttributeValue {
    fn from(value: &ConfigValue) -> Self {
        match value {
            ConfigValue::Bool(b) => Self::Bool(*b),
            ConfigValue::Int(i) => Self::Int(*i),
            ConfigValue::Double(d) => Self::Double(*d),
            ConfigValue::String(s) => Self::String(s.clone()),
        }
    }
}

/// One resource attribute edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AttributeEdit {
    /// Attribute key.
    #[validate(length(min = 1, message = "attribute key cannot be empty"))]
    pub key: String,
    /// Value to set; required for every action but `delete`.
    #[serde(default)]
    pub value: Option<ConfigValue>,
    /// Edit action.
    pub action: AttributeAction,
}

/// Resource processor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ResourceConfig {
    /// Edits, applied in order.
    #[validate(length(min = 1, message = "at least one attribute edit is required"))]
    #[validate(nested)]
    pub attributes: Vec<AttributeEdit>,
}

impl ResourceConfig {
    fn check_edits(&self) -> Result<(), String> {
        for edit in &self.attributes {
            if edit.action != AttributeAction::Delete && edit.value.is_none() {
                return Err(format!("attribute {:?} needs a value for {:?}", edit.key, edit.action));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Exporters
// ============================================================================

/// Settings of a configured exporter.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExporterConfig {
    /// OTLP over HTTP.
    OtlpHttp(OtlpHttpExporterConfig),
    /// Logs batches locally.
    Debug(DebugExporterConfig),
}

/// Body encoding used by the OTLP/HTTP exporter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireEncoding {
    /// Binary protobuf.
    #[default]
    Proto,
    /// Protobuf-JSON.
    Json,
}

/// Credentials sent with every export request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthConfig {
    /// `Authorization: Bearer <token>`.
    BearerToken(String),
    /// HTTP basic authentication.
    Basic {
        /// User name.
        username: String,
        /// Password.
        #[serde(default)]
        password: String,
    },
}

/// Retry policy for transient export failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Whether failed exports are retried at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Delay before the first retry.
    #[serde(default = "default_initial_interval", with = "duration")]
    #[validate(custom(function = "non_zero_duration"))]
    pub initial_interval: Duration,
    /// Upper bound on the delay between retries.
    #[serde(default = "default_max_interval", with = "duration")]
    #[validate(custom(function = "non_zero_duration"))]
    pub max_interval: Duration,
    /// Growth factor applied to the delay after each retry.
    #[serde(default = "default_multiplier")]
    #[validate(range(min = 1.0, max = 10.0))]
    pub multiplier: f64,
    /// Jitter: each delay is drawn from `delay * (1 ± randomization_factor)`.
    #[serde(default = "default_randomization_factor")]
    #[validate(range(min = 0.0, max = 1.0))]
    pub randomization_factor: f64,
    /// Total time budget for one batch, first attempt included; `0s` disables the bound.
    #[serde(default = "default_max_elapsed_time", with = "duration")]
    pub max_elapsed_time: Duration,
    /// Maximum number of attempts, first attempt included.
    #[serde(default)]
    #[validate(range(min = 1))]
    pub max_attempts: Option<u32>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_interval: default_initial_interval(),
            max_interval: default_max_interval(),
            multiplier: default_multiplier(),
            randomization_factor: default_randomization_factor(),
            max_elapsed_time: default_max_elapsed_time(),
            max_attempts: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_initial_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_max_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_multiplier() -> f64 {
    1.5
}

fn default_randomization_factor() -> f64 {
    0.5
}

fn default_max_elapsed_time() -> Duration {
    Duration::from_secs(300)
}

/// Queue of batches waiting for one exporter.
///
/// Every pipeline worker keeps one such queue per exporter, so a sink that is
/// retrying holds back only its own deliveries. Batches that find the queue
/// full are dropped for that exporter and counted as lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SendingQueueConfig {
    /// Batches a worker may have waiting for the exporter.
    #[serde(default = "default_sending_queue_size")]
    #[validate(range(min = 1))]
    pub queue_size: usize,
}

impl Default for SendingQueueConfig {
    fn default() -> Self {
        Self {
            queue_size: default_sending_queue_size(),
        }
    }
}

fn default_sending_queue_size() -> usize {
    1000
}

/// OTLP/HTTP exporter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct OtlpHttpExporterConfig {
    /// Base URL; `/v1/<signal>` is appended per signal.
    #[serde(default)]
    #[validate(custom(function = "http_url"))]
    pub endpoint: Option<String>,
    /// Full URL for traces, overriding `endpoint`.
    #[serde(default)]
    #[validate(custom(function = "http_url"))]
    pub traces_endpoint: Option<String>,
    /// Full URL for metrics, overriding `endpoint`.
    #[serde(default)]
    #[validate(custom(function = "http_url"))]
    pub metrics_endpoint: Option<String>,
    /// Full URL for logs, overriding `endpoint`.
    #[serde(default)]
    #[validate(custom(function = "http_url"))]
    pub logs_endpoint: Option<String>,
    /// Body encoding.
    #[serde(default)]
    pub encoding: WireEncoding,
    /// Extra request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Credentials.
    #[serde(default)]
    pub auth: Option<AuthConfig>,
    /// Per-attempt timeout.
    #[serde(default = "default_export_timeout", with = "duration")]
    #[validate(custom(function = "non_zero_duration"))]
    pub timeout: Duration,
    /// Retry policy.
    #[serde(default)]
    #[validate(nested)]
    pub retry_on_failure: RetryConfig,
    /// Queue in front of the retry loop.
    #[serde(default)]
    #[validate(nested)]
    pub sending_queue: SendingQueueConfig,
}

fn default_export_timeout() -> Duration {
    Duration::from_secs(30)
}

impl OtlpHttpExporterConfig {
    /// The URL that receives `signal` exports, if one is configured.
    ///
    /// # Examples
    ///
    /// ```
    /// use shared::config::OtlpHttpExporterConfig;
    /// use shared::models::SignalType;
    ///
    /// let mut config = OtlpHttpExporterConfig::new("https://otlp.example.com/");
    /// config.logs_endpoint = Some("https://logs.example.com/ingest".to_string());
    ///
    /// assert_eq!(
    ///     config.signal_endpoint(SignalType::Traces).as_deref(),
    ///     Some("https://otlp.example.com/v1/traces")
    /// );
    /// assert_eq!(
    ///     config.signal_endpoint(SignalType::Logs).as_deref(),
    ///     Some("https://logs.example.com/ingest")
    /// );
    /// ```
    #[must_use]
    pub fn signal_endpoint(&self, signal: SignalType) -> Option<String> {
        let specific = match signal {
            SignalType::Traces => &self.traces_endpoint,
            SignalType::Metrics => &self.metrics_endpoint,
            SignalType::Logs => &self.logs_endpoint,
        };
        specific.clone().or_else(|| {
            self.endpoint
                .as_ref()
                .map(|base| format!("{}/v1/{}", base.trim_end_matches('/'), signal))
        })
    }

    /// Settings for `endpoint` with every other option at its default.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            traces_endpoint: None,
            metrics_endpoint: None,
            logs_endpoint: None,
            encoding: WireEncoding::default(),
            headers: BTreeMap::new(),
            auth: None,
            timeout: default_export_timeout(),
            retry_on_failure: RetryConfig::default(),
            sending_queue: SendingQueueConfig::default(),
        }
    }

    fn check_endpoints(&self) -> Result<(), String> {
        if SignalType::ALL.iter().all(|s| self.signal_endpoint(*s).is_none()) {
            return Err("endpoint or a per-signal endpoint is required".to_string());
        }
        let retry = &self.retry_on_failure;
        if retry.initial_interval > retry.max_interval {
            return Err("retry_on_failure.initial_interval must not exceed max_interval".to_string());
        }
        Ok(())
    }
}

/// Amount of detail the debug exporter logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    /// Item counts per batch.
    #[default]
    Basic,
    /// One line per item.
    Normal,
    /// Full OTLP/JSON payload.
    Detailed,
}

/// Debug exporter settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct DebugExporterConfig {
    /// Detail level.
    #[serde(default)]
    pub verbosity: Verbosity,
    /// Queue in front of the exporter.
    #[serde(default)]
    #[validate(nested)]
    pub sending_queue: SendingQueueConfig,
}

// ============================================================================
// Extensions
// ============================================================================

/// Settings of a configured extension.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExtensionConfig {
    /// Liveness, readiness and counters over HTTP.
    HealthCheck(HealthCheckConfig),
}

/// Health check endpoint settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct HealthCheckConfig {
    /// Listen address, `host:port`.
    #[serde(default = "default_health_endpoint")]
    #[validate(length(min = 1, message = "endpoint cannot be empty"))]
    pub endpoint: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            endpoint: default_health_endpoint(),
        }
    }
}

fn default_health_endpoint() -> String {
    "0.0.0.0:13133".to_string()
}

// ============================================================================
// Typed parsing
// ============================================================================

pub(super) type ComponentResult<T> = Result<T, super::ConfigError>;

fn typed<T>(id: &super::ComponentId, value: serde_yaml::Value) -> ComponentResult<T>
where
    T: serde::de::DeserializeOwned,
{
    let value = match value {
        serde_yaml::Value::Null => serde_yaml::Value::Mapping(serde_yaml::Mapping::new()),
        other => other,
    };
    serde_yaml::from_value(value).map_err(|source| super::ConfigError::Component {
        id: id.to_string(),
        source,
    })
}

fn checked<T: Validate>(id: &super::ComponentId, config: T) -> ComponentResult<T> {
    config
        .validate()
        .map_err(|e| super::ConfigError::Validation(format!("{id}: {e}")))?;
    Ok(config)
}

fn unknown(kind: &str, id: &super::ComponentId) -> super::ConfigError {
    super::ConfigError::Validation(format!("unknown {kind} type {:?} in {id}", id.kind()))
}

impl ReceiverConfig {
    pub(super) fn parse(id: &super::ComponentId, value: serde_yaml::Value) -> ComponentResult<Self> {
        match id.kind() {
            "otlp" => {
                let config: OtlpReceiverConfig = checked(id, typed(id, value)?)?;
                if config.protocols.grpc.is_none() && config.protocols.http.is_none() {
                    return Err(super::ConfigError::Validation(format!(
                        "{id}: at least one protocol (grpc or http) must be enabled"
                    )));
                }
                Ok(Self::Otlp(config))
            }
            _ => Err(unknown("receiver", id)),
        }
    }
}

impl ProcessorConfig {
    pub(super) fn parse(id: &super::ComponentId, value: serde_yaml::Value) -> ComponentResult<Self> {
        let invalid = |e: String| super::ConfigError::Validation(format!("{id}: {e}"));
        match id.kind() {
            "memory_limiter" => {
                let config: MemoryLimiterConfig = checked(id, typed(id, value)?)?;
                config.check_limits().map_err(invalid)?;
                Ok(Self::MemoryLimiter(config))
            }
            "batch" => {
                let config: BatchConfig = checked(id, typed(id, value)?)?;
                if config.send_batch_max_size != 0 && config.send_batch_max_size < config.send_batch_size {
                    return Err(invalid(
                        "send_batch_max_size must be 0 or at least send_batch_size".to_string(),
                    ));
                }
                Ok(Self::Batch(config))
            }
            "resource" => {
                let config: ResourceConfig = checked(id, typed(id, value)?)?;
                config.check_edits().map_err(invalid)?;
                Ok(Self::Resource(config))
            }
            _ => Err(unknown("processor", id)),
        }
    }
}

impl ExporterConfig {
    pub(super) fn parse(id: &super::ComponentId, value: serde_yaml::Value) -> ComponentResult<Self> {
        match id.kind() {
            "otlphttp" => {
                let config: OtlpHttpExporterConfig = checked(id, typed(id, value)?)?;
                config
                    .check_endpoints()
                    .map_err(|e| super::ConfigError::Validation(format!("{id}: {e}")))?;
                Ok(Self::OtlpHttp(config))
            }
            "debug" => Ok(Self::Debug(checked(id, typed(id, value)?)?)),
            _ => Err(unknown("exporter", id)),
        }
    }
}

impl ExtensionConfig {
    pub(super) fn parse(id: &super::ComponentId, value: serde_yaml::Value) -> ComponentResult<Self> {
        match id.kind() {
            "health_check" => Ok(Self::HealthCheck(checked(id, typed(id, value)?)?)),
            _ => Err(unknown("extension", id)),
        }
    }
}
