//! Collector configuration.
//!
//! The configuration is a YAML document in the OpenTelemetry Collector
//! layout: named `receivers`, `processors`, `exporters` and `extensions`
//! sections, and a `service` section wiring them into pipelines.
//!
//! Loading runs in three steps: `${env:NAME}` references are substituted,
//! the document is parsed into typed component settings, and the whole
//! configuration is validated. A [`Config`] that exists is always valid.
//!
//! # Example
//!
//! ```
//! use shared::config::Config;
//!
//! let config = Config::from_yaml(r#"
//! receivers:
//!   otlp:
//!     protocols:
//!       http:
//! exporters:
//!   debug:
//! service:
//!   pipelines:
//!     logs:
//!       receivers: [otlp]
//!       exporters: [debug]
//! "#).unwrap();
//!
//! assert_eq!(config.service.pipelines.len(), 1);
//! ```

mod components;
pub mod duration;

pub use components::{
    AttributeAction, AttributeEdit, AuthConfig, BatchConfig, ConfigValue, DebugExporterConfig,
    ExporterConfig, ExtensionConfig, GrpcServerConfig, HealthCheckConfig, HttpServerConfig,
    MemoryLimiterConfig, OtlpHttpExporterConfig, SendingQueueConfig, MAX_LIMIT_MIB, OtlpProtocols, OtlpReceiverConfig,
    ProcessorConfig, ReceiverConfig, ResourceConfig, RetryConfig, Verbosity, WireEncoding,
};
pub use duration::{format_duration, parse_duration};

use crate::models::SignalType;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use validator::Validate;

/// Errors produced while loading a configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The document is not valid YAML or has the wrong shape.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// A component section has the wrong shape.
    #[error("invalid settings for {id}: {source}")]
    Component {
        /// Component ID.
        id: String,
        /// Underlying parse error.
        source: serde_yaml::Error,
    },

    /// The configuration is well-formed but not usable.
    #[error("invalid config: {0}")]
    Validation(String),
}

static COMPONENT_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("component type pattern is valid"));

static ENV_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\$|\$\{(?:env:)?([A-Za-z_][A-Za-z0-9_]*)\}").expect("env reference pattern is valid")
});

// ============================================================================
// Identifiers
// ============================================================================

/// Identifier of a component: `type` or `type/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ComponentId {
    kind: String,
    name: Option<String>,
}

impl ComponentId {
    /// The component type, e.g. `otlphttp`.
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The optional instance name after the `/`.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl FromStr for ComponentId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = match s.split_once('/') {
            Some((kind, name)) => (kind, Some(name)),
            None => (s, None),
        };
        if !COMPONENT_TYPE.is_match(kind) {
            return Err(format!("invalid component id {s:?}: bad type {kind:?}"));
        }
        if name.is_some_and(|n| n.is_empty() || n.contains('/')) {
            return Err(format!("invalid component id {s:?}: bad name"));
        }
        Ok(Self {
            kind: kind.to_string(),
            name: name.map(str::to_string),
        })
    }
}

impl TryFrom<String> for ComponentId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ComponentId> for String {
    fn from(id: ComponentId) -> Self {
        id.to_string()
    }
}

impl std::fmt::Display for ComponentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}/{name}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

/// Identifier of a pipeline: `signal` or `signal/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PipelineId {
    signal: SignalType,
    name: Option<String>,
}

impl PipelineId {
    /// A pipeline ID for `signal` with an optional name.
    #[must_use]
    pub fn new(signal: SignalType, name: Option<&str>) -> Self {
        Self {
            signal,
            name: name.map(str::to_string),
        }
    }

    /// The signal type carried by the pipeline.
    #[must_use]
    pub fn signal(&self) -> SignalType {
        self.signal
    }
}

impl FromStr for PipelineId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (signal, name) = match s.split_once('/') {
            Some((signal, name)) if !name.is_empty() => (signal, Some(name)),
            Some(_) => return Err(format!("invalid pipeline id {s:?}: empty name")),
            None => (s, None),
        };
        let signal = signal
            .parse()
            .map_err(|e| format!("invalid pipeline id {s:?}: {e}"))?;
        Ok(Self::new(signal, name))
    }
}

impl TryFrom<String> for PipelineId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PipelineId> for String {
    fn from(id: PipelineId) -> Self {
        id.to_string()
    }
}

impl std::fmt::Display for PipelineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}/{name}", self.signal),
            None => write!(f, "{}", self.signal),
        }
    }
}

// ============================================================================
// Service section
// ============================================================================

/// Wiring of one pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Receivers feeding the pipeline.
    #[serde(default)]
    pub receivers: Vec<ComponentId>,
    /// Processors, in order.
    #[serde(default)]
    pub processors: Vec<ComponentId>,
    /// Exporters the pipeline fans out to.
    #[serde(default)]
    pub exporters: Vec<ComponentId>,
    /// Total queue capacity in batches, split across workers.
    #[serde(default = "default_queue_size")]
    #[validate(range(min = 1, max = 1_000_000))]
    pub queue_size: usize,
    /// Number of workers.
    #[serde(default = "default_num_workers")]
    #[validate(range(min = 1, max = 256))]
    pub num_workers: usize,
}

fn default_queue_size() -> usize {
    1000
}

fn default_num_workers() -> usize {
    4
}

/// Output format of the collector's own logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogEncoding {
    /// Human-readable text.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Settings for the collector's own logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogsTelemetryConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format.
    #[serde(default)]
    pub encoding: LogEncoding,
}

impl Default for LogsTelemetryConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            encoding: LogEncoding::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Self-telemetry settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TelemetryConfig {
    /// Log settings.
    #[serde(default)]
    pub logs: LogsTelemetryConfig,
}

/// The `service` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Enabled extensions.
    #[serde(default)]
    pub extensions: Vec<ComponentId>,
    /// Self-telemetry.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Upper bound on graceful shutdown.
    #[serde(default = "default_drain_timeout", with = "duration")]
    pub drain_timeout: Duration,
    /// Pipelines by ID.
    #[serde(default)]
    pub pipelines: BTreeMap<PipelineId, PipelineConfig>,
}

fn default_drain_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Document shape before component sections are typed.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    receivers: BTreeMap<ComponentId, serde_yaml::Value>,
    #[serde(default)]
    processors: BTreeMap<ComponentId, serde_yaml::Value>,
    #[serde(default)]
    exporters: BTreeMap<ComponentId, serde_yaml::Value>,
    #[serde(default)]
    extensions: BTreeMap<ComponentId, serde_yaml::Value>,
    service: ServiceConfig,
}

// ============================================================================
// Config
// ============================================================================

/// A complete, validated collector configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    /// Receivers by ID.
    pub receivers: BTreeMap<ComponentId, ReceiverConfig>,
    /// Processors by ID.
    pub processors: BTreeMap<ComponentId, ProcessorConfig>,
    /// Exporters by ID.
    pub exporters: BTreeMap<ComponentId, ExporterConfig>,
    /// Extensions by ID.
    pub extensions: BTreeMap<ComponentId, ExtensionConfig>,
    /// Service wiring.
    pub service: ServiceConfig,
}

impl Config {
    /// Loads a configuration file, substituting environment references.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the file cannot be read, parsed or validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Loads a configuration from a YAML string, substituting environment references.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the document cannot be parsed or validated.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env(yaml, |name| std::env::var(name).ok());
        let raw: RawConfig = serde_yaml::from_str(&expanded)?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let config = Self {
            receivers: raw
                .receivers
                .into_iter()
                .map(|(id, v)| ReceiverConfig::parse(&id, v).map(|c| (id, c)))
                .collect::<Result<_, _>>()?,
            processors: raw
                .processors
                .into_iter()
                .map(|(id, v)| ProcessorConfig::parse(&id, v).map(|c| (id, c)))
                .collect::<Result<_, _>>()?,
            exporters: raw
                .exporters
                .into_iter()
                .map(|(id, v)| ExporterConfig::parse(&id, v).map(|c| (id, c)))
                .collect::<Result<_, _>>()?,
            extensions: raw
                .extensions
                .into_iter()
                .map(|(id, v)| ExtensionConfig::parse(&id, v).map(|c| (id, c)))
                .collect::<Result<_, _>>()?,
            service: raw.service,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates the wiring between components.
    fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Validation(msg));

        if self.service.pipelines.is_empty() {
            return invalid("service.pipelines must define at least one pipeline".to_string());
        }
        if self.service.drain_timeout.is_zero() {
            return invalid("service.drain_timeout must be greater than zero".to_string());
        }

        for id in &self.service.extensions {
            if !self.extensions.contains_key(id) {
                return invalid(format!("service references undefined extension {id}"));
            }
        }

        for (pipeline_id, pipeline) in &self.service.pipelines {
            pipeline
                .validate()
                .map_err(|e| ConfigError::Validation(format!("pipeline {pipeline_id}: {e}")))?;

            if pipeline.receivers.is_empty() {
                return invalid(format!("pipeline {pipeline_id} must have at least one receiver"));
            }
            if pipeline.exporters.is_empty() {
                return invalid(format!("pipeline {pipeline_id} must have at least one exporter"));
            }

            for id in &pipeline.receivers {
                if !self.receivers.contains_key(id) {
                    return invalid(format!("pipeline {pipeline_id} references undefined receiver {id}"));
                }
            }
            for id in &pipeline.exporters {
                if !self.exporters.contains_key(id) {
                    return invalid(format!("pipeline {pipeline_id} references undefined exporter {id}"));
                }
            }
            if let Some(dup) = first_duplicate(&pipeline.receivers)
                .or_else(|| first_duplicate(&pipeline.exporters))
                .or_else(|| first_duplicate(&pipeline.processors))
            {
                return invalid(format!("pipeline {pipeline_id} lists {dup} more than once"));
            }

            let last = pipeline.processors.len().saturating_sub(1);
            for (position, id) in pipeline.processors.iter().enumerate() {
                match self.processors.get(id) {
                    None => {
                        return invalid(format!(
                            "pipeline {pipeline_id} references undefined processor {id}"
                        ))
                    }
                    Some(ProcessorConfig::MemoryLimiter(_)) if position != 0 => {
                        return invalid(format!(
                            "pipeline {pipeline_id}: {id} must be the first processor"
                        ))
                    }
                    Some(ProcessorConfig::Batch(_)) if position != last => {
                        return invalid(format!(
                            "pipeline {pipeline_id}: {id} must be the last processor"
                        ))
                    }
                    Some(_) => {}
                }
            }
        }

        self.warn_unused();
        Ok(())
    }

    fn warn_unused(&self) {
        let used: BTreeSet<&ComponentId> = self
            .service
            .pipelines
            .values()
            .flat_map(|p| p.receivers.iter().chain(&p.processors).chain(&p.exporters))
            .chain(&self.service.extensions)
            .collect();
        let defined = self
            .receivers
            .keys()
            .chain(self.processors.keys())
            .chain(self.exporters.keys())
            .chain(self.extensions.keys());
        for id in defined {
            if !used.contains(id) {
                warn!(component = %id, "Component is configured but not used by any pipeline");
            }
        }
    }

    /// Pipelines fed by receiver `id`, in pipeline ID order.
    #[must_use]
    pub fn pipelines_for_receiver(&self, id: &ComponentId) -> Vec<&PipelineId> {
        self.service
            .pipelines
            .iter()
            .filter(|(_, p)| p.receivers.contains(id))
            .map(|(pid, _)| pid)
            .collect()
    }

    /// Signals carried by pipelines fed by receiver `id`.
    #[must_use]
    pub fn signals_for_receiver(&self, id: &ComponentId) -> BTreeSet<SignalType> {
        self.pipelines_for_receiver(id)
            .into_iter()
            .map(PipelineId::signal)
            .collect()
    }

    /// The enabled health check extension, if any.
    #[must_use]
    pub fn health_check(&self) -> Option<&HealthCheckConfig> {
        self.service
            .extensions
            .iter()
            .find_map(|id| match self.extensions.get(id) {
                Some(ExtensionConfig::HealthCheck(c)) => Some(c),
                None => None,
            })
    }

    /// Human-readable pipeline topology, one line per entry.
    #[must_use]
    pub fn topology(&self) -> Vec<String> {
        let join = |ids: &[ComponentId]| {
            ids.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut lines = Vec::new();
        for (id, pipeline) in &self.service.pipelines {
            lines.push(format!(
                "{id}: [{}] -> [{}] -> [{}] (queue_size={}, num_workers={})",
                join(&pipeline.receivers),
                join(&pipeline.processors),
                join(&pipeline.exporters),
                pipeline.queue_size,
                pipeline.num_workers,
            ));
        }
        for (id, exporter) in &self.exporters {
            if let ExporterConfig::OtlpHttp(c) = exporter {
                let endpoints: Vec<String> = SignalType::ALL
                    .iter()
                    .filter_map(|s| c.signal_endpoint(*s).map(|e| format!("{s}={e}")))
                    .collect();
                let auth = match &c.auth {
                    Some(AuthConfig::BearerToken(_)) => "bearer",
                    Some(AuthConfig::Basic { .. }) => "basic",
                    None => "none",
                };
                lines.push(format!("{id}: {} (auth={auth})", endpoints.join(" ")));
            }
        }
        if let Some(health) = self.health_check() {
            lines.push(format!("health_check: {}", health.endpoint));
        }
        lines
    }

    /// Logs the pipeline topology. Credentials are never printed.
    pub fn print_config(&self) {
        for line in self.topology() {
            info!("{line}");
        }
    }
}

fn first_duplicate(ids: &[ComponentId]) -> Option<&ComponentId> {
    let mut seen = BTreeSet::new();
    ids.iter().find(|id| !seen.insert(*id))
}

/// Substitutes `${env:NAME}` and `${NAME}` references using `lookup`.
///
/// `$$` produces a literal `$`. Unset variables expand to the empty string
/// and are logged.
///
/// # Examples
///
/// ```
/// use shared::config::expand_env;
///
/// let out = expand_env("token: ${env:TOKEN} price: $$5", |name| {
///     (name == "TOKEN").then(|| "abc".to_string())
/// });
/// assert_eq!(out, "token: abc price: $5");
/// ```
pub fn expand_env<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    ENV_REFERENCE
        .replace_all(input, |caps: &Captures<'_>| match caps.get(1) {
            None => "$".to_string(),
            Some(name) => lookup(name.as_str()).unwrap_or_else(|| {
                warn!(variable = name.as_str(), "Environment variable is not set, using empty value");
                String::new()
            }),
        })
        .into_owned()
}
