//! Types shared by every signal: attribute values, resources, scopes and IDs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Attribute map keyed by attribute name.
///
/// Ordered so that hashing and encoding are deterministic.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A dynamically typed attribute value, mirroring OTLP `AnyValue`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AttributeValue {
    /// No value was set.
    #[default]
    Empty,
    /// UTF-8 string.
    String(String),
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Int(i64),
    /// 64-bit float.
    Double(f64),
    /// Raw bytes.
    Bytes(Vec<u8>),
    /// Ordered list of values.
    Array(Vec<AttributeValue>),
    /// Nested key-value map.
    Map(Attributes),
}

impl AttributeValue {
    /// Returns the string value, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    fn hash_into<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Self::Empty => {}
            Self::String(s) => s.hash(state),
            Self::Bool(b) => b.hash(state),
            Self::Int(i) => i.hash(state),
            Self::Double(d) => d.to_bits().hash(state),
            Self::Bytes(b) => b.hash(state),
            Self::Array(values) => {
                values.len().hash(state);
                for v in values {
                    v.hash_into(state);
                }
            }
            Self::Map(map) => hash_attributes(map, state),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for AttributeValue {
    fn from(d: f64) -> Self {
        Self::Double(d)
    }
}

fn hash_attributes<H: Hasher>(attributes: &Attributes, state: &mut H) {
    attributes.len().hash(state);
    for (key, value) in attributes {
        key.hash(state);
        value.hash_into(state);
    }
}

/// Attributes identifying the origin of telemetry (service, host, ...).
///
/// A resource is immutable once decoded and shared through `Arc` by every
/// item that came from the same OTLP resource block.
///
/// # Example
///
/// ```
/// use shared::models::Resource;
///
/// let resource = Resource::new()
///     .with_attribute("service.name", "checkout")
///     .with_attribute("host.name", "web-1");
///
/// assert_eq!(resource.service_name(), Some("checkout"));
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Resource {
    /// Resource attributes.
    pub attributes: Attributes,
    /// Number of attributes dropped by the sender.
    pub dropped_attributes_count: u32,
    /// Schema URL of the resource block.
    pub schema_url: String,
}

impl Resource {
    /// Creates an empty resource.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an attribute to the resource.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Returns the `service.name` attribute, if present.
    #[must_use]
    pub fn service_name(&self) -> Option<&str> {
        self.attributes
            .get("service.name")
            .and_then(AttributeValue::as_str)
    }

    /// Content hash of the resource.
    ///
    /// Two resources with equal attributes and schema have the same
    /// fingerprint regardless of which request they were decoded from.
    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        hash_attributes(&self.attributes, &mut hasher);
        self.dropped_attributes_count.hash(&mut hasher);
        self.schema_url.hash(&mut hasher);
        hasher.finish()
    }
}

/// The instrumentation scope (library) that produced a group of items.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InstrumentationScope {
    /// Scope name.
    pub name: String,
    /// Scope version.
    pub version: String,
    /// Scope attributes.
    pub attributes: Attributes,
    /// Number of attributes dropped by the sender.
    pub dropped_attributes_count: u32,
    /// Schema URL of the scope block.
    pub schema_url: String,
}

impl InstrumentationScope {
    /// Creates a scope with a name and version.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            ..Self::default()
        }
    }
}

/// A 16-byte trace identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TraceId(pub [u8; 16]);

impl TraceId {
    /// Builds an ID from a byte slice, returning `None` unless it is exactly 16 bytes.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn to_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// An 8-byte span identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SpanId(pub [u8; 8]);

impl SpanId {
    /// Builds an ID from a byte slice, returning `None` unless it is exactly 8 bytes.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn to_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl std::fmt::Display for SpanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// The three telemetry signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    /// Spans.
    Traces,
    /// Metric data points.
    Metrics,
    /// Log records.
    Logs,
}

impl SignalType {
    /// All signal types, in a stable order.
    pub const ALL: [SignalType; 3] = [Self::Traces, Self::Metrics, Self::Logs];

    /// Returns the lowercase name used in config and URL paths.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Traces => "traces",
            Self::Metrics => "metrics",
            Self::Logs => "logs",
        }
    }
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SignalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "traces" => Ok(Self::Traces),
            "metrics" => Ok(Self::Metrics),
            "logs" => Ok(Self::Logs),
            other => Err(format!("unknown signal type '{other}'")),
        }
    }
}

/// Capabilities common to spans, metric points and log records.
pub trait SignalItem {
    /// Primary timestamp of the item in nanoseconds since the Unix epoch.
    fn timestamp_unix_nano(&self) -> u64;

    /// Item attributes.
    fn attributes(&self) -> &Attributes;

    /// The resource this item originated from.
    fn resource(&self) -> &Arc<Resource>;

    /// The instrumentation scope this item was produced by.
    fn scope(&self) -> &Arc<InstrumentationScope>;

    /// Points the item at a different resource.
    fn replace_resource(&mut self, resource: Arc<Resource>);

    /// Primary timestamp as a `DateTime<Utc>`.
    fn timestamp(&self) -> DateTime<Utc> {
        let nanos = i64::try_from(self.timestamp_unix_nano()).unwrap_or(i64::MAX);
        DateTime::from_timestamp_nanos(nanos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_content_based() {
        let a = Resource::new()
            .with_attribute("service.name", "api")
            .with_attribute("replica", 3_i64);
        let b = Resource::new()
            .with_attribute("replica", 3_i64)
            .with_attribute("service.name", "api");
        let c = Resource::new().with_attribute("service.name", "worker");

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_fingerprint_distinguishes_value_types() {
        let string = Resource::new().with_attribute("k", "1");
        let int = Resource::new().with_attribute("k", 1_i64);
        assert_ne!(string.fingerprint(), int.fingerprint());
    }

    #[test]
    fn test_ids_require_exact_length() {
        assert!(TraceId::from_slice(&[1; 16]).is_some());
        assert!(TraceId::from_slice(&[1; 15]).is_none());
        assert!(SpanId::from_slice(&[1; 8]).is_some());
        assert!(SpanId::from_slice(&[]).is_none());
    }

    #[test]
    fn test_id_display_is_hex() {
        let id = SpanId([0, 1, 2, 3, 0xa, 0xb, 0xc, 0xff]);
        assert_eq!(id.to_string(), "000102030a0b0cff");
    }

    #[test]
    fn test_signal_type_parse() {
        assert_eq!("logs".parse::<SignalType>(), Ok(SignalType::Logs));
        assert!("events".parse::<SignalType>().is_err());
    }
}
