//! Metric data point model.
//!
//! A `MetricPoint` is one data point flattened together with the identity of
//! the metric it belongs to, so that a metric batch is a plain ordered list
//! of points like the other signals.

use super::common::{AttributeValue, Attributes, InstrumentationScope, Resource, SignalItem};
use std::sync::Arc;

/// Aggregation temporality of cumulative-capable metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Temporality {
    /// Not specified by the sender.
    #[default]
    Unspecified,
    /// Each point covers the interval since the previous report.
    Delta,
    /// Each point covers the interval since a fixed start time.
    Cumulative,
}

/// The kind of metric a point belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Instantaneous measurement.
    Gauge,
    /// Sum over time.
    Sum {
        /// Aggregation temporality.
        temporality: Temporality,
        /// Whether the sum only ever increases.
        monotonic: bool,
    },
    /// Explicit-bucket histogram.
    Histogram {
        /// Aggregation temporality.
        temporality: Temporality,
    },
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gauge => write!(f, "gauge"),
            Self::Sum { .. } => write!(f, "sum"),
            Self::Histogram { .. } => write!(f, "histogram"),
        }
    }
}

/// Histogram point value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistogramValue {
    /// Number of observations.
    pub count: u64,
    /// Sum of observations, if recorded.
    pub sum: Option<f64>,
    /// Observation count per bucket.
    pub bucket_counts: Vec<u64>,
    /// Upper bounds of all buckets but the last.
    pub explicit_bounds: Vec<f64>,
    /// Smallest observation, if recorded.
    pub min: Option<f64>,
    /// Largest observation, if recorded.
    pub max: Option<f64>,
}

/// The value of a single data point.
#[derive(Debug, Clone, PartialEq)]
pub enum PointValue {
    /// Integer gauge or sum value.
    Int(i64),
    /// Floating point gauge or sum value.
    Double(f64),
    /// Histogram value.
    Histogram(HistogramValue),
}

/// A metric data point together with its metric identity.
///
/// # Example
///
/// ```
/// use shared::models::{MetricKind, MetricPoint, PointValue, Resource, InstrumentationScope};
/// use std::sync::Arc;
///
/// let point = MetricPoint::new(
///     Arc::new(Resource::new()),
///     Arc::new(InstrumentationScope::default()),
///     "queue.depth",
///     MetricKind::Gauge,
///     PointValue::Int(12),
/// )
/// .with_unit("{items}");
///
/// assert_eq!(point.unit, "{items}");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    /// Origin of the point.
    pub resource: Arc<Resource>,
    /// Library that produced the point.
    pub scope: Arc<InstrumentationScope>,
    /// Metric name.
    pub name: String,
    /// Metric description.
    pub description: String,
    /// Metric unit.
    pub unit: String,
    /// Metric kind.
    pub kind: MetricKind,
    /// Point value.
    pub value: PointValue,
    /// Start of the aggregation interval, nanoseconds since the Unix epoch.
    pub start_time_unix_nano: u64,
    /// Time of the measurement, nanoseconds since the Unix epoch.
    pub time_unix_nano: u64,
    /// Point attributes.
    pub attributes: Attributes,
    /// Data point flags.
    pub flags: u32,
}

impl MetricPoint {
    /// Creates a point with zero timestamps and no attributes.
    #[must_use]
    pub fn new(
        resource: Arc<Resource>,
        scope: Arc<InstrumentationScope>,
        name: impl Into<String>,
        kind: MetricKind,
        value: PointValue,
    ) -> Self {
        Self {
            resource,
            scope,
            name: name.into(),
            description: String::new(),
            unit: String::new(),
            kind,
            value,
            start_time_unix_nano: 0,
            time_unix_nano: 0,
            attributes: Attributes::new(),
            flags: 0,
        }
    }

    /// Sets the unit.
    #[must_use]
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Sets the measurement time.
    #[must_use]
    pub fn with_time(mut self, time_unix_nano: u64) -> Self {
        self.time_unix_nano = time_unix_nano;
        self
    }

    /// Adds an attribute to the point.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Whether two points belong to the same metric (name, description, unit and kind).
    #[must_use]
    pub fn same_metric(&self, other: &Self) -> bool {
        self.name == other.name
            && self.description == other.description
            && self.unit == other.unit
            && self.kind == other.kind
    }
}

impl SignalItem for MetricPoint {
    fn timestamp_unix_nano(&self) -> u64 {
        self.time_unix_nano
    }

    fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    fn resource(&self) -> &Arc<Resource> {
        &self.resource
    }

    fn scope(&self) -> &Arc<InstrumentationScope> {
        &self.scope
    }

    fn replace_resource(&mut self, resource: Arc<Resource>) {
        self.resource = resource;
    }
}
