//! Log record data model.

use super::common::{AttributeValue, Attributes, InstrumentationScope, Resource, SignalItem, SpanId, TraceId};
use std::sync::Arc;

/// Coarse severity levels derived from the OTLP severity number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    /// Severity number 0.
    Unspecified,
    /// Severity numbers 1-4.
    Trace,
    /// Severity numbers 5-8.
    Debug,
    /// Severity numbers 9-12.
    Info,
    /// Severity numbers 13-16.
    Warn,
    /// Severity numbers 17-20.
    Error,
    /// Severity numbers 21-24.
    Fatal,
}

impl Severity {
    /// Maps an OTLP severity number to its level.
    ///
    /// See <https://opentelemetry.io/docs/specs/otel/logs/data-model/#field-severitynumber>.
    #[must_use]
    pub fn from_number(number: i32) -> Self {
        match number {
            1..=4 => Self::Trace,
            5..=8 => Self::Debug,
            9..=12 => Self::Info,
            13..=16 => Self::Warn,
            17..=20 => Self::Error,
            21..=24 => Self::Fatal,
            _ => Self::Unspecified,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unspecified => write!(f, "UNSPECIFIED"),
            Self::Trace => write!(f, "TRACE"),
            Self::Debug => write!(f, "DEBUG"),
            Self::Info => write!(f, "INFO"),
            Self::Warn => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Fatal => write!(f, "FATAL"),
        }
    }
}

/// A single log record.
///
/// # Example
///
/// ```
/// use shared::models::{InstrumentationScope, LogRecord, Resource, Severity};
/// use std::sync::Arc;
///
/// let record = LogRecord::new(Arc::new(Resource::new()), Arc::new(InstrumentationScope::default()), "user logged in")
///     .with_severity(9)
///     .with_attribute("user_id", "12345");
///
/// assert_eq!(record.severity(), Severity::Info);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Origin of the record.
    pub resource: Arc<Resource>,
    /// Library that produced the record.
    pub scope: Arc<InstrumentationScope>,
    /// Event time, nanoseconds since the Unix epoch (0 if unknown).
    pub time_unix_nano: u64,
    /// Time the record was observed by the collection system.
    pub observed_time_unix_nano: u64,
    /// OTLP severity number (0-24).
    pub severity_number: i32,
    /// Severity as reported by the source.
    pub severity_text: String,
    /// Record body.
    pub body: AttributeValue,
    /// Event name, for records that represent events.
    pub event_name: String,
    /// Record attributes.
    pub attributes: Attributes,
    /// Number of attributes dropped by the sender.
    pub dropped_attributes_count: u32,
    /// Correlated trace, if any.
    pub trace_id: Option<TraceId>,
    /// Correlated span, if any.
    pub span_id: Option<SpanId>,
    /// Trace flags.
    pub flags: u32,
}

impl LogRecord {
    /// Creates a record with a string body.
    #[must_use]
    pub fn new(
        resource: Arc<Resource>,
        scope: Arc<InstrumentationScope>,
        body: impl Into<AttributeValue>,
    ) -> Self {
        Self {
            resource,
            scope,
            time_unix_nano: 0,
            observed_time_unix_nano: 0,
            severity_number: 0,
            severity_text: String::new(),
            body: body.into(),
            event_name: String::new(),
            attributes: Attributes::new(),
            dropped_attributes_count: 0,
            trace_id: None,
            span_id: None,
            flags: 0,
        }
    }

    /// Sets the OTLP severity number.
    #[must_use]
    pub fn with_severity(mut self, severity_number: i32) -> Self {
        self.severity_number = severity_number;
        self
    }

    /// Sets the event time.
    #[must_use]
    pub fn with_time(mut self, time_unix_nano: u64) -> Self {
        self.time_unix_nano = time_unix_nano;
        self
    }

    /// Adds an attribute to the record.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Sets the trace context.
    #[must_use]
    pub fn with_trace_context(mut self, trace_id: TraceId, span_id: SpanId) -> Self {
        self.trace_id = Some(trace_id);
        self.span_id = Some(span_id);
        self
    }

    /// Returns the coarse severity level.
    #[must_use]
    pub fn severity(&self) -> Severity {
        Severity::from_number(self.severity_number)
    }
}

impl SignalItem for LogRecord {
    /// Event time, falling back to the observed time when the source did not set one.
    fn timestamp_unix_nano(&self) -> u64 {
        if self.time_unix_nano > 0 {
            self.time_unix_nano
        } else {
            self.observed_time_unix_nano
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> LogRecord {
        LogRecord::new(
            Arc::new(Resource::new()),
            Arc::new(InstrumentationScope::default()),
            "disk almost full",
        )
    }

    #[test]
    fn test_severity_ranges() {
        assert_eq!(Severity::from_number(0), Severity::Unspecified);
        assert_eq!(Severity::from_number(4), Severity::Trace);
        assert_eq!(Severity::from_number(13), Severity::Warn);
        assert_eq!(Severity::from_number(17), Severity::Error);
        assert_eq!(Severity::from_number(24), Severity::Fatal);
        assert_eq!(Severity::from_number(99), Severity::Unspecified);
    }

    #[test]
    fn test_timestamp_falls_back_to_observed_time() {
        let mut r = record();
        r.observed_time_unix_nano = 77;
        assert_eq!(r.timestamp_unix_nano(), 77);

        let r = r.with_time(5);
        assert_eq!(r.timestamp_unix_nano(), 5);
    }

    #[test]
    fn test_trace_context() {
        let r = record().with_trace_context(TraceId([1; 16]), SpanId([2; 8]));
        assert_eq!(r.trace_id, Some(TraceId([1; 16])));
        assert_eq!(r.span_id, Some(SpanId([2; 8])));
    }
}
