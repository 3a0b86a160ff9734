//! Span data model.
//!
//! Defines the trace signal item carried through the pipeline.

use super::common::{AttributeValue, Attributes, InstrumentationScope, Resource, SignalItem, SpanId, TraceId};
use chrono::Duration;
use std::sync::Arc;

/// Kind of span, mirroring the OTLP enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SpanKind {
    /// Kind was not set by the sender.
    #[default]
    Unspecified,
    /// Internal operation.
    Internal,
    /// Server handling a request.
    Server,
    /// Client making a request.
    Client,
    /// Producer sending a message.
    Producer,
    /// Consumer receiving a message.
    Consumer,
}

impl std::fmt::Display for SpanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unspecified => write!(f, "unspecified"),
            Self::Internal => write!(f, "internal"),
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
            Self::Producer => write!(f, "producer"),
            Self::Consumer => write!(f, "consumer"),
        }
    }
}

/// Status code of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StatusCode {
    /// Status was not set.
    #[default]
    Unset,
    /// The operation completed successfully.
    Ok,
    /// The operation failed.
    Error,
}

/// Status of a span: a code and an optional message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpanStatus {
    /// The status code.
    pub code: StatusCode,
    /// Developer-facing description, usually only set for errors.
    pub message: String,
}

impl SpanStatus {
    /// An error status with a message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            code: StatusCode::Error,
            message: message.into(),
        }
    }
}

/// A timed event within a span.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpanEvent {
    /// Event name.
    pub name: String,
    /// When the event occurred, nanoseconds since the Unix epoch.
    pub time_unix_nano: u64,
    /// Event attributes.
    pub attributes: Attributes,
    /// Number of attributes dropped by the sender.
    pub dropped_attributes_count: u32,
}

/// A link from a span to another span.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SpanLink {
    /// Trace of the linked span.
    pub trace_id: TraceId,
    /// The linked span.
    pub span_id: SpanId,
    /// W3C trace state of the linked span.
    pub trace_state: String,
    /// Link attributes.
    pub attributes: Attributes,
    /// Number of attributes dropped by the sender.
    pub dropped_attributes_count: u32,
    /// Trace flags.
    pub flags: u32,
}

/// A span representing a unit of work in a distributed trace.
///
/// # Example
///
/// ```
/// use shared::models::{InstrumentationScope, Resource, Span, SpanId, SpanKind, TraceId};
/// use std::sync::Arc;
///
/// let resource = Arc::new(Resource::new().with_attribute("service.name", "api"));
/// let scope = Arc::new(InstrumentationScope::new("http", "1.0"));
///
/// let span = Span::new(resource, scope, TraceId([1; 16]), SpanId([2; 8]), "GET /users")
///     .with_kind(SpanKind::Server)
///     .with_times(1_000, 5_000)
///     .with_attribute("http.method", "GET");
///
/// assert_eq!(span.duration().num_nanoseconds(), Some(4_000));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Span {
    /// Origin of the span.
    pub resource: Arc<Resource>,
    /// Library that produced the span.
    pub scope: Arc<InstrumentationScope>,
    /// Trace this span belongs to.
    pub trace_id: TraceId,
    /// This span's identifier.
    pub span_id: SpanId,
    /// Parent span, `None` for root spans.
    pub parent_span_id: Option<SpanId>,
    /// W3C trace state.
    pub trace_state: String,
    /// Trace flags.
    pub flags: u32,
    /// Operation name.
    pub name: String,
    /// Span kind.
    pub kind: SpanKind,
    /// Start time, nanoseconds since the Unix epoch.
    pub start_time_unix_nano: u64,
    /// End time, nanoseconds since the Unix epoch.
    pub end_time_unix_nano: u64,
    /// Span attributes.
    pub attributes: Attributes,
    /// Number of attributes dropped by the sender.
    pub dropped_attributes_count: u32,
    /// Events recorded during the span.
    pub events: Vec<SpanEvent>,
    /// Number of events dropped by the sender.
    pub dropped_events_count: u32,
    /// Links to other spans.
    pub links: Vec<SpanLink>,
    /// Number of links dropped by the sender.
    pub dropped_links_count: u32,
    /// Completion status.
    pub status: SpanStatus,
}

impl Span {
    /// Creates a span with zero timestamps and no attributes.
    #[must_use]
    pub fn new(
        resource: Arc<Resource>,
        scope: Arc<InstrumentationScope>,
        trace_id: TraceId,
        span_id: SpanId,
        name: impl Into<String>,
    ) -> Self {
        Self {
            resource,
            scope,
            trace_id,
            span_id,
            parent_span_id: None,
            trace_state: String::new(),
            flags: 0,
            name: name.into(),
            kind: SpanKind::default(),
            start_time_unix_nano: 0,
            end_time_unix_nano: 0,
            attributes: Attributes::new(),
            dropped_attributes_count: 0,
            events: Vec::new(),
            dropped_events_count: 0,
            links: Vec::new(),
            dropped_links_count: 0,
            status: SpanStatus::default(),
        }
    }

    /// Sets the parent span ID.
    #[must_use]
    pub fn with_parent(mut self, parent_span_id: SpanId) -> Self {
        self.parent_span_id = Some(parent_span_id);
        self
    }

    /// Sets the span kind.
    #[must_use]
    pub fn with_kind(mut self, kind: SpanKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the span status.
    #[must_use]
    pub fn with_status(mut self, status: SpanStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets start and end time in nanoseconds since the Unix epoch.
    #[must_use]
    pub fn with_times(mut self, start_time_unix_nano: u64, end_time_unix_nano: u64) -> Self {
        self.start_time_unix_nano = start_time_unix_nano;
        self.end_time_unix_nano = end_time_unix_nano;
        self
    }

    /// Adds an attribute to the span.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Adds an event to the span.
    #[must_use]
    pub fn with_event(mut self, name: impl Into<String>, time_unix_nano: u64) -> Self {
        self.events.push(SpanEvent {
            name: name.into(),
            time_unix_nano,
            ..SpanEvent::default()
        });
        self
    }

    /// Returns the duration of the span.
    #[must_use]
    pub fn duration(&self) -> Duration {
        let nanos = self
            .end_time_unix_nano
            .saturating_sub(self.start_time_unix_nano);
        Duration::nanoseconds(i64::try_from(nanos).unwrap_or(i64::MAX))
    }

    /// Returns true if this is a root span (no parent).
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_none()
    }
}

impl SignalItem for Span {
    fn timestamp_unix_nano(&self) -> u64 {
        self.start_time_unix_nano
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

    fn span() -> Span {
        Span::new(
            Arc::new(Resource::new().with_attribute("service.name", "api")),
            Arc::new(InstrumentationScope::default()),
            TraceId([7; 16]),
            SpanId([9; 8]),
            "GET /api/users",
        )
    }

    #[test]
    fn test_span_builder() {
        let span = span()
            .with_kind(SpanKind::Client)
            .with_parent(SpanId([1; 8]))
            .with_status(SpanStatus::error("boom"))
            .with_event("retry", 10);

        assert_eq!(span.kind, SpanKind::Client);
        assert!(!span.is_root());
        assert_eq!(span.status.code, StatusCode::Error);
        assert_eq!(span.events.len(), 1);
    }

    #[test]
    fn test_span_timestamp_is_start_time() {
        let span = span().with_times(1_700_000_000_000_000_000, 1_700_000_001_000_000_000);

        assert_eq!(span.timestamp().timestamp(), 1_700_000_000);
        assert_eq!(span.duration().num_seconds(), 1);
    }

    #[test]
    fn test_duration_never_negative() {
        let span = span().with_times(10, 5);
        assert_eq!(span.duration().num_nanoseconds(), Some(0));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(SpanKind::Server.to_string(), "server");
        assert_eq!(SpanKind::Unspecified.to_string(), "unspecified");
    }
}
