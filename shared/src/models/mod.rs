//! Signal model for the Tributary pipeline.
//!
//! This module contains the in-memory representation of traces, metrics and
//! logs, and the [`Batch`] type that carries them through a pipeline.

pub mod batch;
pub mod common;
pub mod log;
pub mod metric;
pub mod trace;

pub use batch::{Batch, BatchError};
pub use common::{
    AttributeValue, Attributes, InstrumentationScope, Resource, SignalItem, SignalType, SpanId,
    TraceId,
};
pub use log::{LogRecord, Severity};
pub use metric::{HistogramValue, MetricKind, MetricPoint, PointValue, Temporality};
pub use trace::{Span, SpanEvent, SpanKind, SpanLink, SpanStatus, StatusCode};
