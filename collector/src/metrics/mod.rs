//! Self-telemetry for the collector.
//!
//! This module provides the process-wide [`CollectorMetrics`] counters and the
//! [`MemoryMonitor`] that backs the memory limiter. Both are created by the
//! service when it starts and dropped with it.

pub mod counters;
pub mod memory;

pub use counters::{
    CollectorMetrics, ExporterCounters, ExporterSnapshot, MetricsSnapshot, PipelineCounters,
    PipelineSnapshot, ReceiverCounters, ReceiverSnapshot,
};
pub use memory::{CeilingSource, MemoryMonitor, MemorySnapshot};
