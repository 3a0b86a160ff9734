//! OTLP gRPC receiver services.
//!
//! Each service decodes its export request into batches and hands them to
//! the receiver's pipelines. Malformed requests are answered with
//! `InvalidArgument`; backpressure with `Unavailable`, which OTLP clients
//! retry.

mod services;

pub use services::{LogsServiceImpl, MetricsServiceImpl, TracesServiceImpl};
