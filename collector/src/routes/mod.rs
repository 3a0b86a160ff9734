//! HTTP route definitions.
//!
//! The OTLP/HTTP receiver endpoints and the health check extension.

mod health;
mod otlp;

pub use health::{health_routes, HealthResponse, HealthState, MetricsResponse, ReadyResponse};
pub use otlp::{otlp_routes, OtlpError, RETRY_AFTER_SECS};
