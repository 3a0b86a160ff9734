//! Health check extension endpoints.
//!
//! Read-only introspection for load balancers and operators:
//!
//! - `GET /health` - liveness
//! - `GET /ready` - readiness; 503 unless running and no memory limiter refuses data
//! - `GET /metrics` - counter and memory snapshot

use crate::metrics::{CollectorMetrics, MemoryMonitor, MemorySnapshot, MetricsSnapshot};
use crate::processors::{LimiterState, MemoryLimiter};
use crate::service::{ServiceState, StateCell};
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// What the health endpoints read.
#[derive(Debug, Clone)]
pub struct HealthState {
    /// Collector lifecycle state.
    pub state: Arc<StateCell>,
    /// Memory limiters in use.
    pub limiters: Vec<Arc<MemoryLimiter>>,
    /// Collector counters.
    pub metrics: Arc<CollectorMetrics>,
    /// Process memory monitor.
    pub monitor: Arc<MemoryMonitor>,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status (always "healthy" if reachable).
    pub status: &'static str,
    /// Service name.
    pub service: &'static str,
    /// Service version.
    pub version: &'static str,
}

/// Readiness response.
#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    /// Whether the collector accepts data.
    pub ready: bool,
    /// Lifecycle state.
    pub state: ServiceState,
    /// State of each memory limiter.
    pub limiters: BTreeMap<String, LimiterState>,
}

/// Metrics response.
#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    /// Lifecycle state.
    pub state: ServiceState,
    /// Process memory figures.
    pub memory: MemorySnapshot,
    /// Collector counters.
    #[serde(flatten)]
    pub counters: MetricsSnapshot,
}

/// Creates the health check routes.
pub fn health_routes(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .with_state(state)
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "tributary-collector",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn ready(State(health): State<HealthState>) -> (StatusCode, Json<ReadyResponse>) {
    let state = health.state.get();
    let limiters: BTreeMap<String, LimiterState> = health
        .limiters
        .iter()
        .map(|l| (l.id().to_string(), l.state()))
        .collect();
    let ready = state == ServiceState::Running && limiters.values().all(|s| s.admits());

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadyResponse {
            ready,
            state,
            limiters,
        }),
    )
}

async fn metrics(State(health): State<HealthState>) -> Json<MetricsResponse> {
    Json(MetricsResponse {
        state: health.state.get(),
        memory: health.monitor.snapshot(),
        counters: health.metrics.snapshot(),
    })
}
