//! Tributary Collector
//!
//! This crate provides the telemetry pipeline engine: OTLP receivers feed
//! per-signal pipelines of processors, which hand batches to exporters.
//!
//! # Architecture
//!
//! ```text
//! receivers ──▶ memory limiter ──▶ queue ──▶ workers ──▶ resource ──▶ batch ──▶ fan-out ──▶ exporters
//! (HTTP/gRPC)   (admission)        (bounded)            (transform)  (buffer)              (retrying)
//! ```
//!
//! - [`receivers`]: OTLP/HTTP (axum) and OTLP/gRPC (tonic) endpoints
//! - [`processors`]: memory limiter, resource and batch processors
//! - [`pipeline`]: bounded queues and worker pools
//! - [`exporters`]: `otlphttp` and `debug` exporters with retry and fan-out
//! - [`service`]: the coordinator owning start, drain and stop
//! - [`metrics`]: collector counters and the process memory monitor
//!
//! # Example
//!
//! ```no_run
//! use shared::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file("config.yaml")?;
//!     collector::run(config).await?;
//!     Ok(())
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod exporters;
pub mod grpc;
pub mod metrics;
pub mod pipeline;
pub mod processors;
pub mod receivers;
pub mod routes;
pub mod service;
pub mod telemetry;

pub use service::{Service, ServiceError, ServiceState, ShutdownReport};

use shared::config::Config;

/// Runs the collector until SIGTERM or SIGINT, then drains it.
///
/// # Errors
///
/// Returns a [`ServiceError`] if a component fails to start.
pub async fn run(config: Config) -> Result<ShutdownReport, ServiceError> {
    config.print_config();
    Service::new(config).run_until(shutdown_signal()).await
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
