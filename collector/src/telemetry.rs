//! The collector's own logs.

use shared::config::{LogEncoding, LogsTelemetryConfig};
use thiserror::Error;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

/// Errors installing the log subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The configured level is not a valid filter directive.
    #[error("invalid log level: {0}")]
    Filter(#[from] ParseError),

    /// A global subscriber is already installed.
    #[error("failed to install log subscriber: {0}")]
    Init(String),
}

/// Builds the log filter. `RUST_LOG` takes precedence over `level`.
///
/// # Errors
///
/// Returns a [`ParseError`] if `level` is not a valid directive.
pub fn env_filter(level: &str) -> Result<EnvFilter, ParseError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(level),
    }
}

/// Installs the global subscriber described by `config`.
///
/// # Errors
///
/// Returns a [`TelemetryError`] if the level is invalid or a subscriber is
/// already installed.
pub fn init(config: &LogsTelemetryConfig) -> Result<(), TelemetryError> {
    let filter = env_filter(&config.level)?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match config.encoding {
        LogEncoding::Text => builder.try_init(),
        LogEncoding::Json => builder.json().try_init(),
    };
    result.map_err(|e| TelemetryError::Init(e.to_string()))
}
