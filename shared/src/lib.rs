//! Tributary Shared Library
//!
//! This crate contains the types shared by the Tributary collector and its
//! command line tool.
//!
//! # Modules
//!
//! - [`models`] - Signal model for traces, metrics and logs, and the [`models::Batch`] union
//! - [`otlp`] - OTLP protobuf/JSON wire codec
//! - [`config`] - Collector configuration loading and validation
//!
//! # Example
//!
//! ```
//! use shared::models::{Batch, InstrumentationScope, LogRecord, Resource, SignalType};
//! use std::sync::Arc;
//!
//! let resource = Arc::new(Resource::new().with_attribute("service.name", "auth-service"));
//! let record = LogRecord::new(resource, Arc::new(InstrumentationScope::default()), "User logged in")
//!     .with_severity(9)
//!     .with_attribute("user_id", "12345");
//!
//! let batch = Batch::from(vec![record]);
//! assert_eq!(batch.signal_type(), SignalType::Logs);
//! assert_eq!(batch.len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod models;
pub mod otlp;

/// Re-export common dependencies for convenience.
pub use chrono;
pub use serde;
pub use serde_json;
