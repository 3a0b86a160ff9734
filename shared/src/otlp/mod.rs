//! OpenTelemetry Protocol (OTLP) wire codec.
//!
//! Requests arrive either as binary protobuf or as protobuf-JSON. This module
//! decodes both into [`Batch`]es, encodes batches back into export requests
//! and builds the export responses receivers send, including partial success.
//!
//! # Example
//!
//! ```
//! use shared::models::SignalType;
//! use shared::otlp::{decode_request, Encoding};
//!
//! let decoded = decode_request(SignalType::Logs, Encoding::Json, br#"{"resourceLogs":[]}"#).unwrap();
//! assert!(decoded.batches.is_empty());
//! ```

pub mod conversions;

pub use opentelemetry_proto::tonic as proto;

use crate::models::{Batch, SignalType};
use prost::Message;
use proto::collector::logs::v1::{
    ExportLogsPartialSuccess, ExportLogsServiceRequest, ExportLogsServiceResponse,
};
use proto::collector::metrics::v1::{
    ExportMetricsPartialSuccess, ExportMetricsServiceRequest, ExportMetricsServiceResponse,
};
use proto::collector::trace::v1::{
    ExportTracePartialSuccess, ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Content type of binary protobuf payloads.
pub const CONTENT_TYPE_PROTOBUF: &str = "application/x-protobuf";
/// Content type of protobuf-JSON payloads.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Wire encoding of an OTLP payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    /// Binary protobuf.
    #[default]
    Protobuf,
    /// Protobuf-JSON mapping.
    Json,
}

impl Encoding {
    /// The content type to send with this encoding.
    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Protobuf => CONTENT_TYPE_PROTOBUF,
            Self::Json => CONTENT_TYPE_JSON,
        }
    }

    /// Maps a `Content-Type` header value to an encoding.
    ///
    /// Parameters such as `charset` are ignored. Returns `None` for anything
    /// other than protobuf or JSON.
    #[must_use]
    pub fn from_content_type(value: &str) -> Option<Self> {
        let media_type = value.split(';').next().unwrap_or_default().trim();
        if media_type.eq_ignore_ascii_case(CONTENT_TYPE_PROTOBUF) {
            Some(Self::Protobuf)
        } else if media_type.eq_ignore_ascii_case(CONTENT_TYPE_JSON) {
            Some(Self::Json)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Protobuf => write!(f, "protobuf"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Errors produced while decoding an OTLP payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The protobuf payload is malformed.
    #[error("invalid protobuf payload: {0}")]
    Protobuf(#[from] prost::DecodeError),

    /// The JSON payload is malformed.
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    /// A trace ID did not have 16 bytes.
    #[error("trace id must be 16 bytes, got {len}")]
    InvalidTraceId {
        /// Actual length.
        len: usize,
    },

    /// A span ID did not have 8 bytes.
    #[error("span id must be 8 bytes, got {len}")]
    InvalidSpanId {
        /// Actual length.
        len: usize,
    },
}

/// Errors produced while encoding an OTLP payload.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// JSON serialization failed.
    #[error("JSON encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result of decoding one export request.
#[derive(Debug, Default)]
pub struct Decoded {
    /// One batch per resource block that contained items, in request order.
    pub batches: Vec<Batch>,
    /// Items the request carried that cannot be represented and were dropped.
    pub rejected: usize,
}

impl Decoded {
    /// Total number of decoded items.
    #[must_use]
    pub fn item_count(&self) -> usize {
        self.batches.iter().map(Batch::len).sum()
    }
}

/// Partial success reported in an export response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PartialSuccess {
    /// Number of items the server rejected.
    pub rejected: i64,
    /// Server-provided explanation.
    pub message: String,
}

fn decode_message<T>(encoding: Encoding, body: &[u8]) -> Result<T, DecodeError>
where
    T: Message + Default + DeserializeOwned,
{
    match encoding {
        Encoding::Protobuf => Ok(T::decode(body)?),
        Encoding::Json => Ok(serde_json::from_slice(body)?),
    }
}

fn encode_message<T>(encoding: Encoding, message: &T) -> Result<Vec<u8>, EncodeError>
where
    T: Message + Serialize,
{
    match encoding {
        Encoding::Protobuf => Ok(message.encode_to_vec()),
        Encoding::Json => Ok(serde_json::to_vec(message)?),
    }
}

/// Decodes an export request body for `signal`.
///
/// # Errors
///
/// Returns a [`DecodeError`] if the body is not a valid export request of
/// that signal in the given encoding.
pub fn decode_request(
    signal: SignalType,
    encoding: Encoding,
    body: &[u8],
) -> Result<Decoded, DecodeError> {
    match signal {
        SignalType::Traces => {
            conversions::decode_traces(&decode_message::<ExportTraceServiceRequest>(encoding, body)?)
        }
        SignalType::Metrics => conversions::decode_metrics(
            &decode_message::<ExportMetricsServiceRequest>(encoding, body)?,
        ),
        SignalType::Logs => {
            conversions::decode_logs(&decode_message::<ExportLogsServiceRequest>(encoding, body)?)
        }
    }
}

/// Encodes a batch as an export request body.
///
/// # Errors
///
/// Returns an [`EncodeError`] if JSON serialization fails.
pub fn encode_batch(batch: &Batch, encoding: Encoding) -> Result<Vec<u8>, EncodeError> {
    match batch {
        Batch::Traces(spans) => encode_message(encoding, &conversions::spans_to_request(spans)),
        Batch::Metrics(points) => encode_message(encoding, &conversions::points_to_request(points)),
        Batch::Logs(records) => encode_message(encoding, &conversions::logs_to_request(records)),
    }
}

/// Encodes an export response for `signal`.
///
/// A partial success block is included only when `rejected` is non-zero or
/// a message is given.
///
/// # Errors
///
/// Returns an [`EncodeError`] if JSON serialization fails.
pub fn encode_response(
    signal: SignalType,
    encoding: Encoding,
    partial: Option<&PartialSuccess>,
) -> Result<Vec<u8>, EncodeError> {
    let partial = partial.filter(|p| p.rejected > 0 || !p.message.is_empty());
    match signal {
        SignalType::Traces => encode_message(
            encoding,
            &ExportTraceServiceResponse {
                partial_success: partial.map(|p| ExportTracePartialSuccess {
                    rejected_spans: p.rejected,
                    error_message: p.message.clone(),
                }),
            },
        ),
        SignalType::Metrics => encode_message(
            encoding,
            &ExportMetricsServiceResponse {
                partial_success: partial.map(|p| ExportMetricsPartialSuccess {
                    rejected_data_points: p.rejected,
                    error_message: p.message.clone(),
                }),
            },
        ),
        SignalType::Logs => encode_message(
            encoding,
            &ExportLogsServiceResponse {
                partial_success: partial.map(|p| ExportLogsPartialSuccess {
                    rejected_log_records: p.rejected,
                    error_message: p.message.clone(),
                }),
            },
        ),
    }
}

/// Decodes an export response body, returning its partial success block.
///
/// An empty body is treated as full success.
///
/// # Errors
///
/// Returns a [`DecodeError`] if the body is not a valid export response.
pub fn decode_response(
    signal: SignalType,
    encoding: Encoding,
    body: &[u8],
) -> Result<Option<PartialSuccess>, DecodeError> {
    if body.is_empty() {
        return Ok(None);
    }
    let partial = match signal {
        SignalType::Traces => decode_message::<ExportTraceServiceResponse>(encoding, body)?
            .partial_success
            .map(|p| PartialSuccess {
                rejected: p.rejected_spans,
                message: p.error_message,
            }),
        SignalType::Metrics => decode_message::<ExportMetricsServiceResponse>(encoding, body)?
            .partial_success
            .map(|p| PartialSuccess {
                rejected: p.rejected_data_points,
                message: p.error_message,
            }),
        SignalType::Logs => decode_message::<ExportLogsServiceResponse>(encoding, body)?
            .partial_success
            .map(|p| PartialSuccess {
                rejected: p.rejected_log_records,
                message: p.error_message,
            }),
    };
    Ok(partial.filter(|p| p.rejected > 0 || !p.message.is_empty()))
}
