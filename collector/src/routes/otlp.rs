//! OTLP HTTP receiver endpoints.
//!
//! Accepts protobuf (`application/x-protobuf`) and JSON (`application/json`)
//! export requests, optionally gzip-compressed, and answers in the encoding
//! of the request.
//!
//! # Endpoints
//!
//! - `POST /v1/traces` - Ingest OTLP traces
//! - `POST /v1/metrics` - Ingest OTLP metrics
//! - `POST /v1/logs` - Ingest OTLP logs
//!
//! Only endpoints of signals the receiver has a pipeline for are mounted.

use crate::pipeline::ConsumeError;
use crate::receivers::Consumers;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use shared::models::SignalType;
use shared::otlp::{decode_request, encode_response, Encoding};
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::trace::TraceLayer;

/// Seconds a refused sender is asked to wait before retrying.
pub const RETRY_AFTER_SECS: u64 = 5;

/// Error response for OTLP endpoints.
#[derive(Debug, Serialize, Deserialize)]
pub struct OtlpError {
    /// HTTP status code.
    pub code: u16,
    /// Error message.
    pub message: String,
}

fn error_response(status: StatusCode, message: String) -> Response {
    (
        status,
        Json(OtlpError {
            code: status.as_u16(),
            message,
        }),
    )
        .into_response()
}

/// Creates the OTLP routes for the signals `consumers` accepts.
pub fn otlp_routes(consumers: Consumers, max_body_size: usize) -> Router {
    let mut router = Router::new();
    if consumers.accepts(SignalType::Traces) {
        router = router.route("/v1/traces", post(ingest_traces));
    }
    if consumers.accepts(SignalType::Metrics) {
        router = router.route("/v1/metrics", post(ingest_metrics));
    }
    if consumers.accepts(SignalType::Logs) {
        router = router.route("/v1/logs", post(ingest_logs));
    }
    router
        .layer(DefaultBodyLimit::max(max_body_size))
        .layer(RequestDecompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(consumers)
}

async fn ingest_traces(State(consumers): State<Consumers>, headers: HeaderMap, body: Bytes) -> Response {
    ingest(&consumers, SignalType::Traces, &headers, &body)
}

async fn ingest_metrics(State(consumers): State<Consumers>, headers: HeaderMap, body: Bytes) -> Response {
    ingest(&consumers, SignalType::Metrics, &headers, &body)
}

async fn ingest_logs(State(consumers): State<Consumers>, headers: HeaderMap, body: Bytes) -> Response {
    ingest(&consumers, SignalType::Logs, &headers, &body)
}

/// Decodes one export request and hands it to the pipelines.
fn ingest(consumers: &Consumers, signal: SignalType, headers: &HeaderMap, body: &[u8]) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let Some(encoding) = Encoding::from_content_type(content_type) else {
        consumers.record_decode_failure();
        return error_response(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            format!("unsupported content type {content_type:?}"),
        );
    };

    let decoded = match decode_request(signal, encoding, body) {
        Ok(decoded) => decoded,
        Err(e) => {
            consumers.record_decode_failure();
            tracing::warn!(
                receiver = %consumers.receiver(),
                signal = %signal,
                error = %e,
                "Rejected OTLP/HTTP request"
            );
            return error_response(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    let partial = match consumers.consume(signal, decoded) {
        Ok(partial) => partial,
        Err(ConsumeError::NoPipeline(signal)) => {
            return error_response(StatusCode::NOT_FOUND, format!("no pipeline accepts {signal}"));
        }
        Err(e) => {
            let mut response = error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string());
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(RETRY_AFTER_SECS));
            return response;
        }
    };

    match encode_response(signal, encoding, partial.as_ref()) {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, encoding.content_type())],
            bytes,
        )
            .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
