//! OTLP/HTTP exporter.
//!
//! Sends each batch as an `Export*ServiceRequest` to the signal's endpoint,
//! in binary protobuf or protobuf-JSON, with optional bearer or basic
//! credentials and extra static headers.

use super::{ExportResult, Exporter, ExporterError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use shared::config::{AuthConfig, ComponentId, OtlpHttpExporterConfig, WireEncoding};
use shared::models::{Batch, SignalType};
use shared::otlp::{decode_response, encode_batch, Encoding};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

// Longest error body quoted in a failure reason
const MAX_REASON_BODY: usize = 256;

/// Exporter speaking OTLP over HTTP.
pub struct OtlpHttpExporter {
    id: ComponentId,
    client: Client,
    endpoints: BTreeMap<SignalType, String>,
    encoding: Encoding,
    auth: Option<AuthConfig>,
    healthy: AtomicBool,
}

impl std::fmt::Debug for OtlpHttpExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtlpHttpExporter")
            .field("id", &self.id)
            .field("endpoints", &self.endpoints)
            .field("encoding", &self.encoding)
            .finish_non_exhaustive()
    }
}

impl OtlpHttpExporter {
    /// Creates the exporter and its HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an [`ExporterError`] if an endpoint is not a valid URL, a
    /// header is malformed or the client cannot be built.
    pub fn new(id: ComponentId, config: &OtlpHttpExporterConfig) -> Result<Self, ExporterError> {
        let mut endpoints = BTreeMap::new();
        for signal in SignalType::ALL {
            if let Some(endpoint) = config.signal_endpoint(signal) {
                reqwest::Url::parse(&endpoint).map_err(|e| {
                    ExporterError::Config(format!("invalid {signal} endpoint {endpoint:?}: {e}"))
                })?;
                endpoints.insert(signal, endpoint);
            }
        }

        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ExporterError::Config(format!("invalid header name {name:?}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ExporterError::Config(format!("invalid value for header {name}: {e}")))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()?;

        let encoding = match config.encoding {
            WireEncoding::Proto => Encoding::Protobuf,
            WireEncoding::Json => Encoding::Json,
        };

        info!(
            exporter = %id,
            endpoints = ?endpoints.values().collect::<Vec<_>>(),
            encoding = %encoding,
            "OTLP/HTTP exporter initialized"
        );

        Ok(Self {
            id,
            client,
            endpoints,
            encoding,
            auth: config.auth.clone(),
            healthy: AtomicBool::new(true),
        })
    }

    /// Whether the last attempt reached the sink and succeeded.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    fn mark_healthy(&self) {
        if !self.healthy.swap(true, Ordering::SeqCst) {
            info!(exporter = %self.id, "Export endpoint recovered");
        }
    }

    fn mark_unhealthy(&self) {
        if self.healthy.swap(false, Ordering::SeqCst) {
            warn!(exporter = %self.id, "Export endpoint unhealthy");
        }
    }

    async fn send(&self, endpoint: &str, signal: SignalType, body: Vec<u8>) -> ExportResult {
        let mut request = self
            .client
            .post(endpoint)
            .header(CONTENT_TYPE, self.encoding.content_type())
            .body(body);
        request = match &self.auth {
            Some(AuthConfig::BearerToken(token)) => request.bearer_auth(token),
            Some(AuthConfig::Basic { username, password }) => {
                request.basic_auth(username, Some(password))
            }
            None => request,
        };

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                self.mark_unhealthy();
                return ExportResult::retryable(format!("request to {endpoint} failed: {e}"));
            }
        };

        let status = response.status();
        let retry_after = parse_retry_after(response.headers().get(RETRY_AFTER));
        let body = response.bytes().await.unwrap_or_default();

        if status.is_success() {
            self.mark_healthy();
            match decode_response(signal, self.encoding, &body) {
                Ok(Some(partial)) => warn!(
                    exporter = %self.id,
                    rejected = partial.rejected,
                    message = %partial.message,
                    "Sink accepted the batch partially"
                ),
                Ok(None) => {}
                Err(e) => warn!(exporter = %self.id, error = %e, "Could not decode export response"),
            }
            return ExportResult::Success;
        }

        self.mark_unhealthy();
        classify_failure(status, retry_after, &body)
    }
}

/// Reads a `Retry-After` header given in seconds.
fn parse_retry_after(value: Option<&HeaderValue>) -> Option<Duration> {
    value
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Maps a non-2xx response to an export result.
///
/// 408, 429 and 5xx are transient; every other status is permanent.
fn classify_failure(status: StatusCode, retry_after: Option<Duration>, body: &[u8]) -> ExportResult {
    let text = String::from_utf8_lossy(body);
    let mut reason = format!("HTTP {}", status.as_u16());
    if !text.trim().is_empty() {
        let snippet: String = text.chars().take(MAX_REASON_BODY).collect();
        reason = format!("{reason}: {}", snippet.trim());
    }

    let retryable = status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error();
    if retryable {
        ExportResult::RetryableFailure {
            reason,
            retry_after,
        }
    } else {
        ExportResult::PermanentFailure { reason }
    }
}

#[async_trait]
impl Exporter for OtlpHttpExporter {
    fn supports(&self, signal: SignalType) -> bool {
        self.endpoints.contains_key(&signal)
    }

    async fn export(&self, batch: &Batch) -> ExportResult {
        if batch.is_empty() {
            return ExportResult::Success;
        }
        let signal = batch.signal_type();
        let Some(endpoint) = self.endpoints.get(&signal) else {
            return ExportResult::permanent(format!("no endpoint configured for {signal}"));
        };
        let body = match encode_batch(batch, self.encoding) {
            Ok(body) => body,
            Err(e) => return ExportResult::permanent(format!("cannot encode batch: {e}")),
        };
        self.send(endpoint, signal, body).await
    }
}
