//! OTLP/HTTP exporter tests against a local sink.

use super::common::logs;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use collector::exporters::{
    Delivery, ExportResult, Exporter, OtlpHttpExporter, RetryPolicy, RetryingExporter,
};
use collector::metrics::ExporterCounters;
use shared::config::{AuthConfig, OtlpHttpExporterConfig, WireEncoding};
use shared::models::SignalType;
use shared::otlp::{decode_request, Encoding};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One request received by the sink.
#[derive(Debug, Clone)]
struct Captured {
    path: String,
    headers: HeaderMap,
    body: Bytes,
}

/// An OTLP/HTTP endpoint that records requests and answers with scripted
/// status codes, then 200.
#[derive(Default)]
struct Sink {
    requests: Mutex<Vec<Captured>>,
    statuses: Mutex<VecDeque<StatusCode>>,
}

impl Sink {
    fn requests(&self) -> Vec<Captured> {
        self.requests.lock().unwrap().clone()
    }
}

async fn capture(State(sink): State<Arc<Sink>>, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    sink.requests.lock().unwrap().push(Captured {
        path: uri.path().to_string(),
        headers,
        body,
    });
    let status = sink
        .statuses
        .lock()
        .unwrap()
        .pop_front()
        .unwrap_or(StatusCode::OK);
    if status.is_success() {
        status.into_response()
    } else {
        (status, "sink says no").into_response()
    }
}

async fn spawn_sink(statuses: Vec<StatusCode>) -> (SocketAddr, Arc<Sink>) {
    let sink = Arc::new(Sink {
        statuses: Mutex::new(statuses.into()),
        ..Sink::default()
    });
    let app = Router::new().fallback(capture).with_state(Arc::clone(&sink));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, sink)
}

fn exporter(config: &OtlpHttpExporterConfig) -> OtlpHttpExporter {
    OtlpHttpExporter::new("otlphttp/test".parse().unwrap(), config).unwrap()
}

#[tokio::test]
async fn test_protobuf_export_is_decodable() {
    let (addr, sink) = spawn_sink(Vec::new()).await;
    let exporter = exporter(&OtlpHttpExporterConfig::new(format!("http://{addr}")));

    let result = exporter.export(&logs("checkout", "log ", 3)).await;
    assert_eq!(result, ExportResult::Success);

    let requests = sink.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/v1/logs");
    assert_eq!(requests[0].headers["content-type"], "application/x-protobuf");
    let decoded = decode_request(SignalType::Logs, Encoding::Protobuf, &requests[0].body).unwrap();
    assert_eq!(decoded.item_count(), 3);
}

#[tokio::test]
async fn test_json_export() {
    let (addr, sink) = spawn_sink(Vec::new()).await;
    let mut config = OtlpHttpExporterConfig::new(format!("http://{addr}"));
    config.encoding = WireEncoding::Json;

    let result = exporter(&config).export(&logs("checkout", "log ", 2)).await;
    assert_eq!(result, ExportResult::Success);

    let requests = sink.requests();
    assert_eq!(requests[0].headers["content-type"], "application/json");
    let decoded = decode_request(SignalType::Logs, Encoding::Json, &requests[0].body).unwrap();
    assert_eq!(decoded.item_count(), 2);
}

#[tokio::test]
async fn test_credentials_and_headers() {
    let (addr, sink) = spawn_sink(Vec::new()).await;

    let mut bearer = OtlpHttpExporterConfig::new(format!("http://{addr}"));
    bearer.auth = Some(AuthConfig::BearerToken("s3cret".to_string()));
    bearer
        .headers
        .insert("x-tenant".to_string(), "acme".to_string());
    exporter(&bearer).export(&logs("checkout", "log ", 1)).await;

    let mut basic = OtlpHttpExporterConfig::new(format!("http://{addr}"));
    basic.auth = Some(AuthConfig::Basic {
        username: "user".to_string(),
        password: "pass".to_string(),
    });
    exporter(&basic).export(&logs("checkout", "log ", 1)).await;

    let requests = sink.requests();
    assert_eq!(requests[0].headers["authorization"], "Bearer s3cret");
    assert_eq!(requests[0].headers["x-tenant"], "acme");
    assert_eq!(requests[1].headers["authorization"], "Basic dXNlcjpwYXNz");
    assert!(requests[1].headers.get("x-tenant").is_none());
}

#[tokio::test]
async fn test_signal_endpoint_override() {
    let (addr, sink) = spawn_sink(Vec::new()).await;
    let mut config = OtlpHttpExporterConfig::new(format!("http://{addr}/base/"));
    config.logs_endpoint = Some(format!("http://{addr}/ingest/logs"));
    let exporter = exporter(&config);

    assert!(exporter.supports(SignalType::Traces));
    exporter.export(&logs("checkout", "log ", 1)).await;
    assert_eq!(sink.requests()[0].path, "/ingest/logs");
}

#[tokio::test]
async fn test_unauthorized_is_permanent() {
    let (addr, sink) = spawn_sink(vec![StatusCode::UNAUTHORIZED]).await;
    let exporter = exporter(&OtlpHttpExporterConfig::new(format!("http://{addr}")));

    let result = exporter.export(&logs("checkout", "log ", 1)).await;
    let ExportResult::PermanentFailure { reason } = result else {
        panic!("expected permanent failure, got {result:?}")
    };
    assert!(reason.contains("401"), "{reason}");
    assert!(reason.contains("sink says no"), "{reason}");
    assert!(!exporter.is_healthy());
    assert_eq!(sink.requests().len(), 1);
}

#[tokio::test]
async fn test_unavailable_sink_is_retried_until_accepted() {
    let (addr, sink) = spawn_sink(vec![StatusCode::SERVICE_UNAVAILABLE]).await;
    let inner = Arc::new(exporter(&OtlpHttpExporterConfig::new(format!("http://{addr}"))));
    let counters = Arc::new(ExporterCounters::default());
    let retrying = RetryingExporter::new(
        "otlphttp/test".parse().unwrap(),
        Arc::clone(&inner) as Arc<dyn Exporter>,
        RetryPolicy {
            initial_interval: Duration::from_millis(10),
            randomization_factor: 0.0,
            ..RetryPolicy::default()
        },
        Duration::from_secs(5),
        Arc::clone(&counters),
    );

    let delivery = retrying.deliver(&logs("checkout", "log ", 4)).await;
    assert_eq!(delivery, Delivery::Delivered { attempts: 2 });
    assert_eq!(sink.requests().len(), 2);
    assert!(inner.is_healthy());

    let snapshot = counters.snapshot();
    assert_eq!(snapshot.sent_items, 4);
    assert_eq!(snapshot.failed_attempts, 1);
    assert_eq!(snapshot.retries, 1);
}

#[tokio::test]
async fn test_unreachable_sink_is_retryable() {
    // Bind and drop to get a port nobody listens on
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let exporter = exporter(&OtlpHttpExporterConfig::new(format!("http://{addr}")));
    let result = exporter.export(&logs("checkout", "log ", 1)).await;
    assert!(matches!(result, ExportResult::RetryableFailure { .. }), "{result:?}");
    assert!(!exporter.is_healthy());
}
