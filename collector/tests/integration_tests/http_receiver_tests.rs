//! OTLP/HTTP receiver tests against a bound listener.

use super::common::{logs_body, start, wait_until, Recorder, MIB};
use collector::routes::{OtlpError, RETRY_AFTER_SECS};
use collector::Service;
use prost::Message;
use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::StatusCode;
use shared::models::SignalType;
use shared::otlp::proto::collector::metrics::v1::ExportMetricsServiceRequest;
use shared::otlp::proto::common::v1::{any_value, AnyValue, KeyValue};
use shared::otlp::proto::metrics::v1::{
    metric::Data, number_data_point, summary_data_point::ValueAtQuantile, Gauge, Metric,
    NumberDataPoint, ResourceMetrics, ScopeMetrics, Summary, SummaryDataPoint,
};
use shared::otlp::proto::resource::v1::Resource;
use shared::otlp::{decode_response, Encoding};
use std::net::SocketAddr;
use std::time::Duration;

const CONFIG: &str = r"
receivers:
  otlp:
    protocols:
      http:
        endpoint: 127.0.0.1:0
processors:
  memory_limiter:
    check_interval: 10ms
    limit_mib: 800
    spike_limit_mib: 100
exporters:
  debug: {}
service:
  drain_timeout: 2s
  pipelines:
    logs:
      receivers: [otlp]
      processors: [memory_limiter]
      exporters: [debug]
    metrics:
      receivers: [otlp]
      exporters: [debug]
";

fn http_addr(service: &Service) -> SocketAddr {
    service
        .receiver_addrs(&"otlp".parse().unwrap())
        .and_then(|addrs| addrs.http)
        .unwrap()
}

async fn post(addr: SocketAddr, path: &str, encoding: Encoding, body: Vec<u8>) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("http://{addr}{path}"))
        .header(CONTENT_TYPE, encoding.content_type())
        .body(body)
        .send()
        .await
        .unwrap()
}

/// One gauge point and one summary point for the same resource.
fn mixed_metrics_request() -> ExportMetricsServiceRequest {
    let gauge = Metric {
        name: "queue.depth".to_string(),
        data: Some(Data::Gauge(Gauge {
            data_points: vec![NumberDataPoint {
                time_unix_nano: 1_700_000_000_000_000_000,
                value: Some(number_data_point::Value::AsInt(12)),
                ..Default::default()
            }],
        })),
        ..Default::default()
    };
    let summary = Metric {
        name: "request.latency".to_string(),
        data: Some(Data::Summary(Summary {
            data_points: vec![SummaryDataPoint {
                count: 3,
                sum: 0.6,
                quantile_values: vec![ValueAtQuantile {
                    quantile: 0.5,
                    value: 0.2,
                }],
                ..Default::default()
            }],
        })),
        ..Default::default()
    };
    ExportMetricsServiceRequest {
        resource_metrics: vec![ResourceMetrics {
            resource: Some(Resource {
                attributes: vec![KeyValue {
                    key: "service.name".to_string(),
                    value: Some(AnyValue {
                        value: Some(any_value::Value::StringValue("checkout".to_string())),
                    }),
                }],
                ..Default::default()
            }),
            scope_metrics: vec![ScopeMetrics {
                metrics: vec![gauge, summary],
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

#[tokio::test]
async fn test_protobuf_and_json_logs_reach_exporter() {
    let recorder = Recorder::new();
    let (mut service, _) = start(CONFIG, &[("debug", recorder.clone())]).await;
    let addr = http_addr(&service);

    let response = post(addr, "/v1/logs", Encoding::Protobuf, logs_body(Encoding::Protobuf, 3)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(CONTENT_TYPE).unwrap(),
        "application/x-protobuf"
    );

    let response = post(addr, "/v1/logs", Encoding::Json, logs_body(Encoding::Json, 2)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(CONTENT_TYPE).unwrap(), "application/json");

    assert!(wait_until(Duration::from_secs(5), || recorder.items() == 5).await);
    let bodies = recorder.log_bodies();
    assert!(bodies
        .iter()
        .all(|(service, _)| service == "integration-test-service"));

    let receiver = service.metrics().snapshot().receivers["otlp"];
    assert_eq!(receiver.accepted_items, 5);
    assert_eq!(receiver.rejected_requests, 0);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unsupported_metric_types_are_partial_success() {
    let recorder = Recorder::new();
    let (mut service, _) = start(CONFIG, &[("debug", recorder.clone())]).await;
    let addr = http_addr(&service);

    let body = mixed_metrics_request().encode_to_vec();
    let response = post(addr, "/v1/metrics", Encoding::Protobuf, body).await;
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = response.bytes().await.unwrap();
    let partial = decode_response(SignalType::Metrics, Encoding::Protobuf, &bytes)
        .unwrap()
        .expect("partial success expected");
    assert_eq!(partial.rejected, 1);
    assert!(partial.message.contains("unsupported"), "{}", partial.message);

    assert!(wait_until(Duration::from_secs(5), || recorder.items() == 1).await);
    let receiver = service.metrics().snapshot().receivers["otlp"];
    assert_eq!(receiver.accepted_items, 1);
    assert_eq!(receiver.rejected_items, 1);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_memory_pressure_answers_retry_after() {
    let recorder = Recorder::new();
    let (mut service, monitor) = start(CONFIG, &[("debug", recorder.clone())]).await;
    let addr = http_addr(&service);

    monitor.set_usage(950 * MIB);
    let response = post(addr, "/v1/logs", Encoding::Protobuf, logs_body(Encoding::Protobuf, 4)).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        response.headers().get(RETRY_AFTER).unwrap().to_str().unwrap(),
        RETRY_AFTER_SECS.to_string()
    );
    let error: OtlpError = serde_json::from_str(&response.text().await.unwrap()).unwrap();
    assert_eq!(error.code, 503);
    assert!(error.message.contains("memory_limiter"), "{}", error.message);

    // Metrics have no limiter and keep flowing
    let body = mixed_metrics_request().encode_to_vec();
    let response = post(addr, "/v1/metrics", Encoding::Protobuf, body).await;
    assert_eq!(response.status(), StatusCode::OK);

    monitor.set_usage(100 * MIB);
    let response = post(addr, "/v1/logs", Encoding::Protobuf, logs_body(Encoding::Protobuf, 4)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let snapshot = service.metrics().snapshot();
    assert_eq!(snapshot.receivers["otlp"].refused_items, 4);
    assert_eq!(snapshot.pipelines["logs"].refused_items, 4);

    let report = service.shutdown().await.unwrap();
    assert_eq!(report.lost_items, 0);
    assert_eq!(recorder.items(), 5);
}

#[tokio::test]
async fn test_malformed_and_unknown_requests() {
    let (mut service, _) = start(CONFIG, &[("debug", Recorder::new())]).await;
    let addr = http_addr(&service);

    let response = post(addr, "/v1/logs", Encoding::Protobuf, vec![0xff, 0xff, 0xff]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/v1/logs"))
        .header(CONTENT_TYPE, "text/plain")
        .body("hello")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    // No traces pipeline, so no traces route
    let response = post(addr, "/v1/traces", Encoding::Protobuf, Vec::new()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    assert_eq!(service.metrics().snapshot().receivers["otlp"].rejected_requests, 2);
    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_receiver_stops_accepting_after_shutdown() {
    let (mut service, _) = start(CONFIG, &[("debug", Recorder::new())]).await;
    let addr = http_addr(&service);
    service.shutdown().await.unwrap();

    let result = reqwest::Client::new()
        .post(format!("http://{addr}/v1/logs"))
        .header(CONTENT_TYPE, Encoding::Protobuf.content_type())
        .body(logs_body(Encoding::Protobuf, 1))
        .timeout(Duration::from_secs(2))
        .send()
        .await;
    assert!(result.is_err());
}
