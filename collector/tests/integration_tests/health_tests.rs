//! Integration tests for the health check extension.
//!
//! Tests cover:
//! - Liveness endpoint
//! - Readiness under memory pressure
//! - Counter snapshot

use super::common::{logs, start, wait_until, Recorder, MIB};
use reqwest::StatusCode;
use serde_json::Value;
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
extensions:
  health_check:
    endpoint: 127.0.0.1:0
service:
  extensions: [health_check]
  drain_timeout: 2s
  pipelines:
    logs:
      receivers: [otlp]
      processors: [memory_limiter]
      exporters: [debug]
";

async fn get(addr: SocketAddr, path: &str) -> (StatusCode, Value) {
    let response = reqwest::get(format!("http://{addr}{path}")).await.unwrap();
    let status = response.status();
    let body = response.text().await.unwrap();
    (status, serde_json::from_str(&body).unwrap())
}

#[tokio::test]
async fn test_health_check() {
    let (mut service, _) = start(CONFIG, &[("debug", Recorder::new())]).await;
    let addr = service.health_addr().unwrap();

    let (status, response) = get(addr, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["status"], "healthy");
    assert_eq!(response["service"], "tributary-collector");

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_readiness_follows_memory_limiter() {
    let (mut service, monitor) = start(CONFIG, &[("debug", Recorder::new())]).await;
    let addr = service.health_addr().unwrap();

    let (status, response) = get(addr, "/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["ready"], true);
    assert_eq!(response["state"], "running");
    assert_eq!(response["limiters"]["memory_limiter"], "accepting");

    // The sampler picks up the new usage within a few check intervals
    monitor.set_usage(950 * MIB);
    let mut refused = false;
    for _ in 0..100 {
        let (status, response) = get(addr, "/ready").await;
        if status == StatusCode::SERVICE_UNAVAILABLE {
            assert_eq!(response["ready"], false);
            assert_eq!(response["limiters"]["memory_limiter"], "hard_refusing");
            refused = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(refused, "/ready never reported memory pressure");

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_metrics_snapshot() {
    let recorder = Recorder::new();
    let (mut service, monitor) = start(CONFIG, &[("debug", recorder.clone())]).await;
    let addr = service.health_addr().unwrap();
    monitor.set_usage(123 * MIB);

    service
        .pipeline(&"logs".parse().unwrap())
        .unwrap()
        .submit(vec![logs("checkout", "log ", 6)])
        .unwrap();
    let metrics = service.metrics().clone();
    assert!(wait_until(Duration::from_secs(5), || {
        let snapshot = metrics.snapshot();
        snapshot.exporters["debug"].sent_items == 6 && snapshot.pipelines["logs"].in_flight_items == 0
    })
    .await);
    assert_eq!(recorder.items(), 6);

    let (status, response) = get(addr, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(response["state"], "running");
    assert_eq!(response["memory"]["usage_bytes"], 123 * MIB);
    assert_eq!(response["pipelines"]["logs"]["admitted_items"], 6);
    assert_eq!(response["pipelines"]["logs"]["in_flight_items"], 0);
    assert_eq!(response["exporters"]["debug"]["sent_items"], 6);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_health_check_disabled_unless_listed() {
    let yaml = CONFIG.replace("  extensions: [health_check]\n", "");
    let (mut service, _) = start(&yaml, &[("debug", Recorder::new())]).await;
    assert!(service.health_addr().is_none());
    service.shutdown().await.unwrap();
}
