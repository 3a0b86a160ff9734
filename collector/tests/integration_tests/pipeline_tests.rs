//! End-to-end pipeline behavior: admission, batching, retries, fan-out and
//! drain.

use super::common::{logs, start, wait_until, Recorder, MIB};
use collector::exporters::ExportResult;
use collector::pipeline::{ConsumeError, PipelineHandle};
use collector::Service;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

const WAIT: Duration = Duration::from_secs(5);

fn logs_pipeline(service: &Service) -> PipelineHandle {
    service.pipeline(&"logs".parse().unwrap()).unwrap()
}

fn pipeline_config(processors: &str, exporters: &str, extra: &str) -> String {
    format!(
        r"
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
  batch:
    send_batch_size: 10
    timeout: 1h
  batch/large:
    send_batch_size: 1000
    timeout: 1h
exporters:
  debug: {{}}
  debug/second: {{}}
  otlphttp/sink:
    endpoint: http://127.0.0.1:1
    retry_on_failure:
      initial_interval: 10ms
      max_interval: 50ms
      randomization_factor: 0
service:
  drain_timeout: 2s
  pipelines:
    logs:
      receivers: [otlp]
      processors: [{processors}]
      exporters: [{exporters}]
{extra}
"
    )
}

#[tokio::test]
async fn test_memory_limiter_gates_admission() {
    let recorder = Recorder::new();
    let yaml = pipeline_config("memory_limiter, batch", "debug", "");
    let (mut service, monitor) = start(&yaml, &[("debug", recorder.clone())]).await;
    let pipeline = logs_pipeline(&service);

    monitor.set_usage(790 * MIB);
    assert_ok!(pipeline.submit(vec![logs("checkout", "a", 10)]));

    monitor.set_usage(820 * MIB);
    let err = assert_err!(pipeline.submit(vec![logs("checkout", "b", 10)]));
    assert!(matches!(err, ConsumeError::AdmissionRefused(_)), "{err:?}");

    // Still above the resume threshold
    monitor.set_usage(790 * MIB);
    assert_err!(pipeline.submit(vec![logs("checkout", "b", 10)]));

    monitor.set_usage(500 * MIB);
    assert_ok!(pipeline.submit(vec![logs("checkout", "c", 10)]));

    assert!(wait_until(WAIT, || recorder.items() == 20).await);
    let snapshot = pipeline.counters().snapshot();
    assert_eq!(snapshot.admitted_items, 20);
    assert_eq!(snapshot.refused_items, 20);

    let report = service.shutdown().await.unwrap();
    assert_eq!(report.lost_items, 0);
}

#[tokio::test]
async fn test_retryable_failures_then_success() {
    let recorder = Recorder::scripted(vec![
        ExportResult::retryable("HTTP 503"),
        ExportResult::retryable("HTTP 503"),
        ExportResult::retryable("HTTP 503"),
    ]);
    let yaml = pipeline_config("", "otlphttp/sink", "");
    let (mut service, _) = start(&yaml, &[("otlphttp/sink", recorder.clone())]).await;

    logs_pipeline(&service)
        .submit(vec![logs("checkout", "log ", 5)])
        .unwrap();
    assert!(wait_until(WAIT, || recorder.items() == 5).await);

    let exporter = service.metrics().snapshot().exporters["otlphttp/sink"];
    assert_eq!(recorder.attempts(), 4);
    assert_eq!(exporter.sent_items, 5);
    assert_eq!(exporter.failed_attempts, 3);
    assert_eq!(exporter.retries, 3);
    assert_eq!(exporter.lost_items, 0);

    let report = service.shutdown().await.unwrap();
    assert_eq!(report.lost_items, 0);
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let recorder = Recorder::scripted(vec![ExportResult::permanent("HTTP 400: bad payload")]);
    let yaml = pipeline_config("", "otlphttp/sink", "");
    let (mut service, _) = start(&yaml, &[("otlphttp/sink", recorder.clone())]).await;

    logs_pipeline(&service)
        .submit(vec![logs("checkout", "log ", 5)])
        .unwrap();
    let metrics = service.metrics().clone();
    assert!(wait_until(WAIT, || metrics.snapshot().exporters["otlphttp/sink"].lost_items == 5).await);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(recorder.attempts(), 1);
    assert_eq!(recorder.items(), 0);
    assert_eq!(metrics.snapshot().exporters["otlphttp/sink"].retries, 0);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_batch_flushes_at_size_threshold() {
    let recorder = Recorder::new();
    let yaml = pipeline_config("batch", "debug", "      num_workers: 1");
    let (mut service, _) = start(&yaml, &[("debug", recorder.clone())]).await;
    let pipeline = logs_pipeline(&service);

    pipeline.submit(vec![logs("checkout", "a", 9)]).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(recorder.attempts(), 0);

    pipeline.submit(vec![logs("checkout", "b", 1)]).unwrap();
    assert!(wait_until(WAIT, || recorder.items() == 10).await);
    assert_eq!(recorder.batches().len(), 1);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_flushes_buffered_items() {
    let recorder = Recorder::new();
    let yaml = pipeline_config("batch/large", "debug", "");
    let (mut service, _) = start(&yaml, &[("debug", recorder.clone())]).await;
    let pipeline = logs_pipeline(&service);

    for service_name in ["checkout", "cart", "payments", "search", "ads"] {
        pipeline
            .submit(vec![logs(service_name, "log ", 100)])
            .unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(recorder.items(), 0);

    let report = service.shutdown().await.unwrap();
    assert_eq!(report.lost_items, 0);
    assert!(!report.drain_timed_out);
    assert_eq!(recorder.items(), 500);
}

#[tokio::test]
async fn test_drain_timeout_counts_lost_items() {
    let recorder = Recorder::hanging();
    let yaml = pipeline_config("", "debug", "").replace("drain_timeout: 2s", "drain_timeout: 200ms");
    let (mut service, _) = start(&yaml, &[("debug", recorder.clone())]).await;

    logs_pipeline(&service)
        .submit(vec![logs("checkout", "log ", 5)])
        .unwrap();
    assert!(wait_until(WAIT, || recorder.attempts() == 1).await);

    let started = tokio::time::Instant::now();
    let report = service.shutdown().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(report.drain_timed_out);
    assert_eq!(report.lost_items, 5);
    assert_eq!(service.metrics().snapshot().pipelines["logs"].lost_items, 5);
}

#[tokio::test]
async fn test_redelivery_after_lost_acknowledgement() {
    let recorder = Recorder::losing_acks(1);
    let yaml = pipeline_config("", "otlphttp/sink", "");
    let (mut service, _) = start(&yaml, &[("otlphttp/sink", recorder.clone())]).await;

    logs_pipeline(&service)
        .submit(vec![logs("checkout", "log ", 5)])
        .unwrap();
    assert!(wait_until(WAIT, || recorder.attempts() == 2).await);
    let metrics = service.metrics().clone();
    assert!(wait_until(WAIT, || metrics.snapshot().pipelines["logs"].in_flight_items == 0).await);

    // The sink saw the batch twice; the collector counted it once
    assert_eq!(recorder.items(), 10);
    let snapshot = metrics.snapshot();
    assert_eq!(snapshot.exporters["otlphttp/sink"].sent_items, 5);
    assert_eq!(snapshot.pipelines["logs"].admitted_items, 5);
    assert_eq!(snapshot.pipelines["logs"].in_flight_items, 0);

    let report = service.shutdown().await.unwrap();
    assert_eq!(report.lost_items, 0);
}

#[tokio::test]
async fn test_fan_out_exporters_are_independent() {
    let healthy = Recorder::new();
    let failing = Recorder::scripted(vec![ExportResult::permanent("HTTP 401")]);
    let yaml = pipeline_config("", "debug, debug/second", "");
    let (mut service, _) = start(
        &yaml,
        &[("debug", healthy.clone()), ("debug/second", failing.clone())],
    )
    .await;
    let pipeline = logs_pipeline(&service);

    pipeline.submit(vec![logs("checkout", "a", 5)]).unwrap();
    assert!(wait_until(WAIT, || healthy.items() == 5).await);
    pipeline.submit(vec![logs("checkout", "b", 5)]).unwrap();
    assert!(wait_until(WAIT, || healthy.items() == 10 && failing.items() == 5).await);

    let snapshot = service.metrics().snapshot();
    assert_eq!(snapshot.exporters["debug"].sent_items, 10);
    assert_eq!(snapshot.exporters["debug/second"].sent_items, 5);
    assert_eq!(snapshot.exporters["debug/second"].lost_items, 5);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_retrying_exporter_does_not_hold_back_others() {
    let healthy = Recorder::new();
    let down = Recorder::scripted(vec![ExportResult::retryable("HTTP 503"); 100]);
    let yaml = pipeline_config("", "debug, debug/second", "      num_workers: 1")
        .replace("drain_timeout: 2s", "drain_timeout: 200ms");
    let (mut service, _) = start(
        &yaml,
        &[("debug", healthy.clone()), ("debug/second", down.clone())],
    )
    .await;
    let pipeline = logs_pipeline(&service);

    pipeline.submit(vec![logs("checkout", "a", 5)]).unwrap();
    assert!(wait_until(WAIT, || down.attempts() == 1).await);

    // The second sink backs off for seconds; the first keeps receiving
    pipeline.submit(vec![logs("checkout", "b", 5)]).unwrap();
    pipeline.submit(vec![logs("checkout", "c", 5)]).unwrap();
    assert!(wait_until(Duration::from_secs(1), || healthy.items() == 15).await);
    assert_eq!(down.attempts(), 1);
    assert_eq!(healthy.batches().len(), 3);

    let report = service.shutdown().await.unwrap();
    assert!(report.drain_timed_out);
    assert_eq!(report.lost_items, 15);
}

#[tokio::test]
async fn test_order_is_kept_per_resource() {
    let recorder = Recorder::new();
    let yaml = pipeline_config("", "debug", "      num_workers: 4");
    let (mut service, _) = start(&yaml, &[("debug", recorder.clone())]).await;
    let pipeline = logs_pipeline(&service);

    let services = ["checkout", "cart", "payments", "search", "ads", "email"];
    for round in 0..20 {
        for name in services {
            pipeline
                .submit(vec![logs(name, &format!("{round:02}-"), 3)])
                .unwrap();
        }
    }
    assert!(wait_until(WAIT, || recorder.items() == 20 * services.len() * 3).await);

    for name in services {
        let bodies: Vec<String> = recorder
            .log_bodies()
            .into_iter()
            .filter(|(service, _)| service == name)
            .map(|(_, body)| body)
            .collect();
        let mut sorted = bodies.clone();
        sorted.sort();
        assert_eq!(bodies, sorted, "records of {name} were reordered");
        assert_eq!(bodies.len(), 60);
    }

    service.shutdown().await.unwrap();
}
