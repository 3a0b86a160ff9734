//! OTLP/gRPC receiver tests.

use super::common::{logs, start, wait_until, Recorder, MIB};
use collector::grpc::{LogsServiceImpl, TracesServiceImpl};
use collector::metrics::ReceiverCounters;
use collector::receivers::Consumers;
use collector::Service;
use shared::models::Batch;
use shared::otlp::conversions::logs_to_request;
use shared::otlp::proto::collector::logs::v1::logs_service_client::LogsServiceClient;
use shared::otlp::proto::collector::logs::v1::logs_service_server::LogsService;
use shared::otlp::proto::collector::logs::v1::ExportLogsServiceRequest;
use shared::otlp::proto::collector::trace::v1::trace_service_server::TraceService;
use shared::otlp::proto::collector::trace::v1::ExportTraceServiceRequest;
use std::sync::Arc;
use std::time::Duration;
use tonic::{Code, Request};

const CONFIG: &str = r"
receivers:
  otlp:
    protocols:
      grpc:
        endpoint: 127.0.0.1:0
        max_recv_msg_size_mib: 1
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
";

fn logs_request(service: &str, n: usize) -> ExportLogsServiceRequest {
    let Batch::Logs(records) = logs(service, "log ", n) else {
        unreachable!("logs() builds log batches")
    };
    logs_to_request(&records)
}

fn consumers(service: &Service) -> Consumers {
    Consumers::new(
        "otlp/direct".parse().unwrap(),
        vec![service.pipeline(&"logs".parse().unwrap()).unwrap()],
        Arc::new(ReceiverCounters::default()),
    )
}

#[tokio::test]
async fn test_logs_service_hands_records_to_pipeline() {
    let recorder = Recorder::new();
    let (mut service, _) = start(CONFIG, &[("debug", recorder.clone())]).await;
    let logs_service = LogsServiceImpl::new(consumers(&service));

    let response = logs_service
        .export(Request::new(logs_request("checkout", 7)))
        .await
        .unwrap()
        .into_inner();
    assert!(response.partial_success.is_none());

    assert!(wait_until(Duration::from_secs(5), || recorder.items() == 7).await);
    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_status_codes() {
    let (mut service, monitor) = start(CONFIG, &[("debug", Recorder::new())]).await;
    let consumers = consumers(&service);

    let traces = TracesServiceImpl::new(consumers.clone());
    let status = traces
        .export(Request::new(ExportTraceServiceRequest::default()))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unimplemented);

    monitor.set_usage(950 * MIB);
    let status = LogsServiceImpl::new(consumers)
        .export(Request::new(logs_request("checkout", 2)))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);

    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_grpc_client_end_to_end() {
    let recorder = Recorder::new();
    let (mut service, _) = start(CONFIG, &[("debug", recorder.clone())]).await;
    let addrs = service.receiver_addrs(&"otlp".parse().unwrap()).unwrap();
    assert!(addrs.http.is_none());
    let addr = addrs.grpc.unwrap();

    let mut client = LogsServiceClient::connect(format!("http://{addr}")).await.unwrap();
    client.export(logs_request("checkout", 4)).await.unwrap();
    client.export(logs_request("cart", 6)).await.unwrap();

    assert!(wait_until(Duration::from_secs(5), || recorder.items() == 10).await);
    assert_eq!(service.metrics().snapshot().receivers["otlp"].accepted_items, 10);

    // Messages above max_recv_msg_size_mib are refused
    let mut huge = logs_request("checkout", 1);
    if let Some(record) = huge
        .resource_logs
        .first_mut()
        .and_then(|r| r.scope_logs.first_mut())
        .and_then(|s| s.log_records.first_mut())
    {
        record.severity_text = "x".repeat(2 * 1024 * 1024);
    }
    let status = client.export(huge).await.unwrap_err();
    assert_eq!(status.code(), Code::OutOfRange);

    service.shutdown().await.unwrap();
}
