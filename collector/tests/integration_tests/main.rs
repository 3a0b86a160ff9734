//! Integration tests for the Tributary collector.
//!
//! These tests start complete collectors on ephemeral ports and verify the
//! flow from OTLP receivers through processors to exporters, as well as
//! startup, drain and shutdown behavior.

mod common;
mod exporter_tests;
mod grpc_tests;
mod health_tests;
mod http_receiver_tests;
mod pipeline_tests;
