//! Common test utilities and helpers for integration tests.
//!
//! This module provides a recording exporter, collector setup on ephemeral
//! ports and OTLP request builders.

#![allow(dead_code)]

use async_trait::async_trait;
use collector::exporters::{ExportResult, Exporter};
use collector::metrics::MemoryMonitor;
use collector::Service;
use shared::config::Config;
use shared::models::{AttributeValue, Batch, InstrumentationScope, LogRecord, Resource};
use shared::otlp::{encode_batch, Encoding};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MIB: u64 = 1024 * 1024;

/// Memory ceiling of the monitor used by [`start`].
pub const CEILING: u64 = 1000 * MIB;

/// An exporter that records what it receives.
///
/// Scripted outcomes are returned first, one per attempt; afterwards every
/// attempt succeeds, unless the recorder hangs.
#[derive(Default)]
pub struct Recorder {
    delivered: Mutex<Vec<Batch>>,
    script: Mutex<VecDeque<ExportResult>>,
    attempts: AtomicUsize,
    lost_acks: AtomicUsize,
    hang: bool,
}

impl Recorder {
    /// A recorder that accepts everything.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A recorder returning `outcomes` before succeeding.
    pub fn scripted(outcomes: Vec<ExportResult>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(outcomes.into()),
            ..Self::default()
        })
    }

    /// A recorder that keeps the first `n` batches but reports their
    /// attempts as retryable failures, as if the acknowledgement was lost.
    pub fn losing_acks(n: usize) -> Arc<Self> {
        Arc::new(Self {
            lost_acks: AtomicUsize::new(n),
            ..Self::default()
        })
    }

    /// A recorder whose attempts never complete.
    pub fn hanging() -> Arc<Self> {
        Arc::new(Self {
            hang: true,
            ..Self::default()
        })
    }

    /// Attempts made so far.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Batches acknowledged so far.
    pub fn batches(&self) -> Vec<Batch> {
        self.delivered.lock().unwrap().clone()
    }

    /// Items acknowledged so far.
    pub fn items(&self) -> usize {
        self.delivered.lock().unwrap().iter().map(Batch::len).sum()
    }

    /// Log bodies acknowledged so far, in delivery order, with the service
    /// name of their resource.
    pub fn log_bodies(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for batch in self.delivered.lock().unwrap().iter() {
            if let Batch::Logs(records) = batch {
                for record in records {
                    let service = record.resource.service_name().unwrap_or_default().to_string();
                    let body = match &record.body {
                        AttributeValue::String(s) => s.clone(),
                        other => format!("{other:?}"),
                    };
                    out.push((service, body));
                }
            }
        }
        out
    }
}

#[async_trait]
impl Exporter for Recorder {
    async fn export(&self, batch: &Batch) -> ExportResult {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self
            .lost_acks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            self.delivered.lock().unwrap().push(batch.clone());
            return ExportResult::retryable("connection reset before acknowledgement");
        }
        let scripted = self.script.lock().unwrap().pop_front();
        match scripted {
            Some(ExportResult::Success) | None => {
                self.delivered.lock().unwrap().push(batch.clone());
                ExportResult::Success
            }
            Some(failure) => failure,
        }
    }
}

/// Parses a configuration document.
pub fn config(yaml: &str) -> Config {
    Config::from_yaml(yaml).unwrap()
}

/// Builds a collector with a fixed-ceiling memory monitor and the given
/// exporter overrides, and starts it.
pub async fn start(yaml: &str, exporters: &[(&str, Arc<Recorder>)]) -> (Service, Arc<MemoryMonitor>) {
    let monitor = Arc::new(MemoryMonitor::fixed(CEILING));
    let mut service = Service::new(config(yaml)).with_memory_monitor(Arc::clone(&monitor));
    for (id, recorder) in exporters {
        service = service.with_exporter(id.parse().unwrap(), Arc::clone(recorder) as Arc<dyn Exporter>);
    }
    service.start().await.unwrap();
    (service, monitor)
}

/// A batch of `n` log records from `service`, with bodies `"{prefix}{i}"`.
pub fn logs(service: &str, prefix: &str, n: usize) -> Batch {
    let resource = Arc::new(Resource::new().with_attribute("service.name", service));
    let scope = Arc::new(InstrumentationScope::new("integration-test", "1.0.0"));
    (0..n)
        .map(|i| {
            LogRecord::new(Arc::clone(&resource), Arc::clone(&scope), format!("{prefix}{i}"))
                .with_severity(9)
                .with_time(1_700_000_000_000_000_000 + i as u64)
        })
        .collect::<Vec<_>>()
        .into()
}

/// An OTLP logs request body with `n` records.
pub fn logs_body(encoding: Encoding, n: usize) -> Vec<u8> {
    encode_batch(&logs("integration-test-service", "log ", n), encoding).unwrap()
}

/// Polls `condition` every 10ms until it holds or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
