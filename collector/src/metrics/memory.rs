//! Process memory monitoring.
//!
//! The monitor keeps the last sampled resident set size of the collector in
//! an atomic, so admission checks never block on a measurement. The memory
//! ceiling that percentage limits refer to is detected once: the cgroup limit
//! when running in a container, otherwise total system memory.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CGROUP_V2_LIMIT: &str = "/sys/fs/cgroup/memory.max";
const CGROUP_V1_LIMIT: &str = "/sys/fs/cgroup/memory/memory.limit_in_bytes";
const PROC_MEMINFO: &str = "/proc/meminfo";
// cgroup v1 reports a huge number when unlimited
const CGROUP_V1_UNLIMITED: u64 = 1024 * 1024 * 1024 * 1024;

/// Where the memory ceiling came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CeilingSource {
    /// Container memory limit.
    Cgroup,
    /// Total system memory.
    System,
    /// Set explicitly.
    Fixed,
}

impl std::fmt::Display for CeilingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CeilingSource::Cgroup => write!(f, "cgroup"),
            CeilingSource::System => write!(f, "system"),
            CeilingSource::Fixed => write!(f, "fixed"),
        }
    }
}

fn parse_cgroup_v2(content: &str) -> Option<u64> {
    let trimmed = content.trim();
    if trimmed == "max" {
        return None;
    }
    trimmed.parse().ok()
}

fn parse_cgroup_v1(content: &str) -> Option<u64> {
    content
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|limit| *limit < CGROUP_V1_UNLIMITED)
}

fn parse_meminfo_total(content: &str) -> Option<u64> {
    content
        .lines()
        .find(|line| line.starts_with("MemTotal:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

/// Detects the memory ceiling of the process.
///
/// Tries the cgroup v2 limit, then cgroup v1, then `/proc/meminfo`.
#[must_use]
pub fn detect_ceiling() -> Option<(u64, CeilingSource)> {
    if let Some(limit) = std::fs::read_to_string(CGROUP_V2_LIMIT)
        .ok()
        .as_deref()
        .and_then(parse_cgroup_v2)
    {
        return Some((limit, CeilingSource::Cgroup));
    }

    if let Some(limit) = std::fs::read_to_string(CGROUP_V1_LIMIT)
        .ok()
        .as_deref()
        .and_then(parse_cgroup_v1)
    {
        return Some((limit, CeilingSource::Cgroup));
    }

    std::fs::read_to_string(PROC_MEMINFO)
        .ok()
        .as_deref()
        .and_then(parse_meminfo_total)
        .map(|total| (total, CeilingSource::System))
}

struct ProcessSampler {
    system: System,
    pid: Pid,
}

impl ProcessSampler {
    fn new() -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(std::process::id()),
        }
    }

    fn resident_bytes(&mut self) -> Option<u64> {
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), false);
        self.system.process(self.pid).map(sysinfo::Process::memory)
    }

    fn total_memory(&mut self) -> u64 {
        self.system.refresh_memory();
        self.system.total_memory()
    }
}

/// Memory figures reported by the health extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemorySnapshot {
    /// Last sampled resident set size.
    pub usage_bytes: u64,
    /// Detected ceiling.
    pub ceiling_bytes: u64,
    /// Where the ceiling came from.
    pub ceiling_source: CeilingSource,
}

/// Process-wide memory usage gauge.
pub struct MemoryMonitor {
    usage: AtomicU64,
    ceiling: u64,
    source: CeilingSource,
    sampler: Option<Mutex<ProcessSampler>>,
}

impl std::fmt::Debug for MemoryMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMonitor")
            .field("usage", &self.usage_bytes())
            .field("ceiling", &self.ceiling)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl MemoryMonitor {
    /// A monitor that samples this process and detects its ceiling.
    #[must_use]
    pub fn detect() -> Self {
        let mut sampler = ProcessSampler::new();
        let (ceiling, source) =
            detect_ceiling().unwrap_or_else(|| (sampler.total_memory(), CeilingSource::System));
        let usage = sampler.resident_bytes().unwrap_or_default();

        info!(
            ceiling_mib = ceiling / 1024 / 1024,
            source = %source,
            usage_mib = usage / 1024 / 1024,
            "Memory monitor initialized"
        );

        Self {
            usage: AtomicU64::new(usage),
            ceiling,
            source,
            sampler: Some(Mutex::new(sampler)),
        }
    }

    /// A monitor with a fixed ceiling whose usage is only changed through
    /// [`Self::set_usage`].
    #[must_use]
    pub fn fixed(ceiling_bytes: u64) -> Self {
        Self {
            usage: AtomicU64::new(0),
            ceiling: ceiling_bytes,
            source: CeilingSource::Fixed,
            sampler: None,
        }
    }

    /// Last sampled usage in bytes.
    #[must_use]
    pub fn usage_bytes(&self) -> u64 {
        self.usage.load(Ordering::Relaxed)
    }

    /// Memory ceiling in bytes.
    #[must_use]
    pub fn ceiling_bytes(&self) -> u64 {
        self.ceiling
    }

    /// Overrides the usage reading.
    pub fn set_usage(&self, bytes: u64) {
        self.usage.store(bytes, Ordering::Relaxed);
    }

    /// Takes a new sample, if this monitor samples the process.
    ///
    /// Returns the current usage either way.
    pub fn refresh(&self) -> u64 {
        if let Some(sampler) = &self.sampler {
            let sample = sampler
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .resident_bytes();
            if let Some(bytes) = sample {
                self.usage.store(bytes, Ordering::Relaxed);
            }
        }
        self.usage_bytes()
    }

    /// Refreshes every `period` until `shutdown` fires, calling `on_sample`
    /// with each reading.
    ///
    /// Process sampling reads procfs, so it runs on the blocking pool.
    pub async fn sample_every<F>(
        self: &Arc<Self>,
        period: Duration,
        shutdown: CancellationToken,
        mut on_sample: F,
    ) where
        F: FnMut(u64) + Send,
    {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if self.sampler.is_none() {
                        on_sample(self.usage_bytes());
                        continue;
                    }
                    let monitor = Arc::clone(self);
                    match tokio::task::spawn_blocking(move || monitor.refresh()).await {
                        Ok(usage) => on_sample(usage),
                        Err(e) => warn!(error = %e, "Memory sample failed"),
                    }
                }
            }
        }
        debug!("Memory sampler stopped");
    }

    /// Current figures.
    #[must_use]
    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            usage_bytes: self.usage_bytes(),
            ceiling_bytes: self.ceiling,
            ceiling_source: self.source,
        }
    }
}
