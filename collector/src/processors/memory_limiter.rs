//! Memory limiter: admission control based on process memory usage.
//!
//! The limiter never touches batch contents. It sits in front of a
//! pipeline's queue and refuses new data while usage is too high, which the
//! receivers turn into a retryable error for the sender.
//!
//! ```text
//!              usage > soft              usage > soft + spike
//! Accepting ───────────────▶ SoftLimited ─────────────────────▶ HardRefusing
//!     ▲                          │  ▲                                │
//!     └──── usage < resume ──────┘  └──────── usage < soft ──────────┘
//! ```
//!
//! `resume` is the soft limit lowered by the hysteresis margin, so usage
//! hovering around the soft limit does not flap between states.

use crate::metrics::MemoryMonitor;
use serde::Serialize;
use shared::config::{ComponentId, MemoryLimiterConfig};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

const MIB: u64 = 1024 * 1024;

/// Admission state of a memory limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum LimiterState {
    /// Usage is below the soft limit; data is admitted.
    Accepting = 0,
    /// Usage exceeded the soft limit; data is refused until usage falls
    /// below the resume threshold.
    SoftLimited = 1,
    /// Usage exceeded the soft limit plus the spike allowance.
    HardRefusing = 2,
}

impl LimiterState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Accepting,
            1 => Self::SoftLimited,
            _ => Self::HardRefusing,
        }
    }

    /// Whether new data is admitted in this state.
    #[must_use]
    pub fn admits(self) -> bool {
        self == Self::Accepting
    }
}

impl std::fmt::Display for LimiterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accepting => write!(f, "accepting"),
            Self::SoftLimited => write!(f, "soft_limited"),
            Self::HardRefusing => write!(f, "hard_refusing"),
        }
    }
}

/// Thresholds in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLimits {
    /// Soft limit.
    pub soft: u64,
    /// Soft limit plus spike allowance.
    pub hard: u64,
    /// Usage must drop below this to leave `SoftLimited`.
    pub resume: u64,
}

impl MemoryLimits {
    /// Resolves the configured limits against a memory ceiling.
    ///
    /// Without an explicit spike allowance, a fifth of the soft limit is used.
    #[must_use]
    pub fn from_config(config: &MemoryLimiterConfig, ceiling: u64) -> Self {
        let percent_of_ceiling = |percent: u8| ceiling / 100 * u64::from(percent);

        let soft = match (config.limit_mib, config.limit_percentage) {
            (Some(mib), _) => mib.saturating_mul(MIB),
            (None, Some(percent)) => percent_of_ceiling(percent),
            (None, None) => percent_of_ceiling(80),
        };
        let spike = match (config.spike_limit_mib, config.spike_limit_percentage) {
            (Some(mib), _) => mib.saturating_mul(MIB),
            (None, Some(percent)) => percent_of_ceiling(percent),
            (None, None) => soft / 5,
        };
        let margin = soft / 100 * u64::from(config.hysteresis_percentage);

        Self {
            soft,
            hard: soft.saturating_add(spike),
            resume: soft - margin,
        }
    }

    /// The state that follows `current` at the given usage.
    #[must_use]
    pub fn next_state(&self, current: LimiterState, usage: u64) -> LimiterState {
        if usage > self.hard {
            return LimiterState::HardRefusing;
        }
        match current {
            LimiterState::Accepting if usage > self.soft => LimiterState::SoftLimited,
            LimiterState::Accepting => LimiterState::Accepting,
            LimiterState::SoftLimited | LimiterState::HardRefusing if usage < self.resume => {
                LimiterState::Accepting
            }
            LimiterState::SoftLimited => LimiterState::SoftLimited,
            LimiterState::HardRefusing if usage < self.soft => LimiterState::SoftLimited,
            LimiterState::HardRefusing => LimiterState::HardRefusing,
        }
    }
}

/// Returned when the limiter refuses data.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("memory limiter {limiter} is {state}: usage {usage_mib} MiB, soft limit {soft_limit_mib} MiB")]
pub struct AdmissionRefused {
    /// The refusing limiter.
    pub limiter: String,
    /// Its state at the time of the check.
    pub state: LimiterState,
    /// Usage that was checked, in MiB.
    pub usage_mib: u64,
    /// Soft limit, in MiB.
    pub soft_limit_mib: u64,
}

/// A memory limiter instance, shared by every pipeline that lists it.
#[derive(Debug)]
pub struct MemoryLimiter {
    id: ComponentId,
    limits: MemoryLimits,
    monitor: Arc<MemoryMonitor>,
    state: AtomicU8,
}

impl MemoryLimiter {
    /// Creates a limiter reading usage from `monitor`.
    #[must_use]
    pub fn new(id: ComponentId, config: &MemoryLimiterConfig, monitor: Arc<MemoryMonitor>) -> Self {
        let limits = MemoryLimits::from_config(config, monitor.ceiling_bytes());
        info!(
            limiter = %id,
            soft_limit_mib = limits.soft / MIB,
            hard_limit_mib = limits.hard / MIB,
            resume_below_mib = limits.resume / MIB,
            "Memory limiter configured"
        );
        Self {
            id,
            limits,
            monitor,
            state: AtomicU8::new(LimiterState::Accepting as u8),
        }
    }

    /// Component ID of the limiter.
    #[must_use]
    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    /// Resolved thresholds.
    #[must_use]
    pub fn limits(&self) -> MemoryLimits {
        self.limits
    }

    /// Current state, without re-evaluating usage.
    #[must_use]
    pub fn state(&self) -> LimiterState {
        LimiterState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Re-evaluates the state against the monitor's latest reading.
    pub fn evaluate(&self) -> LimiterState {
        let usage = self.monitor.usage_bytes();
        let current = self.state();
        let next = self.limits.next_state(current, usage);
        if next != current
            && self
                .state
                .compare_exchange(current as u8, next as u8, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.log_transition(current, next, usage);
        }
        next
    }

    /// Checks whether a new batch may enter the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionRefused`] unless the limiter is accepting.
    pub fn check(&self) -> Result<(), AdmissionRefused> {
        let state = self.evaluate();
        if state.admits() {
            Ok(())
        } else {
            Err(AdmissionRefused {
                limiter: self.id.to_string(),
                state,
                usage_mib: self.monitor.usage_bytes() / MIB,
                soft_limit_mib: self.limits.soft / MIB,
            })
        }
    }

    fn log_transition(&self, from: LimiterState, to: LimiterState, usage: u64) {
        let usage_mib = usage / MIB;
        match to {
            LimiterState::Accepting => {
                info!(limiter = %self.id, %from, usage_mib, "Memory usage back to normal, accepting data");
            }
            LimiterState::SoftLimited => {
                warn!(
                    limiter = %self.id,
                    %from,
                    usage_mib,
                    soft_limit_mib = self.limits.soft / MIB,
                    "Memory usage above soft limit, refusing data"
                );
            }
            LimiterState::HardRefusing => {
                warn!(
                    limiter = %self.id,
                    %from,
                    usage_mib,
                    hard_limit_mib = self.limits.hard / MIB,
                    "Memory usage above hard limit, refusing all data"
                );
            }
        }
    }
}
