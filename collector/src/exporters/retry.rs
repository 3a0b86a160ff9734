//! Retry with exponential backoff around a single exporter.
//!
//! Every delivery runs an explicit state machine:
//!
//! ```text
//! Pending ──▶ attempt ──▶ Delivered
//!                │
//!                ├──▶ PermanentlyFailed   (permanent error or budget exhausted)
//!                │
//!                └──▶ Retrying { attempt, next_attempt_at } ──▶ attempt ...
//! ```
//!
//! Transitions are computed by [`RetryPolicy::next_state`], a pure function of
//! the attempt outcome and the clock. [`RetryingExporter::deliver`] drives it,
//! sleeping on the tokio timer between attempts.

use super::{ExportResult, Exporter};
use crate::metrics::ExporterCounters;
use rand::Rng;
use shared::config::{format_duration, ComponentId, RetryConfig};
use shared::models::Batch;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Backoff and budget settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Whether retryable failures are retried at all.
    pub enabled: bool,
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Upper bound on the delay between attempts.
    pub max_interval: Duration,
    /// Growth factor of the delay.
    pub multiplier: f64,
    /// Relative jitter applied to each delay, in `[0, 1]`.
    pub randomization_factor: f64,
    /// Total time after the first attempt past which no retry is scheduled.
    pub max_elapsed_time: Option<Duration>,
    /// Maximum number of attempts, including the first.
    pub max_attempts: Option<u32>,
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            enabled: config.enabled,
            initial_interval: config.initial_interval,
            max_interval: config.max_interval,
            multiplier: config.multiplier,
            randomization_factor: config.randomization_factor,
            max_elapsed_time: Some(config.max_elapsed_time).filter(|d| !d.is_zero()),
            max_attempts: config.max_attempts,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

/// State of one batch's delivery to one exporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptState {
    /// No attempt made yet.
    Pending,
    /// Waiting to make attempt number `attempt`.
    Retrying {
        /// Number of the next attempt, starting at 1 for the first.
        attempt: u32,
        /// When the next attempt starts.
        next_attempt_at: Instant,
    },
    /// The sink acknowledged the batch.
    Delivered {
        /// Attempts made.
        attempts: u32,
    },
    /// The batch is dropped.
    PermanentlyFailed {
        /// Attempts made.
        attempts: u32,
        /// Why the batch was given up on.
        reason: String,
    },
}

impl RetryPolicy {
    /// Un-jittered delay after the `failures`-th consecutive failure.
    #[must_use]
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = secs.min(self.max_interval.as_secs_f64());
        if capped.is_finite() && capped >= 0.0 {
            Duration::from_secs_f64(capped)
        } else {
            self.max_interval
        }
    }

    /// Applies jitter in `[-1, 1]` scaled by the randomization factor.
    #[must_use]
    pub fn with_jitter(&self, delay: Duration, jitter: f64) -> Duration {
        let factor = 1.0 + self.randomization_factor.clamp(0.0, 1.0) * jitter.clamp(-1.0, 1.0);
        delay.mul_f64(factor)
    }

    /// The state after attempt number `attempts` ended with `outcome`.
    ///
    /// `started` is when the first attempt began. `jitter` is a random value
    /// in `[-1, 1]`; a `Retry-After` delay from the sink replaces the backoff.
    /// Without a `max_elapsed_time` budget that delay is capped at
    /// `max_interval`.
    #[must_use]
    pub fn next_state(
        &self,
        attempts: u32,
        outcome: ExportResult,
        started: Instant,
        now: Instant,
        jitter: f64,
    ) -> AttemptState {
        let (reason, retry_after) = match outcome {
            ExportResult::Success => return AttemptState::Delivered { attempts },
            ExportResult::PermanentFailure { reason } => {
                return AttemptState::PermanentlyFailed { attempts, reason }
            }
            ExportResult::RetryableFailure {
                reason,
                retry_after,
            } => (reason, retry_after),
        };

        if !self.enabled {
            return AttemptState::PermanentlyFailed {
                attempts,
                reason: format!("{reason} (retries disabled)"),
            };
        }
        if self.max_attempts.is_some_and(|max| attempts >= max) {
            return AttemptState::PermanentlyFailed {
                attempts,
                reason: format!("{reason} (gave up after {attempts} attempts)"),
            };
        }

        let delay = match (retry_after, self.max_elapsed_time) {
            (Some(delay), Some(_)) => delay,
            (Some(delay), None) => delay.min(self.max_interval),
            (None, _) => self.with_jitter(self.backoff(attempts), jitter),
        };
        let Some(next_attempt_at) = now.checked_add(delay) else {
            return AttemptState::PermanentlyFailed {
                attempts,
                reason: format!("{reason} (retry delay out of range)"),
            };
        };
        if let Some(budget) = self.max_elapsed_time {
            if next_attempt_at.saturating_duration_since(started) > budget {
                return AttemptState::PermanentlyFailed {
                    attempts,
                    reason: format!(
                        "{reason} (retry budget of {} exhausted)",
                        format_duration(budget)
                    ),
                };
            }
        }

        AttemptState::Retrying {
            attempt: attempts + 1,
            next_attempt_at,
        }
    }
}

/// Final outcome of a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Acknowledged by the sink.
    Delivered {
        /// Attempts made.
        attempts: u32,
    },
    /// Dropped and counted as lost.
    Lost {
        /// Attempts made.
        attempts: u32,
        /// Why.
        reason: String,
    },
}

impl Delivery {
    /// Whether the batch was delivered.
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Sending queue length of exporters built without one.
pub const DEFAULT_QUEUE_SIZE: usize = 1000;

/// An exporter wrapped with retries, attempt timeouts and counters.
pub struct RetryingExporter {
    id: ComponentId,
    inner: Arc<dyn Exporter>,
    policy: RetryPolicy,
    attempt_timeout: Duration,
    queue_size: usize,
    counters: Arc<ExporterCounters>,
}

impl std::fmt::Debug for RetryingExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingExporter")
            .field("id", &self.id)
            .field("policy", &self.policy)
            .field("attempt_timeout", &self.attempt_timeout)
            .field("queue_size", &self.queue_size)
            .finish_non_exhaustive()
    }
}

impl RetryingExporter {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(
        id: ComponentId,
        inner: Arc<dyn Exporter>,
        policy: RetryPolicy,
        attempt_timeout: Duration,
        counters: Arc<ExporterCounters>,
    ) -> Self {
        Self {
            id,
            inner,
            policy,
            attempt_timeout,
            queue_size: DEFAULT_QUEUE_SIZE,
            counters,
        }
    }

    /// Sets how many batches a pipeline worker may queue for this exporter.
    #[must_use]
    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size.max(1);
        self
    }

    /// Sending queue length per pipeline worker.
    #[must_use]
    pub fn queue_size(&self) -> usize {
        self.queue_size
    }

    /// Delivery counters.
    #[must_use]
    pub fn counters(&self) -> &Arc<ExporterCounters> {
        &self.counters
    }

    /// Exporter ID.
    #[must_use]
    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    /// The wrapped exporter.
    #[must_use]
    pub fn inner(&self) -> &Arc<dyn Exporter> {
        &self.inner
    }

    async fn attempt(&self, batch: &Batch) -> ExportResult {
        match tokio::time::timeout(self.attempt_timeout, self.inner.export(batch)).await {
            Ok(result) => result,
            Err(_) => ExportResult::retryable(format!(
                "attempt timed out after {}",
                format_duration(self.attempt_timeout)
            )),
        }
    }

    /// Delivers `batch`, retrying per policy until it is acknowledged or
    /// given up on.
    pub async fn deliver(&self, batch: &Batch) -> Delivery {
        let items = batch.len();
        let started = Instant::now();
        let mut state = AttemptState::Pending;
        let mut attempts = 0;

        loop {
            match state {
                AttemptState::Pending => {}
                AttemptState::Retrying {
                    attempt,
                    next_attempt_at,
                } => {
                    debug!(exporter = %self.id, attempt, "Waiting before retry");
                    tokio::time::sleep_until(next_attempt_at).await;
                    self.counters.record_retry();
                }
                AttemptState::Delivered { attempts } => {
                    self.counters.record_sent(items);
                    debug!(exporter = %self.id, items, attempts, "Batch delivered");
                    return Delivery::Delivered { attempts };
                }
                AttemptState::PermanentlyFailed { attempts, reason } => {
                    self.counters.record_lost(items);
                    error!(
                        exporter = %self.id,
                        signal = %batch.signal_type(),
                        items,
                        attempts,
                        reason = %reason,
                        "Dropping batch"
                    );
                    return Delivery::Lost { attempts, reason };
                }
            }

            attempts += 1;
            let outcome = self.attempt(batch).await;
            if !outcome.is_success() {
                self.counters.record_failed_attempt();
                warn!(exporter = %self.id, attempt = attempts, outcome = ?outcome, "Export attempt failed");
            }
            let jitter = rand::thread_rng().gen_range(-1.0..=1.0);
            state = self
                .policy
                .next_state(attempts, outcome, started, Instant::now(), jitter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shared::models::{InstrumentationScope, LogRecord, Resource};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Returns scripted outcomes, then succeeds.
    struct Scripted {
        outcomes: Mutex<VecDeque<ExportResult>>,
        calls: AtomicU32,
        hang: bool,
    }

    impl Scripted {
        fn new(outcomes: Vec<ExportResult>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicU32::new(0),
                hang: false,
            })
        }

        fn hanging() -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(VecDeque::new()),
                calls: AtomicU32::new(0),
                hang: true,
            })
        }
    }

    #[async_trait]
    impl Exporter for Scripted {
        async fn export(&self, _batch: &Batch) -> ExportResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(ExportResult::Success)
        }
    }

    fn batch(n: usize) -> Batch {
        let resource = Arc::new(Resource::new());
        let scope = Arc::new(InstrumentationScope::default());
        (0..n)
            .map(|_| LogRecord::new(Arc::clone(&resource), Arc::clone(&scope), "x"))
            .collect::<Vec<_>>()
            .into()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            enabled: true,
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(5),
            multiplier: 2.0,
            randomization_factor: 0.5,
            max_elapsed_time: Some(Duration::from_secs(60)),
            max_attempts: None,
        }
    }

    fn wrap(inner: Arc<Scripted>, policy: RetryPolicy) -> (RetryingExporter, Arc<ExporterCounters>) {
        let counters = Arc::new(ExporterCounters::default());
        let exporter = RetryingExporter::new(
            "otlphttp".parse().unwrap(),
            inner,
            policy,
            Duration::from_secs(10),
            Arc::clone(&counters),
        );
        (exporter, counters)
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = policy();
        let delays: Vec<u64> = (1..=5).map(|n| policy.backoff(n).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 5, 5]);
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = policy();
        let base = Duration::from_secs(10);
        assert_eq!(policy.with_jitter(base, -1.0), Duration::from_secs(5));
        assert_eq!(policy.with_jitter(base, 0.0), base);
        assert_eq!(policy.with_jitter(base, 1.0), Duration::from_secs(15));
        assert_eq!(policy.with_jitter(base, 7.0), Duration::from_secs(15));
    }

    #[test]
    fn test_retry_after_replaces_backoff() {
        let start = Instant::now();
        let state = policy().next_state(
            1,
            ExportResult::RetryableFailure {
                reason: "429".to_string(),
                retry_after: Some(Duration::from_secs(7)),
            },
            start,
            start,
            1.0,
        );
        assert_eq!(
            state,
            AttemptState::Retrying {
                attempt: 2,
                next_attempt_at: start + Duration::from_secs(7)
            }
        );
    }

    #[test]
    fn test_huge_retry_after_never_overflows() {
        let start = Instant::now();
        let huge = ExportResult::RetryableFailure {
            reason: "503".to_string(),
            retry_after: Some(Duration::from_secs(u64::MAX)),
        };

        let state = policy().next_state(1, huge.clone(), start, start, 0.0);
        assert!(matches!(state, AttemptState::PermanentlyFailed { attempts: 1, .. }));

        let unbounded = RetryPolicy {
            max_elapsed_time: None,
            ..policy()
        };
        let state = unbounded.next_state(1, huge, start, start, 0.0);
        assert_eq!(
            state,
            AttemptState::Retrying {
                attempt: 2,
                next_attempt_at: start + Duration::from_secs(5)
            }
        );
    }

    #[test]
    fn test_budget_exhaustion_is_permanent() {
        let start = Instant::now();
        let state = policy().next_state(
            9,
            ExportResult::retryable("503"),
            start,
            start + Duration::from_secs(58),
            0.0,
        );
        assert!(matches!(state, AttemptState::PermanentlyFailed { attempts: 9, reason } if reason.contains("budget")));
    }

    #[test]
    fn test_disabled_retries_fail_immediately() {
        let start = Instant::now();
        let policy = RetryPolicy {
            enabled: false,
            ..policy()
        };
        let state = policy.next_state(1, ExportResult::retryable("503"), start, start, 0.0);
        assert!(matches!(state, AttemptState::PermanentlyFailed { attempts: 1, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_retryable_failures_then_success_is_delivered() {
        let inner = Scripted::new(vec![
            ExportResult::retryable("503"),
            ExportResult::retryable("503"),
            ExportResult::retryable("connection reset"),
        ]);
        let (exporter, counters) = wrap(Arc::clone(&inner), policy());

        let delivery = exporter.deliver(&batch(5)).await;

        assert_eq!(delivery, Delivery::Delivered { attempts: 4 });
        assert_eq!(inner.calls.load(Ordering::SeqCst), 4);
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.sent_items, 5);
        assert_eq!(snapshot.retries, 3);
        assert_eq!(snapshot.failed_attempts, 3);
        assert_eq!(snapshot.lost_items, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_failure_is_not_retried() {
        let inner = Scripted::new(vec![ExportResult::permanent("HTTP 401")]);
        let (exporter, counters) = wrap(Arc::clone(&inner), policy());

        let delivery = exporter.deliver(&batch(3)).await;

        assert!(matches!(delivery, Delivery::Lost { attempts: 1, .. }));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        let snapshot = counters.snapshot();
        assert_eq!(snapshot.lost_items, 3);
        assert_eq!(snapshot.retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_attempts_bounds_retries() {
        let inner = Scripted::new(vec![ExportResult::retryable("503"); 10]);
        let policy = RetryPolicy {
            max_attempts: Some(3),
            ..policy()
        };
        let (exporter, counters) = wrap(Arc::clone(&inner), policy);

        let delivery = exporter.deliver(&batch(2)).await;

        assert!(matches!(delivery, Delivery::Lost { attempts: 3, .. }));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
        assert_eq!(counters.snapshot().lost_items, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_attempt_times_out() {
        let policy = RetryPolicy {
            max_attempts: Some(2),
            ..policy()
        };
        let (exporter, counters) = wrap(Scripted::hanging(), policy);

        let delivery = exporter.deliver(&batch(1)).await;

        let Delivery::Lost { attempts, reason } = delivery else {
            panic!("expected loss")
        };
        assert_eq!(attempts, 2);
        assert!(reason.contains("timed out"));
        assert_eq!(counters.snapshot().failed_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivering_a_delivered_batch_counts_both() {
        let (exporter, counters) = wrap(Scripted::new(Vec::new()), policy());
        let batch = batch(4);

        assert!(exporter.deliver(&batch).await.is_delivered());
        assert!(exporter.deliver(&batch).await.is_delivered());

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.sent_items, 8);
        assert_eq!(snapshot.lost_items, 0);
    }
}
