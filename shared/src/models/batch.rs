//! Batches: the unit moved through a pipeline.

use super::common::{Resource, SignalItem, SignalType};
use super::{LogRecord, MetricPoint, Span};
use std::sync::Arc;
use thiserror::Error;

/// An ordered, homogeneous sequence of signal items.
///
/// The variant fixes the signal type, so a batch can never mix spans with
/// metric points or log records. Items keep their own resource reference,
/// which lets batches from different resources be merged without losing
/// where each item came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Batch {
    /// Spans.
    Traces(Vec<Span>),
    /// Metric data points.
    Metrics(Vec<MetricPoint>),
    /// Log records.
    Logs(Vec<LogRecord>),
}

/// Errors from batch operations.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum BatchError {
    /// Tried to combine batches of different signal types.
    #[error("cannot merge {found} batch into {expected} batch")]
    SignalMismatch {
        /// Signal type of the receiving batch.
        expected: SignalType,
        /// Signal type of the batch that was offered.
        found: SignalType,
    },
}

macro_rules! each_variant {
    ($batch:expr, $items:ident => $body:expr) => {
        match $batch {
            Batch::Traces($items) => $body,
            Batch::Metrics($items) => $body,
            Batch::Logs($items) => $body,
        }
    };
}

impl Batch {
    /// An empty batch of the given signal type.
    #[must_use]
    pub fn empty(signal: SignalType) -> Self {
        match signal {
            SignalType::Traces => Self::Traces(Vec::new()),
            SignalType::Metrics => Self::Metrics(Vec::new()),
            SignalType::Logs => Self::Logs(Vec::new()),
        }
    }

    /// The signal type of this batch.
    #[must_use]
    pub fn signal_type(&self) -> SignalType {
        match self {
            Self::Traces(_) => SignalType::Traces,
            Self::Metrics(_) => SignalType::Metrics,
            Self::Logs(_) => SignalType::Logs,
        }
    }

    /// Number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        each_variant!(self, items => items.len())
    }

    /// Whether the batch holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Moves all items of `other` to the end of this batch, keeping order.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::SignalMismatch`] if the signal types differ; in
    /// that case neither batch is modified.
    pub fn append(&mut self, other: Batch) -> Result<(), BatchError> {
        match (self, other) {
            (Self::Traces(a), Self::Traces(mut b)) => a.append(&mut b),
            (Self::Metrics(a), Self::Metrics(mut b)) => a.append(&mut b),
            (Self::Logs(a), Self::Logs(mut b)) => a.append(&mut b),
            (this, other) => {
                return Err(BatchError::SignalMismatch {
                    expected: this.signal_type(),
                    found: other.signal_type(),
                })
            }
        }
        Ok(())
    }

    /// Splits the batch at `at`, returning the items from `at` onwards.
    ///
    /// # Panics
    ///
    /// Panics if `at > len`.
    #[must_use]
    pub fn split_off(&mut self, at: usize) -> Batch {
        match self {
            Self::Traces(items) => Self::Traces(items.split_off(at)),
            Self::Metrics(items) => Self::Metrics(items.split_off(at)),
            Self::Logs(items) => Self::Logs(items.split_off(at)),
        }
    }

    /// Takes all items, leaving an empty batch of the same type behind.
    #[must_use]
    pub fn take(&mut self) -> Batch {
        match self {
            Self::Traces(items) => Self::Traces(std::mem::take(items)),
            Self::Metrics(items) => Self::Metrics(std::mem::take(items)),
            Self::Logs(items) => Self::Logs(std::mem::take(items)),
        }
    }

    /// Distinct resources referenced by the items, in first-seen order.
    ///
    /// Resources are compared by content, so items decoded from separate
    /// requests of the same origin count once.
    #[must_use]
    pub fn resources(&self) -> Vec<Arc<Resource>> {
        let mut seen: Vec<Arc<Resource>> = Vec::new();
        each_variant!(self, items => {
            for item in items {
                let resource = item.resource();
                if !seen.iter().any(|r| Arc::ptr_eq(r, resource) || **r == **resource) {
                    seen.push(Arc::clone(resource));
                }
            }
        });
        seen
    }

    /// Resource of the first item, if any.
    #[must_use]
    pub fn first_resource(&self) -> Option<&Arc<Resource>> {
        each_variant!(self, items => items.first().map(SignalItem::resource))
    }

    /// Replaces every item's resource with `f(resource)`.
    ///
    /// `f` is invoked once per run of items sharing the same `Arc`, so
    /// items that shared a resource before still share one afterwards.
    pub fn map_resources<F>(&mut self, mut f: F)
    where
        F: FnMut(&Arc<Resource>) -> Arc<Resource>,
    {
        let mut last: Option<(Arc<Resource>, Arc<Resource>)> = None;
        each_variant!(self, items => {
            for item in items.iter_mut() {
                let mapped = match &last {
                    Some((from, to)) if Arc::ptr_eq(from, item.resource()) => Arc::clone(to),
                    _ => {
                        let from = Arc::clone(item.resource());
                        let to = f(&from);
                        last = Some((from, Arc::clone(&to)));
                        to
                    }
                };
                item.replace_resource(mapped);
            }
        });
    }
}

impl From<Vec<Span>> for Batch {
    fn from(spans: Vec<Span>) -> Self {
        Self::Traces(spans)
    }
}

impl From<Vec<MetricPoint>> for Batch {
    fn from(points: Vec<MetricPoint>) -> Self {
        Self::Metrics(points)
    }
}

impl From<Vec<LogRecord>> for Batch {
    fn from(records: Vec<LogRecord>) -> Self {
        Self::Logs(records)
    }
}
