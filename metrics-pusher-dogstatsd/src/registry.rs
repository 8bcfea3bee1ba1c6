use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;

/// The kind of a metric.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricKind {
    /// A value that is typically incremented between pushes.
    Counter,

    /// A value that is reported as-is.
    Gauge,
}

/// A point-in-time snapshot of a single metric.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricRecord {
    /// Dotted metric name, such as `worker.1.requests`.
    pub name: String,

    /// Current value.
    pub value: i64,

    /// Metric kind.
    pub kind: MetricKind,

    /// Whether or not the value should be reset to `initial_value` after each push.
    pub reset_after_push: bool,

    /// Value the metric starts at, and is reset to when `reset_after_push` is set.
    pub initial_value: i64,
}

/// A source of metrics to push.
///
/// Metrics are addressed by their position, and are pushed in that order. Implementations own the locking: `read` must
/// take a snapshot under a read lock, and `reset` must restore the initial value under a write lock, so that a reset
/// never interleaves with another writer's update to the same metric. Neither lock is held between calls.
pub trait MetricSource {
    /// Returns the number of registered metrics.
    fn len(&self) -> usize;

    /// Returns `true` if there are no registered metrics.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads a snapshot of the metric at `index`.
    fn read(&self, index: usize) -> Option<MetricRecord>;

    /// Resets the metric at `index` to its initial value.
    fn reset(&self, index: usize);
}

#[derive(Default)]
struct Inner {
    records: Vec<MetricRecord>,
    by_name: HashMap<String, usize>,
}

/// An ordered, in-process metric registry.
///
/// Metrics keep the order they were registered in. Registration is idempotent by name: registering a name that already
/// exists returns a handle to the existing metric, regardless of the requested kind.
///
/// All updates go through a single reader-writer lock, which is also what [`MetricSource::read`] and
/// [`MetricSource::reset`] take.
#[derive(Clone, Default)]
pub struct MetricRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl MetricRegistry {
    /// Creates an empty `MetricRegistry`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a metric starting at zero, which is never reset.
    pub fn register(&self, name: &str, kind: MetricKind) -> MetricHandle {
        self.register_with(name, kind, 0, false)
    }

    /// Registers a metric with the given initial value and reset behavior.
    pub fn register_with(
        &self,
        name: &str,
        kind: MetricKind,
        initial_value: i64,
        reset_after_push: bool,
    ) -> MetricHandle {
        let mut inner = self.inner.write();
        let index = match inner.by_name.get(name).copied() {
            Some(index) => index,
            None => {
                let index = inner.records.len();
                inner.records.push(MetricRecord {
                    name: name.to_string(),
                    value: initial_value,
                    kind,
                    reset_after_push,
                    initial_value,
                });
                inner.by_name.insert(name.to_string(), index);
                index
            }
        };

        MetricHandle { inner: Arc::clone(&self.inner), index }
    }

    /// Returns a handle to the metric with the given name, if it exists.
    pub fn get(&self, name: &str) -> Option<MetricHandle> {
        let index = *self.inner.read().by_name.get(name)?;
        Some(MetricHandle { inner: Arc::clone(&self.inner), index })
    }
}

impl MetricSource for MetricRegistry {
    fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    fn read(&self, index: usize) -> Option<MetricRecord> {
        self.inner.read().records.get(index).cloned()
    }

    fn reset(&self, index: usize) {
        if let Some(record) = self.inner.write().records.get_mut(index) {
            record.value = record.initial_value;
        }
    }
}

/// A handle to a single metric in a [`MetricRegistry`].
#[derive(Clone)]
pub struct MetricHandle {
    inner: Arc<RwLock<Inner>>,
    index: usize,
}

impl MetricHandle {
    fn update<F>(&self, f: F)
    where
        F: FnOnce(i64) -> i64,
    {
        let mut inner = self.inner.write();
        if let Some(record) = inner.records.get_mut(self.index) {
            record.value = f(record.value);
        }
    }

    /// Adds `delta` to the value, saturating at the bounds of an `i64`.
    pub fn increment(&self, delta: i64) {
        self.update(|value| value.saturating_add(delta));
    }

    /// Subtracts `delta` from the value, saturating at the bounds of an `i64`.
    pub fn decrement(&self, delta: i64) {
        self.update(|value| value.saturating_sub(delta));
    }

    /// Sets the value.
    pub fn set(&self, value: i64) {
        self.update(|_| value);
    }

    /// Returns the current value.
    pub fn value(&self) -> i64 {
        self.inner.read().records.get(self.index).map_or(0, |record| record.value)
    }
}
