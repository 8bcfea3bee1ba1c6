use std::sync::Arc;

use metrics::{
    Counter, CounterFn, Gauge, GaugeFn, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
};

use crate::registry::{MetricHandle, MetricKind, MetricRegistry};

/// A recorder that registers counters and gauges in a [`MetricRegistry`].
///
/// Metrics are registered by the name of their key. Labels are ignored, as dimensions are carried in the dotted metric
/// name itself (for example, `worker.1.requests`) and turned into tags when pushed.
///
/// Histograms cannot be represented and are discarded.
pub struct PushRecorder {
    registry: MetricRegistry,
}

impl PushRecorder {
    /// Creates a new `PushRecorder` backed by the given registry.
    pub fn new(registry: MetricRegistry) -> Self {
        PushRecorder { registry }
    }

    /// Returns a reference to the registry.
    pub fn registry(&self) -> &MetricRegistry {
        &self.registry
    }
}

impl Recorder for PushRecorder {
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
        let handle = self.registry.register(key.name(), MetricKind::Counter);
        Counter::from_arc(Arc::new(RegistryCounter(handle)))
    }

    fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
        let handle = self.registry.register(key.name(), MetricKind::Gauge);
        Gauge::from_arc(Arc::new(RegistryGauge(handle)))
    }

    fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
        Histogram::noop()
    }
}

struct RegistryCounter(MetricHandle);

impl CounterFn for RegistryCounter {
    fn increment(&self, value: u64) {
        self.0.increment(i64::try_from(value).unwrap_or(i64::MAX));
    }

    fn absolute(&self, value: u64) {
        self.0.set(i64::try_from(value).unwrap_or(i64::MAX));
    }
}

// Gauge values are truncated towards zero, saturating at the bounds of an `i64`.
struct RegistryGauge(MetricHandle);

impl GaugeFn for RegistryGauge {
    fn increment(&self, value: f64) {
        self.0.increment(value as i64);
    }

    fn decrement(&self, value: f64) {
        self.0.decrement(value as i64);
    }

    fn set(&self, value: f64) {
        self.0.set(value as i64);
    }
}
