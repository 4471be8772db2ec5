//! Bridges the `metrics` facade into a [`MetricsRegistry`], so code instrumented with
//! `metrics::counter!` and friends shows up in the exporter output.

use std::sync::Arc;

use metrics::{
    Counter, CounterFn, Gauge, GaugeFn, HistogramFn, Key, KeyName, Metadata, Recorder,
    SetRecorderError, SharedString, Unit,
};
use tracing::warn;

use crate::instruments::{self, GaugeFloat64};
use crate::registry::{metric_name, sanitize_label_value, MetricsRegistry};
use crate::sample::UniformSample;

// ----------------- Recorder impl -----------------
// Descriptions and units are ignored, the exposition format has nowhere to put them.

/// Facade keys become `"<namespace>,<labels> <name>"`. A trailing `_total` is dropped
/// from counter names since the exporter adds it back. Histogram values are rounded to
/// integers, so record milliseconds or nanoseconds rather than seconds.
#[derive(Clone)]
pub struct MetricsRecorder {
    registry: Arc<MetricsRegistry>,
    namespace: String,
}

impl MetricsRecorder {
    pub fn new(registry: Arc<MetricsRegistry>, namespace: &str) -> Self {
        Self {
            registry,
            namespace: namespace.to_string(),
        }
    }

    /// Installs this recorder as the process-wide facade recorder.
    pub fn install(self) -> Result<(), SetRecorderError<Self>> {
        metrics::set_global_recorder(self)
    }

    fn composite(&self, key: &Key, name: &str) -> String {
        let labels: Vec<(String, String)> = key
            .labels()
            .map(|l| (l.key().to_string(), sanitize_label_value(l.value())))
            .collect();
        let labels: Vec<(&str, &str)> = labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        metric_name(&self.namespace, &labels, name)
    }
}

impl Recorder for MetricsRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        let name = key.name();
        let name = self.composite(key, name.strip_suffix("_total").unwrap_or(name));
        match self.registry.get_or_register_counter(&name) {
            Ok(counter) => Counter::from_arc(counter),
            Err(err) => {
                warn!(metric = %name, "dropping facade counter: {err}");
                Counter::noop()
            }
        }
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        let name = self.composite(key, key.name());
        match self.registry.get_or_register_gauge_f64(&name) {
            Ok(gauge) => Gauge::from_arc(gauge),
            Err(err) => {
                warn!(metric = %name, "dropping facade gauge: {err}");
                Gauge::noop()
            }
        }
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> metrics::Histogram {
        let name = self.composite(key, key.name());
        match self
            .registry
            .get_or_register_histogram(&name, UniformSample::default)
        {
            Ok(histogram) => metrics::Histogram::from_arc(histogram),
            Err(err) => {
                warn!(metric = %name, "dropping facade histogram: {err}");
                metrics::Histogram::noop()
            }
        }
    }
}

// ----------------- Metric function impls -----------------

impl CounterFn for instruments::Counter {
    fn increment(&self, value: u64) {
        self.inc(i64::try_from(value).unwrap_or(i64::MAX));
    }

    fn absolute(&self, value: u64) {
        self.set(i64::try_from(value).unwrap_or(i64::MAX));
    }
}

impl GaugeFn for GaugeFloat64 {
    fn increment(&self, value: f64) {
        self.add(value);
    }

    fn decrement(&self, value: f64) {
        self.add(-value);
    }

    fn set(&self, value: f64) {
        self.update(value);
    }
}

impl HistogramFn for instruments::Histogram {
    fn record(&self, value: f64) {
        self.update(value.round() as i64);
    }
}
