use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, PoisonError};

use crate::error::MetricsError;
use crate::instruments::{Counter, Gauge, GaugeFloat64, Histogram, Meter, Timer};
use crate::sample::Sample;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    GaugeFloat64,
    Histogram,
    Timer,
    Meter,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::GaugeFloat64 => "float gauge",
            MetricKind::Histogram => "histogram",
            MetricKind::Timer => "timer",
            MetricKind::Meter => "meter",
        };
        f.write_str(kind)
    }
}

#[derive(Clone)]
pub enum Metric {
    Counter(Arc<Counter>),
    Gauge(Arc<Gauge>),
    GaugeFloat64(Arc<GaugeFloat64>),
    Histogram(Arc<Histogram>),
    Timer(Arc<Timer>),
    Meter(Arc<Meter>),
}

impl Metric {
    pub fn kind(&self) -> MetricKind {
        match self {
            Metric::Counter(_) => MetricKind::Counter,
            Metric::Gauge(_) => MetricKind::Gauge,
            Metric::GaugeFloat64(_) => MetricKind::GaugeFloat64,
            Metric::Histogram(_) => MetricKind::Histogram,
            Metric::Timer(_) => MetricKind::Timer,
            Metric::Meter(_) => MetricKind::Meter,
        }
    }
}

/// Instrument types that can live in a [`MetricsRegistry`].
pub trait Instrument: Send + Sync + Sized + 'static {
    const KIND: MetricKind;

    fn wrap(this: Arc<Self>) -> Metric;

    fn unwrap(metric: &Metric) -> Option<Arc<Self>>;
}

macro_rules! instrument {
    ($ty:ident) => {
        impl Instrument for $ty {
            const KIND: MetricKind = MetricKind::$ty;

            fn wrap(this: Arc<Self>) -> Metric {
                Metric::$ty(this)
            }

            fn unwrap(metric: &Metric) -> Option<Arc<Self>> {
                match metric {
                    Metric::$ty(inner) => Some(inner.clone()),
                    _ => None,
                }
            }
        }
    };
}

instrument!(Counter);
instrument!(Gauge);
instrument!(GaugeFloat64);
instrument!(Histogram);
instrument!(Timer);
instrument!(Meter);

/// Composes the `"<namespace>[,<label>=<value>...] <name>"` key the exporter parses.
pub fn metric_name(namespace: &str, labels: &[(&str, &str)], name: &str) -> String {
    let mut key = namespace.to_string();
    for (label, value) in labels {
        key.push(',');
        key.push_str(label);
        key.push('=');
        key.push_str(value);
    }
    key.push(' ');
    key.push_str(name);
    key
}

/// Replaces every character the exporter rejects in a label value (anything outside
/// `[a-zA-Z0-9_:\-+./]`, including the `,`, `=` and space that delimit the composite key)
/// with `_`.
pub fn sanitize_label_value(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | ':' | '-' | '+' | '.' | '/' => c,
            _ => '_',
        })
        .collect()
}

/// Process-wide collection of named instruments. Created once at startup and passed
/// to whatever records or exports metrics.
#[derive(Default)]
pub struct MetricsRegistry {
    metrics: RwLock<HashMap<String, Metric>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Metric>> {
        self.metrics.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Metric>> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, name: impl Into<String>, metric: Metric) -> Result<(), MetricsError> {
        let name = name.into();
        let mut metrics = self.write();
        if metrics.contains_key(&name) {
            return Err(MetricsError::AlreadyRegistered { name });
        }
        metrics.insert(name, metric);
        Ok(())
    }

    pub fn unregister(&self, name: &str) -> Option<Metric> {
        self.write().remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Metric> {
        self.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Visits a point-in-time copy of the registry; `f` runs without the lock held.
    pub fn each(&self, mut f: impl FnMut(&str, &Metric)) {
        let entries: Vec<(String, Metric)> = self
            .read()
            .iter()
            .map(|(name, metric)| (name.clone(), metric.clone()))
            .collect();
        for (name, metric) in &entries {
            f(name, metric);
        }
    }

    pub fn get_or_register<T: Instrument>(
        &self,
        name: &str,
        make: impl FnOnce() -> T,
    ) -> Result<Arc<T>, MetricsError> {
        if let Some(existing) = self.read().get(name) {
            return Self::expect_kind(name, existing);
        }
        let mut metrics = self.write();
        if let Some(existing) = metrics.get(name) {
            return Self::expect_kind(name, existing);
        }
        let instrument = Arc::new(make());
        metrics.insert(name.to_string(), T::wrap(instrument.clone()));
        Ok(instrument)
    }

    fn expect_kind<T: Instrument>(name: &str, metric: &Metric) -> Result<Arc<T>, MetricsError> {
        T::unwrap(metric).ok_or_else(|| MetricsError::KindMismatch {
            name: name.to_string(),
            expected: T::KIND,
            found: metric.kind(),
        })
    }

    pub fn get_or_register_counter(&self, name: &str) -> Result<Arc<Counter>, MetricsError> {
        self.get_or_register(name, Counter::new)
    }

    pub fn get_or_register_gauge(&self, name: &str) -> Result<Arc<Gauge>, MetricsError> {
        self.get_or_register(name, Gauge::new)
    }

    pub fn get_or_register_gauge_f64(&self, name: &str) -> Result<Arc<GaugeFloat64>, MetricsError> {
        self.get_or_register(name, GaugeFloat64::new)
    }

    pub fn get_or_register_meter(&self, name: &str) -> Result<Arc<Meter>, MetricsError> {
        self.get_or_register(name, Meter::new)
    }

    pub fn get_or_register_timer(&self, name: &str) -> Result<Arc<Timer>, MetricsError> {
        self.get_or_register(name, Timer::new)
    }

    /// `sample` is only called when the histogram does not exist yet.
    pub fn get_or_register_histogram<S: Sample + 'static>(
        &self,
        name: &str,
        sample: impl FnOnce() -> S,
    ) -> Result<Arc<Histogram>, MetricsError> {
        self.get_or_register(name, || Histogram::new(sample()))
    }
}
