use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::sample::{BucketSnapshot, Sample, SampleSnapshot, UniformSample};

#[derive(Debug, Default)]
pub struct Counter {
    count: AtomicI64,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self, n: i64) {
        self.count.fetch_add(n, Ordering::Relaxed);
    }

    pub fn dec(&self, n: i64) {
        self.count.fetch_sub(n, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.count.store(0, Ordering::Relaxed);
    }

    pub(crate) fn set(&self, n: i64) {
        self.count.store(n, Ordering::Relaxed);
    }

    pub fn count(&self) -> i64 {
        self.count.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicI64,
}

impl Gauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, v: i64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Float gauge stored as raw bits.
#[derive(Debug, Default)]
pub struct GaugeFloat64 {
    bits: AtomicU64,
}

impl GaugeFloat64 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, v: f64) {
        self.bits.store(v.to_bits(), Ordering::Relaxed);
    }

    pub fn add(&self, delta: f64) {
        // fetch_update only fails when the closure returns None
        _ = self
            .bits
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                Some((f64::from_bits(bits) + delta).to_bits())
            });
    }

    pub fn value(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// Event count plus the mean rate since creation.
#[derive(Debug)]
pub struct Meter {
    count: AtomicI64,
    started: Instant,
}

impl Default for Meter {
    fn default() -> Self {
        Self {
            count: AtomicI64::new(0),
            started: Instant::now(),
        }
    }
}

impl Meter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, n: i64) {
        self.count.fetch_add(n, Ordering::Relaxed);
    }

    pub fn count(&self) -> i64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Events per second since creation.
    pub fn rate_mean(&self) -> f64 {
        let elapsed = self.started.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.count() as f64 / elapsed
    }
}

pub struct Histogram {
    sample: Box<dyn Sample>,
}

impl Histogram {
    pub fn new<S: Sample + 'static>(sample: S) -> Self {
        Self {
            sample: Box::new(sample),
        }
    }

    pub fn update(&self, v: i64) {
        self.sample.update(v)
    }

    pub fn clear(&self) {
        self.sample.clear()
    }

    pub fn count(&self) -> i64 {
        self.snapshot().count()
    }

    pub fn snapshot(&self) -> SampleSnapshot {
        self.sample.snapshot()
    }

    pub fn buckets(&self) -> Option<BucketSnapshot> {
        self.sample.buckets()
    }
}

impl Default for Histogram {
    fn default() -> Self {
        Self::new(UniformSample::default())
    }
}

/// Durations in nanoseconds, plus a meter of how often they were recorded.
#[derive(Default)]
pub struct Timer {
    histogram: Histogram,
    meter: Meter,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, d: Duration) {
        let nanos = i64::try_from(d.as_nanos()).unwrap_or(i64::MAX);
        self.histogram.update(nanos);
        self.meter.mark(1);
    }

    pub fn update_since(&self, start: Instant) {
        self.update(start.elapsed())
    }

    /// Runs `f` and records how long it took.
    pub fn time<R>(&self, f: impl FnOnce() -> R) -> R {
        let start = Instant::now();
        let out = f();
        self.update_since(start);
        out
    }

    pub fn count(&self) -> i64 {
        self.meter.count()
    }

    pub fn rate_mean(&self) -> f64 {
        self.meter.rate_mean()
    }

    pub fn snapshot(&self) -> SampleSnapshot {
        self.histogram.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::BucketSample;

    #[test]
    fn counter_and_gauges() {
        let c = Counter::new();
        c.inc(5);
        c.dec(2);
        assert_eq!(c.count(), 3);
        c.clear();
        assert_eq!(c.count(), 0);

        let g = GaugeFloat64::new();
        g.update(1.5);
        g.add(2.25);
        assert_eq!(g.value(), 3.75);
    }

    #[test]
    fn timer_records_nanoseconds() {
        let t = Timer::new();
        t.update(Duration::from_micros(3));
        t.update(Duration::from_micros(5));
        let sn = t.snapshot();
        assert_eq!(t.count(), 2);
        assert_eq!(sn.min(), 3_000);
        assert_eq!(sn.max(), 5_000);
        assert_eq!(t.time(|| 42), 42);
        assert_eq!(t.count(), 3);
    }

    #[test]
    fn histogram_exposes_buckets_only_when_sampled_with_them() {
        assert!(Histogram::default().buckets().is_none());
        let h = Histogram::new(BucketSample::new(vec![1.0], 16));
        h.update(2);
        assert_eq!(h.buckets().map(|b| b.cumulative), Some(vec![0, 1]));
        assert_eq!(h.count(), 1);
    }
}
