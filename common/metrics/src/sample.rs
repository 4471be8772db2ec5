//! Reservoir samples backing histograms and timers.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rand::Rng;

/// Quantiles exported for every summary.
pub const SUMMARY_QUANTILES: [f64; 5] = [0.5, 0.75, 0.95, 0.99, 0.999];

pub trait Sample: Send + Sync {
    fn update(&self, value: i64);

    fn clear(&self);

    fn snapshot(&self) -> SampleSnapshot;

    /// Fixed upper bounds with cumulative counts, for samples that keep them.
    fn buckets(&self) -> Option<BucketSnapshot> {
        None
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Reservoir {
    count: i64,
    sum: i64,
    values: Vec<i64>,
}

/// Uniform sample of at most `size` values, kept with Vitter's algorithm R.
pub struct UniformSample {
    size: usize,
    reservoir: Mutex<Reservoir>,
}

impl UniformSample {
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            reservoir: Mutex::new(Reservoir::default()),
        }
    }
}

impl Default for UniformSample {
    fn default() -> Self {
        Self::new(1028)
    }
}

impl Sample for UniformSample {
    fn update(&self, value: i64) {
        let mut reservoir = lock(&self.reservoir);
        reservoir.count += 1;
        reservoir.sum = reservoir.sum.saturating_add(value);
        if reservoir.values.len() < self.size {
            reservoir.values.push(value);
            return;
        }
        let slot = rand::thread_rng().gen_range(0..reservoir.count);
        if let Ok(slot) = usize::try_from(slot) {
            if slot < self.size {
                reservoir.values[slot] = value;
            }
        }
    }

    fn clear(&self) {
        *lock(&self.reservoir) = Reservoir::default();
    }

    fn snapshot(&self) -> SampleSnapshot {
        let reservoir = lock(&self.reservoir);
        SampleSnapshot::new(reservoir.count, reservoir.sum, reservoir.values.clone())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BucketSnapshot {
    /// Upper bounds, ascending.
    pub bounds: Vec<f64>,
    /// Observations `<=` each bound; the extra last entry is the `+Inf` bucket.
    pub cumulative: Vec<i64>,
    pub count: i64,
    pub sum: i64,
}

struct Buckets {
    counts: Vec<i64>,
    count: i64,
    sum: i64,
}

/// Counts observations into fixed buckets and keeps a uniform reservoir for quantiles.
pub struct BucketSample {
    bounds: Vec<f64>,
    buckets: Mutex<Buckets>,
    reservoir: UniformSample,
}

impl BucketSample {
    pub fn new(mut bounds: Vec<f64>, reservoir_size: usize) -> Self {
        bounds.retain(|b| b.is_finite());
        bounds.sort_by(f64::total_cmp);
        bounds.dedup();
        let slots = bounds.len() + 1;
        Self {
            bounds,
            buckets: Mutex::new(Buckets {
                counts: vec![0; slots],
                count: 0,
                sum: 0,
            }),
            reservoir: UniformSample::new(reservoir_size),
        }
    }

    pub fn bounds(&self) -> &[f64] {
        &self.bounds
    }
}

impl Sample for BucketSample {
    fn update(&self, value: i64) {
        let observed = value as f64;
        let slot = self
            .bounds
            .iter()
            .position(|bound| observed <= *bound)
            .unwrap_or(self.bounds.len());
        {
            let mut buckets = lock(&self.buckets);
            buckets.counts[slot] += 1;
            buckets.count += 1;
            buckets.sum = buckets.sum.saturating_add(value);
        }
        self.reservoir.update(value);
    }

    fn clear(&self) {
        {
            let mut buckets = lock(&self.buckets);
            buckets.counts.iter_mut().for_each(|c| *c = 0);
            buckets.count = 0;
            buckets.sum = 0;
        }
        self.reservoir.clear();
    }

    fn snapshot(&self) -> SampleSnapshot {
        self.reservoir.snapshot()
    }

    fn buckets(&self) -> Option<BucketSnapshot> {
        let buckets = lock(&self.buckets);
        let cumulative = buckets
            .counts
            .iter()
            .scan(0i64, |running, count| {
                *running += count;
                Some(*running)
            })
            .collect();
        Some(BucketSnapshot {
            bounds: self.bounds.clone(),
            cumulative,
            count: buckets.count,
            sum: buckets.sum,
        })
    }
}

/// Frozen view of a sample: totals over every observation, statistics over the
/// values currently held in the reservoir.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SampleSnapshot {
    count: i64,
    sum: i64,
    values: Vec<i64>,
}

impl SampleSnapshot {
    pub fn new(count: i64, sum: i64, mut values: Vec<i64>) -> Self {
        values.sort_unstable();
        Self { count, sum, values }
    }

    pub fn from_values(values: Vec<i64>) -> Self {
        let count = i64::try_from(values.len()).unwrap_or(i64::MAX);
        let sum = values.iter().fold(0i64, |acc, v| acc.saturating_add(*v));
        Self::new(count, sum, values)
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn sum(&self) -> i64 {
        self.sum
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }

    pub fn min(&self) -> i64 {
        self.values.first().copied().unwrap_or(0)
    }

    pub fn max(&self) -> i64 {
        self.values.last().copied().unwrap_or(0)
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().map(|v| *v as f64).sum::<f64>() / self.values.len() as f64
    }

    /// Population variance.
    pub fn variance(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let mean = self.mean();
        let squares: f64 = self
            .values
            .iter()
            .map(|v| {
                let d = *v as f64 - mean;
                d * d
            })
            .sum();
        squares / self.values.len() as f64
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Position `p * (n + 1)` over the sorted values, clamped to the ends and linearly
    /// interpolated in between.
    pub fn percentile(&self, p: f64) -> f64 {
        let n = self.values.len();
        if n == 0 {
            return 0.0;
        }
        let pos = p * (n as f64 + 1.0);
        if pos < 1.0 {
            return self.values[0] as f64;
        }
        if pos >= n as f64 {
            return self.values[n - 1] as f64;
        }
        let idx = pos as usize;
        let lower = self.values[idx - 1] as f64;
        let upper = self.values[idx] as f64;
        lower + (pos - pos.floor()) * (upper - lower)
    }

    pub fn percentiles(&self, ps: &[f64]) -> Vec<f64> {
        ps.iter().map(|p| self.percentile(*p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_statistics() {
        let sn = SampleSnapshot::from_values(vec![31, 5, 25, 15]);
        assert_eq!(sn.count(), 4);
        assert_eq!(sn.sum(), 76);
        assert_eq!(sn.min(), 5);
        assert_eq!(sn.max(), 31);
        assert_eq!(sn.mean(), 19.0);
        assert_eq!(sn.std_dev(), 9.899494936611665);
        assert_eq!(sn.percentile(0.5), 20.0);
        assert_eq!(sn.percentile(0.75), 29.5);
        assert_eq!(sn.percentile(0.1), 5.0);
        assert_eq!(sn.percentile(0.999), 31.0);
    }

    #[test]
    fn empty_snapshot_is_zero() {
        let sn = SampleSnapshot::default();
        assert_eq!(sn.min(), 0);
        assert_eq!(sn.mean(), 0.0);
        assert_eq!(sn.percentiles(&SUMMARY_QUANTILES), vec![0.0; 5]);
    }

    #[test]
    fn uniform_sample_keeps_totals_beyond_reservoir() {
        let sample = UniformSample::new(10);
        for v in 1..=100 {
            sample.update(v);
        }
        let sn = sample.snapshot();
        assert_eq!(sn.count(), 100);
        assert_eq!(sn.sum(), 5050);
        assert_eq!(sn.values().len(), 10);

        sample.clear();
        assert_eq!(sample.snapshot(), SampleSnapshot::default());
    }

    #[test]
    fn bucket_sample_counts_cumulatively() {
        let sample = BucketSample::new(vec![10.0, 1.0, 5.0], 100);
        assert_eq!(sample.bounds(), &[1.0, 5.0, 10.0]);
        for v in [0, 1, 3, 7, 10, 11, 50] {
            sample.update(v);
        }
        let buckets = sample.buckets().expect("bucket sample");
        assert_eq!(buckets.cumulative, vec![2, 3, 5, 7]);
        assert_eq!(buckets.count, 7);
        assert_eq!(buckets.sum, 82);
        assert_eq!(sample.snapshot().count(), 7);
    }
}
