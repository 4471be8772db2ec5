//! In-process metrics: a registry of named instruments, an exporter turning it into
//! Prometheus text, an adapter for the `metrics` facade, and the HTTP plumbing to
//! serve it all.

mod error;
mod http;
mod instruments;
mod prometheus;
mod recorder;
mod registry;
mod sample;

pub use error::{ExportError, MetricsError};
pub use http::{serve, setup_metrics_routes, track_metrics, EXPOSITION_CONTENT_TYPE, UNMATCHED_PATH};
pub use instruments::{Counter, Gauge, GaugeFloat64, Histogram, Meter, Timer};
pub use prometheus::{format_float, PrometheusExporter};
pub use recorder::MetricsRecorder;
pub use registry::{metric_name, sanitize_label_value, Instrument, Metric, MetricKind, MetricsRegistry};
pub use sample::{BucketSample, BucketSnapshot, Sample, SampleSnapshot, UniformSample, SUMMARY_QUANTILES};
