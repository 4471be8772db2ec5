//! Conversion of a [`MetricsRegistry`] into the Prometheus text exposition format.
//!
//! Registry keys have the shape `"<namespace>[,<label>=<value>...] <name>"`. The
//! exported name is `<namespace>_<name>` with hyphens turned into underscores, and the
//! service label always comes first:
//!
//! ```text
//! # ERROR bad label "bad" in metric "app,bad a"
//!
//! # TYPE app_c1_total counter
//! app_c1_total{service="test",l1="2"} 0
//!
//! # TYPE app_h1 summary
//! app_h1_count{service="test",l1="1"} 3
//! app_h1_sum{service="test",l1="1"} 45
//! app_h1{service="test",l1="1",quantile="0.5"} 15
//! ```
//!
//! Counters and meters become `_total` counters, gauges stay gauges, histograms and
//! timers become summaries plus `_min`, `_max`, `_mean` and `_stddev` gauges once they
//! have observations. Bucketed histograms additionally get a `_buckets` histogram.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use regex::Regex;

use crate::error::ExportError;
use crate::registry::{Metric, MetricsRegistry};
use crate::sample::{BucketSnapshot, SampleSnapshot, SUMMARY_QUANTILES};

static METRIC_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("valid metric name regex"));
static LABEL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_]*$").expect("valid label name regex"));
static LABEL_VALUE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_:\-+./]*$").expect("valid label value regex"));

const QUANTILE_LABELS: [&str; 5] = ["0.5", "0.75", "0.95", "0.99", "0.999"];

/// Caches the exposition text of a registry; [`update`](Self::update) rebuilds it and
/// [`render`](Self::render) hands out the last build.
pub struct PrometheusExporter {
    registry: Arc<MetricsRegistry>,
    name_label: String,
    cache: RwLock<String>,
}

struct Signature {
    name: String,
    /// Rendered `,key="value"` pairs, in key order of the raw name.
    labels: String,
}

#[derive(Default)]
struct Block {
    kind: &'static str,
    lines: Vec<(String, String)>,
}

#[derive(Default)]
struct Exposition {
    blocks: BTreeMap<String, Block>,
}

impl Exposition {
    fn add(&mut self, block: &str, kind: &'static str, full_name: String, value: String) {
        let entry = self.blocks.entry(block.to_string()).or_default();
        entry.kind = kind;
        entry.lines.push((full_name, value));
    }

    fn write(mut self, failures: &[String]) -> String {
        let mut out = String::new();
        for failure in failures {
            out.push_str("# ERROR ");
            out.push_str(&failure.replace('\n', ""));
            out.push('\n');
        }
        for (name, block) in self.blocks.iter_mut() {
            out.push_str(&format!("\n# TYPE {name} {}\n", block.kind));
            block.lines.sort_by(|a, b| a.0.cmp(&b.0));
            for (full_name, value) in &block.lines {
                out.push_str(full_name);
                out.push(' ');
                out.push_str(value);
                out.push('\n');
            }
        }
        out
    }
}

impl PrometheusExporter {
    pub fn new(registry: Arc<MetricsRegistry>, service: &str) -> Self {
        Self {
            registry,
            name_label: format!("service=\"{service}\""),
            cache: RwLock::new(String::new()),
        }
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    /// Last text built by [`update`](Self::update).
    pub fn render(&self) -> String {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Converts the whole registry and replaces the cache. Malformed metrics are
    /// reported both as `# ERROR` lines and in the returned error, the rest is
    /// exported anyway.
    pub fn update(&self) -> Result<(), ExportError> {
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);

        let mut failures = Vec::new();
        let mut exposition = Exposition::default();
        self.registry.each(|raw, metric| {
            let Some(signature) = parse_signature(raw, &mut failures) else {
                return;
            };
            self.convert(&mut exposition, &signature, metric);
        });

        failures.sort();
        *cache = exposition.write(&failures);

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ExportError { failures })
        }
    }

    fn convert(&self, out: &mut Exposition, sig: &Signature, metric: &Metric) {
        match metric {
            Metric::Counter(c) => self.add_counter(out, sig, c.count()),
            Metric::Meter(m) => self.add_counter(out, sig, m.count()),
            Metric::Gauge(g) => self.add_gauge(out, &sig.name, &sig.labels, g.value().to_string()),
            Metric::GaugeFloat64(g) => {
                self.add_gauge(out, &sig.name, &sig.labels, format_float(g.value()))
            }
            Metric::Histogram(h) => {
                // an empty bucket histogram is still exported
                if let Some(buckets) = h.buckets() {
                    self.add_buckets(out, sig, &buckets);
                }
                let snapshot = h.snapshot();
                if snapshot.count() > 0 {
                    self.add_summary(out, sig, &snapshot);
                }
            }
            Metric::Timer(t) => {
                let snapshot = t.snapshot();
                if snapshot.count() > 0 {
                    self.add_summary(out, sig, &snapshot);
                }
            }
        }
    }

    fn full_name(&self, name: &str, labels: &str) -> String {
        format!("{name}{{{}{labels}}}", self.name_label)
    }

    fn add_counter(&self, out: &mut Exposition, sig: &Signature, value: i64) {
        let name = format!("{}_total", sig.name);
        let full = self.full_name(&name, &sig.labels);
        out.add(&name, "counter", full, value.to_string());
    }

    fn add_gauge(&self, out: &mut Exposition, name: &str, labels: &str, value: String) {
        out.add(name, "gauge", self.full_name(name, labels), value);
    }

    fn add_summary(&self, out: &mut Exposition, sig: &Signature, snapshot: &SampleSnapshot) {
        let name = &sig.name;
        let labels = &sig.labels;
        out.add(
            name,
            "summary",
            self.full_name(&format!("{name}_count"), labels),
            snapshot.count().to_string(),
        );
        out.add(
            name,
            "summary",
            self.full_name(&format!("{name}_sum"), labels),
            snapshot.sum().to_string(),
        );
        let quantiles = snapshot.percentiles(&SUMMARY_QUANTILES);
        for (label, value) in QUANTILE_LABELS.iter().zip(quantiles) {
            let labels = format!("{labels},quantile=\"{label}\"");
            out.add(name, "summary", self.full_name(name, &labels), format_float(value));
        }

        self.add_gauge(out, &format!("{name}_min"), labels, snapshot.min().to_string());
        self.add_gauge(out, &format!("{name}_max"), labels, snapshot.max().to_string());
        self.add_gauge(out, &format!("{name}_mean"), labels, format_float(snapshot.mean()));
        self.add_gauge(out, &format!("{name}_stddev"), labels, format_float(snapshot.std_dev()));
    }

    fn add_buckets(&self, out: &mut Exposition, sig: &Signature, buckets: &BucketSnapshot) {
        let name = format!("{}_buckets", sig.name);
        let labels = &sig.labels;
        for (bound, count) in buckets.bounds.iter().zip(&buckets.cumulative) {
            let le = format!("{labels},le=\"{bound:.6}\"");
            out.add(&name, "histogram", self.full_name(&name, &le), count.to_string());
        }
        let le = format!("{labels},le=\"+Inf\"");
        out.add(&name, "histogram", self.full_name(&name, &le), buckets.count.to_string());
        out.add(
            &name,
            "histogram",
            self.full_name(&format!("{name}_count"), labels),
            buckets.count.to_string(),
        );
        out.add(
            &name,
            "histogram",
            self.full_name(&format!("{name}_sum"), labels),
            buckets.sum.to_string(),
        );
    }
}

fn sanitize(name: &str) -> String {
    name.replace('-', "_")
}

/// Splits a registry key into exported name and labels. Signature, name, label shape
/// and label name problems drop the whole metric; a bad label value only drops that
/// label.
fn parse_signature(raw: &str, failures: &mut Vec<String>) -> Option<Signature> {
    let parts: Vec<&str> = raw.split(' ').collect();
    let [head, metric] = parts.as_slice() else {
        failures.push(format!("bad metric signature \"{raw}\""));
        return None;
    };

    let mut head = head.split(',');
    let namespace = head.next().unwrap_or_default();
    let name = sanitize(&format!("{namespace}_{metric}"));
    if !METRIC_NAME.is_match(&name) {
        failures.push(format!("bad metric name \"{name}\" in metric \"{raw}\""));
        return None;
    }

    let mut labels = String::new();
    let mut value_failures = Vec::new();
    for label in head {
        let kv: Vec<&str> = label.split('=').collect();
        let [key, value] = kv.as_slice() else {
            failures.push(format!("bad label \"{label}\" in metric \"{raw}\""));
            return None;
        };
        if !LABEL_NAME.is_match(key) {
            failures.push(format!("bad label name \"{label}\" in metric \"{raw}\""));
            return None;
        }
        if !LABEL_VALUE.is_match(value) {
            value_failures.push(format!("bad label value \"{label}\" in metric \"{raw}\""));
            continue;
        }
        labels.push_str(&format!(",{}=\"{value}\"", sanitize(key)));
    }
    failures.append(&mut value_failures);

    Some(Signature { name, labels })
}

/// Shortest round-trip form, with the exposition spellings for non-finite values.
pub fn format_float(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v == f64::INFINITY {
        "+Inf".to_string()
    } else if v == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        v.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::sample::BucketSample;

    fn exporter() -> (Arc<MetricsRegistry>, PrometheusExporter) {
        let registry = Arc::new(MetricsRegistry::new());
        let exporter = PrometheusExporter::new(registry.clone(), "test");
        (registry, exporter)
    }

    #[test]
    fn empty_registry_renders_nothing() {
        let (_, exporter) = exporter();
        assert_eq!(exporter.update(), Ok(()));
        assert_eq!(exporter.render(), "");
    }

    #[test]
    fn counter_example() {
        let (registry, exporter) = exporter();
        registry.get_or_register_counter("app c2").unwrap().inc(3);
        exporter.update().unwrap();
        assert_eq!(
            exporter.render(),
            "\n# TYPE app_c2_total counter\napp_c2_total{service=\"test\"} 3\n"
        );
    }

    #[test]
    fn labels_gauges_and_meters() {
        let (registry, exporter) = exporter();
        registry.get_or_register_gauge("app,l1=2 g1").unwrap().update(7);
        registry.get_or_register_gauge("app,l1=1 g1").unwrap().update(-1);
        registry
            .get_or_register_gauge_f64("my-app,zone=eu-west-1 load")
            .unwrap()
            .update(0.25);
        registry.get_or_register_meter("app,l1=1 m1").unwrap().mark(4);
        exporter.update().unwrap();

        let expected = concat!(
            "\n# TYPE app_g1 gauge\n",
            "app_g1{service=\"test\",l1=\"1\"} -1\n",
            "app_g1{service=\"test\",l1=\"2\"} 7\n",
            "\n# TYPE app_m1_total counter\n",
            "app_m1_total{service=\"test\",l1=\"1\"} 4\n",
            "\n# TYPE my_app_load gauge\n",
            "my_app_load{service=\"test\",zone=\"eu-west-1\"} 0.25\n",
        );
        assert_eq!(exporter.render(), expected);
    }

    #[test]
    fn histogram_summary_and_derived_gauges() {
        let (registry, exporter) = exporter();
        let h = registry
            .get_or_register_histogram("app h1", crate::sample::UniformSample::default)
            .unwrap();
        for v in [5, 15, 25, 31] {
            h.update(v);
        }
        registry
            .get_or_register_histogram("app empty", crate::sample::UniformSample::default)
            .unwrap();
        exporter.update().unwrap();

        let expected = concat!(
            "\n# TYPE app_h1 summary\n",
            "app_h1_count{service=\"test\"} 4\n",
            "app_h1_sum{service=\"test\"} 76\n",
            "app_h1{service=\"test\",quantile=\"0.5\"} 20\n",
            "app_h1{service=\"test\",quantile=\"0.75\"} 29.5\n",
            "app_h1{service=\"test\",quantile=\"0.95\"} 31\n",
            "app_h1{service=\"test\",quantile=\"0.99\"} 31\n",
            "app_h1{service=\"test\",quantile=\"0.999\"} 31\n",
            "\n# TYPE app_h1_max gauge\n",
            "app_h1_max{service=\"test\"} 31\n",
            "\n# TYPE app_h1_mean gauge\n",
            "app_h1_mean{service=\"test\"} 19\n",
            "\n# TYPE app_h1_min gauge\n",
            "app_h1_min{service=\"test\"} 5\n",
            "\n# TYPE app_h1_stddev gauge\n",
            "app_h1_stddev{service=\"test\"} 9.899494936611665\n",
        );
        assert_eq!(exporter.render(), expected);
    }

    #[test]
    fn bucket_histogram_is_exported_even_when_empty() {
        let (registry, exporter) = exporter();
        registry
            .get_or_register_histogram("app,l=x lat", || BucketSample::new(vec![10.0, 100.0], 64))
            .unwrap();
        exporter.update().unwrap();

        let expected = concat!(
            "\n# TYPE app_lat_buckets histogram\n",
            "app_lat_buckets_count{service=\"test\",l=\"x\"} 0\n",
            "app_lat_buckets_sum{service=\"test\",l=\"x\"} 0\n",
            "app_lat_buckets{service=\"test\",l=\"x\",le=\"+Inf\"} 0\n",
            "app_lat_buckets{service=\"test\",l=\"x\",le=\"10.000000\"} 0\n",
            "app_lat_buckets{service=\"test\",l=\"x\",le=\"100.000000\"} 0\n",
        );
        assert_eq!(exporter.render(), expected);
    }

    #[test]
    fn bucket_histogram_with_values_adds_summary() {
        let (registry, exporter) = exporter();
        let h = registry
            .get_or_register_histogram("app lat", || BucketSample::new(vec![10.0], 64))
            .unwrap();
        h.update(4);
        h.update(40);
        exporter.update().unwrap();

        let text = exporter.render();
        assert!(text.contains("app_lat_buckets{service=\"test\",le=\"10.000000\"} 1\n"));
        assert!(text.contains("app_lat_buckets{service=\"test\",le=\"+Inf\"} 2\n"));
        assert!(text.contains("\n# TYPE app_lat summary\n"));
        assert!(text.contains("app_lat_sum{service=\"test\"} 44\n"));
    }

    #[test]
    fn timers_only_export_with_observations() {
        let (registry, exporter) = exporter();
        let t = registry.get_or_register_timer("app t1").unwrap();
        exporter.update().unwrap();
        assert_eq!(exporter.render(), "");

        t.update(Duration::from_nanos(1500));
        exporter.update().unwrap();
        assert!(exporter
            .render()
            .contains("app_t1{service=\"test\",quantile=\"0.5\"} 1500\n"));
    }

    #[test]
    fn partial_failure_keeps_valid_metrics() {
        let (registry, exporter) = exporter();
        registry.get_or_register_counter("app c1").unwrap().inc(1);
        registry.get_or_register_counter("app c2").unwrap().inc(2);
        registry.get_or_register_counter("app 1bad!").unwrap().inc(3);

        let err = exporter.update().unwrap_err();
        assert_eq!(
            err.failures,
            vec!["bad metric name \"app_1bad!\" in metric \"app 1bad!\"".to_string()]
        );
        assert_eq!(
            err.to_string(),
            "[bad metric name \"app_1bad!\" in metric \"app 1bad!\"]"
        );

        let expected = concat!(
            "# ERROR bad metric name \"app_1bad!\" in metric \"app 1bad!\"\n",
            "\n# TYPE app_c1_total counter\n",
            "app_c1_total{service=\"test\"} 1\n",
            "\n# TYPE app_c2_total counter\n",
            "app_c2_total{service=\"test\"} 2\n",
        );
        assert_eq!(exporter.render(), expected);
    }

    #[test]
    fn label_failures() {
        let (registry, exporter) = exporter();
        registry.get_or_register_counter("app,bad a").unwrap();
        registry.get_or_register_counter("app,b-d=1 b").unwrap();
        registry.get_or_register_counter("app,ok=1,v=a b c").unwrap();
        registry.get_or_register_counter("app,ok=1,v=a*b d").unwrap();

        let err = exporter.update().unwrap_err();
        assert_eq!(
            err.failures,
            vec![
                "bad label \"bad\" in metric \"app,bad a\"".to_string(),
                "bad label name \"b-d=1\" in metric \"app,b-d=1 b\"".to_string(),
                "bad label value \"v=a*b\" in metric \"app,ok=1,v=a*b d\"".to_string(),
                "bad metric signature \"app,ok=1,v=a b c\"".to_string(),
            ]
        );
        assert!(exporter
            .render()
            .ends_with("\n# TYPE app_d_total counter\napp_d_total{service=\"test\",ok=\"1\"} 0\n"));
    }

    #[test]
    fn update_is_idempotent() {
        let (registry, exporter) = exporter();
        for i in 0..20 {
            registry
                .get_or_register_counter(&format!("app,shard=s{i} hits"))
                .unwrap()
                .inc(i);
            registry
                .get_or_register_timer(&format!("app,shard=s{i} latency"))
                .unwrap()
                .update(Duration::from_millis(5));
        }
        exporter.update().unwrap();
        let first = exporter.render();
        exporter.update().unwrap();
        assert_eq!(first, exporter.render());
    }

    #[test]
    fn formats_floats() {
        assert_eq!(format_float(19.0), "19");
        assert_eq!(format_float(0.001), "0.001");
        assert_eq!(format_float(f64::NAN), "NaN");
        assert_eq!(format_float(f64::INFINITY), "+Inf");
        assert_eq!(format_float(f64::NEG_INFINITY), "-Inf");
    }
}
