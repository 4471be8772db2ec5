use std::time::Duration;

use crate::error::Phase;

pub(crate) const METRIC_INIT_DURATION: &str = "lifecycle_init_ms";
pub(crate) const METRIC_SHUTDOWN_DURATION: &str = "lifecycle_shutdown_ms";
pub(crate) const METRIC_TIMEOUTS: &str = "lifecycle_timeouts_total";

pub(crate) fn emit_init_duration(component: &str, took: Duration) {
    metrics::histogram!(METRIC_INIT_DURATION, "component" => component.to_string())
        .record(took.as_secs_f64() * 1000.0);
}

pub(crate) fn emit_shutdown_duration(component: &str, took: Duration) {
    metrics::histogram!(METRIC_SHUTDOWN_DURATION, "component" => component.to_string())
        .record(took.as_secs_f64() * 1000.0);
}

pub(crate) fn emit_timeout(phase: Phase, component: &str) {
    metrics::counter!(
        METRIC_TIMEOUTS,
        "component" => component.to_string(),
        "phase" => phase.to_string()
    )
    .increment(1);
}
