use thiserror::Error;

use crate::registry::MetricKind;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("metric \"{name}\" is already registered")]
    AlreadyRegistered { name: String },

    #[error("metric \"{name}\" is a {found}, not a {expected}")]
    KindMismatch {
        name: String,
        expected: MetricKind,
        found: MetricKind,
    },
}

/// Every format violation found during one exporter update. The metrics that
/// converted cleanly are still exported.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("[{}]", .failures.join(" "))]
pub struct ExportError {
    pub failures: Vec<String>,
}
