use common_metrics::MetricsError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealthError {
    /// The check's gauge name is already taken by another kind of metric.
    #[error("cannot register health gauge: {0}")]
    Metrics(#[from] MetricsError),

    #[error("health check loop panicked")]
    LoopPanicked,
}
