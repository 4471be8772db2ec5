use common_registry::RegistryError;
use health::HealthError;
use lifecycle::LifecycleError;
use thiserror::Error;
use tracing_subscriber::util::TryInitError;

/// Everything that can stop a daemon from starting or make it exit with an error.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid configuration: {0}")]
    Config(#[from] envconfig::Error),

    #[error("wiring failed: {0}")]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Health(#[from] HealthError),

    #[error("failed to install tracing subscriber: {0}")]
    Tracing(#[from] TryInitError),

    #[error("a metrics recorder is already installed")]
    RecorderInstalled,
}
