//! Errors returned by [`Runner::run`](crate::Runner::run).

use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Init,
    Shutdown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Init => f.write_str("init"),
            Phase::Shutdown => f.write_str("shutdown"),
        }
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A component's `init` returned an error; startup was aborted.
    #[error("service init failed for {component}: {source:#}")]
    Init {
        component: String,
        source: anyhow::Error,
    },

    /// The aggregate init or shutdown budget ran out while `component` was still busy.
    #[error("timeout on service {phase} service={component} after={elapsed:?}")]
    Timeout {
        phase: Phase,
        component: String,
        elapsed: Duration,
    },

    /// A component's `run` returned an error and triggered shutdown.
    #[error("component '{component}' failed: {reason}")]
    ComponentFailure { component: String, reason: String },

    #[error("service init panicked for {component}")]
    InitPanicked { component: String },

    #[error("failed to install signal handlers: {0}")]
    SignalHandler(#[source] std::io::Error),
}

impl LifecycleError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, LifecycleError::Timeout { .. })
    }

    pub fn is_shutdown_timeout(&self) -> bool {
        matches!(
            self,
            LifecycleError::Timeout {
                phase: Phase::Shutdown,
                ..
            }
        )
    }
}
