//! Daemon lifecycle sequencing: components are initialized in the order they were added,
//! the runner then waits for a termination signal (OS or [`StopHandle`]) or a failing
//! `run()`, and shuts everything down again in reverse order. Init and shutdown are both
//! bounded by timeouts; a stuck shutdown is escalated through the post-shutdown hook,
//! which by default kills the process group.

mod error;
mod metrics;
mod runner;
mod service;
mod shutdown;
mod signals;

pub use error::{LifecycleError, Phase};
pub use runner::{PostShutdown, Runner, RunnerBuilder, RunnerConfig, StopHandle};
pub use service::{short_type_name, Service};
pub use shutdown::kill_on_shutdown_timeout;
pub use signals::Signal;
