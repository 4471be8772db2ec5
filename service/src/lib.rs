//! Scaffold shared by every daemon: environment config, logging, the marker-file `Base`
//! component, the debug HTTP server, periodic metrics export, and [`ServiceRunner`], which
//! resolves components from a [`Registry`](common_registry::Registry) and hands them to the
//! lifecycle [`Runner`](lifecycle::Runner) in creation order.

pub mod base;
pub mod config;
pub mod error;
pub mod logging;
pub mod metrics_service;
pub mod scaffold;
pub mod server;
pub mod version;

pub use base::Base;
pub use config::Config;
pub use error::ServiceError;
pub use metrics_service::MetricsRefresher;
pub use scaffold::{register_base, ServiceRunner};
pub use server::{DebugServer, DebugServerConfig, DebugServerParams};
pub use version::{CODE_BUILD, CODE_VERSION};
