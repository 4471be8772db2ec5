//! Periodic health evaluation.
//!
//! A [`HealthChecker`] owns one [`HealthEvaluator`] per registered check. Every tick (or on
//! an explicit [`HealthChecker::update`]) all checks are evaluated in name order and the
//! result map is handed to every [`ChecksHandler`]: one logs pass/fail transitions, one
//! keeps the latest [`HealthReport`] for the HTTP endpoint, one gates readiness on a set of
//! required checks.
//!
//! Health-check errors are data, never fatal: they only show up in the results, in the
//! `health` gauges and in the handlers.

mod check;
mod checker;
mod error;
mod evaluator;
mod handlers;
mod service;

pub use check::{AlwaysHealthy, HealthCheckable, PauseCheck};
pub use checker::{HealthChecker, HealthCheckerConfig, UPTIME_CHECK};
pub use error::HealthError;
pub use evaluator::{health_gauge_name, CheckResult, CheckResults, CheckStatus, HealthEvaluator};
pub use handlers::{ChecksHandler, GuardChecksHandler, HealthReport, LogChecksHandler, StateChecksHandler};
