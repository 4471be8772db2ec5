//! Consumers of evaluation rounds.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{info, warn};

use crate::evaluator::CheckResults;

/// Receives the results of every evaluation round, in handler registration order.
pub trait ChecksHandler: Send + Sync {
    fn handle_checks(&self, at: OffsetDateTime, checks: &CheckResults);
}

// ----------------- Logging -----------------

#[derive(Debug, PartialEq, Eq)]
enum Transition<'a> {
    Pass { last_error: &'a str },
    Fail,
}

/// `last` is the previous error text (empty while passing), `None` before the first round.
fn transition<'a>(last: Option<&'a str>, error: &str) -> Option<Transition<'a>> {
    let last_error = last.unwrap_or("uninitialized");
    if !last_error.is_empty() && error.is_empty() {
        return Some(Transition::Pass { last_error });
    }
    if (last.is_none() || last_error.is_empty()) && !error.is_empty() {
        return Some(Transition::Fail);
    }
    None
}

/// Logs a check only when it flips between passing and failing.
pub struct LogChecksHandler {
    version: String,
    last_errors: Mutex<HashMap<String, String>>,
}

impl LogChecksHandler {
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            last_errors: Mutex::new(HashMap::new()),
        }
    }
}

impl ChecksHandler for LogChecksHandler {
    fn handle_checks(&self, _at: OffsetDateTime, checks: &CheckResults) {
        let mut last_errors = self
            .last_errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (name, result) in checks {
            let error = result.error_message();
            match transition(last_errors.get(name).map(String::as_str), error) {
                Some(Transition::Pass { last_error }) => info!(
                    version = %self.version,
                    reason = "health",
                    code = %name,
                    last_error,
                    "pass"
                ),
                Some(Transition::Fail) => warn!(
                    version = %self.version,
                    reason = "health",
                    code = %name,
                    error,
                    "fail"
                ),
                None => {}
            }
            last_errors.insert(name.clone(), error.to_string());
        }
    }
}

// ----------------- Cached state -----------------

/// Latest evaluation round, as served by the health endpoint. `checks` is absent until the
/// first round completed.
#[derive(Clone, Debug, Serialize)]
pub struct HealthReport {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checks: Option<CheckResults>,
}

impl HealthReport {
    pub fn all_passing(&self) -> bool {
        self.checks
            .as_ref()
            .is_some_and(|checks| checks.values().all(|result| result.is_passing()))
    }
}

impl IntoResponse for HealthReport {
    /// Always 200: the report is informational, readiness is decided elsewhere.
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

pub struct StateChecksHandler {
    version: String,
    report: RwLock<HealthReport>,
}

impl StateChecksHandler {
    pub fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            report: RwLock::new(HealthReport {
                at: OffsetDateTime::now_utc(),
                version: version.to_string(),
                checks: None,
            }),
        }
    }

    pub fn state(&self) -> HealthReport {
        self.report
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ChecksHandler for StateChecksHandler {
    fn handle_checks(&self, at: OffsetDateTime, checks: &CheckResults) {
        let report = HealthReport {
            at,
            version: self.version.clone(),
            checks: Some(checks.clone()),
        };
        *self.report.write().unwrap_or_else(PoisonError::into_inner) = report;
    }
}

// ----------------- Guard -----------------

/// Tracks whether every required check passed in the latest round. Unhealthy until the
/// first round arrives; a required check missing from a round counts as failing.
pub struct GuardChecksHandler {
    required: Vec<String>,
    failed: AtomicBool,
}

impl GuardChecksHandler {
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
            failed: AtomicBool::new(true),
        }
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    pub fn all_healthy(&self) -> bool {
        !self.failed.load(Ordering::SeqCst)
    }
}

impl ChecksHandler for GuardChecksHandler {
    fn handle_checks(&self, _at: OffsetDateTime, checks: &CheckResults) {
        let failed = self.required.iter().any(|name| {
            checks
                .get(name)
                .map_or(true, |result| !result.is_passing())
        });
        self.failed.store(failed, Ordering::SeqCst);
    }
}
