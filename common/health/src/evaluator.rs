use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use common_metrics::{metric_name, Gauge, MetricsError, MetricsRegistry};
use serde::{Serialize, Serializer};
use tokio::time::Instant;

use crate::check::HealthCheckable;

/// Results of one evaluation round, keyed by check name.
pub type CheckResults = BTreeMap<String, CheckResult>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
    Timeout,
}

/// Outcome of a single check. `age` is how long the check has been passing and is zero
/// while it fails; `error` is set whenever it fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub status: CheckStatus,
    #[serde(
        skip_serializing_if = "Duration::is_zero",
        serialize_with = "serialize_nanos"
    )]
    pub age: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResult {
    pub fn pass(age: Duration) -> Self {
        Self {
            status: CheckStatus::Pass,
            age,
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Fail,
            age: Duration::ZERO,
            error: Some(error.into()),
        }
    }

    pub fn timeout(limit: Duration) -> Self {
        Self {
            status: CheckStatus::Timeout,
            age: Duration::ZERO,
            error: Some(format!("check timed out after {limit:?}")),
        }
    }

    pub fn is_passing(&self) -> bool {
        self.status == CheckStatus::Pass
    }

    /// The error text, empty while passing.
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("")
    }
}

fn serialize_nanos<S: Serializer>(age: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(u64::try_from(age.as_nanos()).unwrap_or(u64::MAX))
}

/// `service,name=<check>,version=<version> health`
pub fn health_gauge_name(check: &str, version: &str) -> String {
    metric_name("service", &[("name", check), ("version", version)], "health")
}

#[derive(Debug)]
struct Transitions {
    since: Instant,
    failed: bool,
}

/// Tracks how long one check has been in its current state.
///
/// A new evaluator counts as failed ("not evaluated yet"). Each evaluation that flips the
/// state resets `since`; the gauge holds the passing age in nanoseconds, or 0 while failing.
pub struct HealthEvaluator {
    check: Arc<dyn HealthCheckable>,
    timeout: Option<Duration>,
    gauge: Arc<Gauge>,
    state: Mutex<Transitions>,
}

impl HealthEvaluator {
    pub fn new(
        name: &str,
        version: &str,
        check: Arc<dyn HealthCheckable>,
        registry: &MetricsRegistry,
    ) -> Result<Self, MetricsError> {
        let gauge = registry.get_or_register_gauge(&health_gauge_name(name, version))?;
        Ok(Self {
            check,
            timeout: None,
            gauge,
            state: Mutex::new(Transitions {
                since: Instant::now(),
                failed: true,
            }),
        })
    }

    /// Bounds every evaluation; a check that takes longer is reported as
    /// [`CheckStatus::Timeout`] and counts as failed.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn evaluate(&self, now: Instant) -> CheckResult {
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.check.check_health()).await {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(CheckResult::fail(format!("{err:#}"))),
                Err(_) => Some(CheckResult::timeout(limit)),
            },
            None => match self.check.check_health().await {
                Ok(()) => None,
                Err(err) => Some(CheckResult::fail(format!("{err:#}"))),
            },
        };

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(failure) = result {
            if !state.failed {
                state.since = now;
                state.failed = true;
            }
            self.gauge.update(0);
            return failure;
        }

        if state.failed {
            state.since = now;
            state.failed = false;
        }
        let age = now.saturating_duration_since(state.since);
        self.gauge
            .update(i64::try_from(age.as_nanos()).unwrap_or(i64::MAX));
        CheckResult::pass(age)
    }

    pub fn is_failed(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .failed
    }

    /// When the check last changed state (or was created).
    pub fn since(&self) -> Instant {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .since
    }
}
