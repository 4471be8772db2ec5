use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use common_metrics::MetricsRegistry;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::check::{AlwaysHealthy, HealthCheckable};
use crate::error::HealthError;
use crate::evaluator::{CheckResults, HealthEvaluator};
use crate::handlers::ChecksHandler;

/// Name of the always-passing check every checker starts with.
pub const UPTIME_CHECK: &str = "uptime";

#[derive(Clone, Debug)]
pub struct HealthCheckerConfig {
    /// Reported in the `version` label of the health gauges and in reports.
    pub version: String,
    pub poll_interval: Duration,
    /// Upper bound for a single check; `None` lets a check block the round indefinitely.
    pub check_timeout: Option<Duration>,
}

impl Default for HealthCheckerConfig {
    fn default() -> Self {
        Self {
            version: "unknown".to_string(),
            poll_interval: Duration::from_secs(10),
            check_timeout: Some(Duration::from_secs(5)),
        }
    }
}

struct Inner {
    config: HealthCheckerConfig,
    registry: Arc<MetricsRegistry>,
    evaluators: Mutex<BTreeMap<String, Arc<HealthEvaluator>>>,
    handlers: Mutex<Vec<Arc<dyn ChecksHandler>>>,
    closing: AtomicBool,
    // Serializes rounds: ticks, explicit updates and close never overlap.
    round: tokio::sync::Mutex<()>,
}

impl Inner {
    async fn evaluate(&self, now: Instant) -> Option<CheckResults> {
        let _round = self.round.lock().await;
        if self.closing.load(Ordering::SeqCst) {
            return None;
        }

        let at = OffsetDateTime::now_utc();
        let evaluators: Vec<(String, Arc<HealthEvaluator>)> = self
            .evaluators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, evaluator)| (name.clone(), evaluator.clone()))
            .collect();

        let mut checks = CheckResults::new();
        for (name, evaluator) in evaluators {
            let result = evaluator.evaluate(now).await;
            checks.insert(name, result);
        }

        let handlers = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in handlers {
            handler.handle_checks(at, &checks);
        }
        Some(checks)
    }
}

/// Holds the registered checks and evaluates them periodically once [`run`](Self::run)
/// was called.
pub struct HealthChecker {
    inner: Arc<Inner>,
    running: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
    stop: CancellationToken,
}

impl HealthChecker {
    /// Creates a checker with the [`UPTIME_CHECK`] already registered.
    pub fn new(
        config: HealthCheckerConfig,
        registry: Arc<MetricsRegistry>,
    ) -> Result<Self, HealthError> {
        let checker = Self {
            inner: Arc::new(Inner {
                config,
                registry,
                evaluators: Mutex::new(BTreeMap::new()),
                handlers: Mutex::new(Vec::new()),
                closing: AtomicBool::new(false),
                round: tokio::sync::Mutex::new(()),
            }),
            running: AtomicBool::new(false),
            task: Mutex::new(None),
            stop: CancellationToken::new(),
        };
        _ = checker.register(UPTIME_CHECK, Arc::new(AlwaysHealthy))?;
        Ok(checker)
    }

    pub fn with_handler(self, handler: Arc<dyn ChecksHandler>) -> Self {
        self.add_handler(handler);
        self
    }

    /// Handlers are called in the order they were added.
    pub fn add_handler(&self, handler: Arc<dyn ChecksHandler>) {
        self.inner
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    pub fn config(&self) -> &HealthCheckerConfig {
        &self.inner.config
    }

    /// Registers a check under `name`. Returns `Ok(false)` when the name is already taken
    /// (the first registration wins) or the checker is closing.
    pub fn register(
        &self,
        name: &str,
        check: Arc<dyn HealthCheckable>,
    ) -> Result<bool, HealthError> {
        if self.inner.closing.load(Ordering::SeqCst) {
            debug!(check = %name, "health check registered after close, ignoring");
            return Ok(false);
        }
        let mut evaluators = self
            .inner
            .evaluators
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if evaluators.contains_key(name) {
            debug!(check = %name, "health check already registered");
            return Ok(false);
        }

        let evaluator = HealthEvaluator::new(
            name,
            &self.inner.config.version,
            check,
            &self.inner.registry,
        )?
        .with_timeout(self.inner.config.check_timeout);
        evaluators.insert(name.to_string(), Arc::new(evaluator));
        Ok(true)
    }

    pub fn check_names(&self) -> Vec<String> {
        self.inner
            .evaluators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Starts the evaluation loop. Calling it again, or after [`close`](Self::close), is a
    /// no-op.
    pub fn run(&self) {
        if self.inner.closing.load(Ordering::SeqCst) {
            return;
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let inner = self.inner.clone();
        let stop = self.stop.clone();
        let interval = inner.config.poll_interval;
        info!(
            interval_ms = interval.as_millis(),
            "health check loop started"
        );
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => return,
                    now = ticker.tick() => {
                        drop(inner.evaluate(now).await);
                    }
                }
            }
        });
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    pub fn is_running(&self) -> bool {
        !self.inner.closing.load(Ordering::SeqCst) && self.running.load(Ordering::SeqCst)
    }

    /// Evaluates all checks right away and returns the results, or `None` once closed.
    pub async fn update(&self) -> Option<CheckResults> {
        if self.inner.closing.load(Ordering::SeqCst) {
            return None;
        }
        self.inner.evaluate(Instant::now()).await
    }

    /// Stops the loop and waits until it exited and no round is in flight. Idempotent;
    /// registrations and updates are ignored afterwards.
    pub async fn close(&self) -> Result<(), HealthError> {
        self.inner.closing.store(true, Ordering::SeqCst);
        self.stop.cancel();

        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        let joined = match task {
            Some(handle) => handle.await.map_err(|_| HealthError::LoopPanicked),
            None => Ok(()),
        };
        drop(self.inner.round.lock().await);
        joined
    }
}
