//! The runner: ordered init, wait for a trigger, reverse-ordered shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::error::{LifecycleError, Phase};
use crate::metrics;
use crate::service::Service;
use crate::shutdown::kill_on_shutdown_timeout;
use crate::signals::{self, Signal, SignalListener};

/// Called once after the shutdown sequence with its outcome (`Some` only on a shutdown
/// timeout). Decides whether the process should be killed.
pub type PostShutdown = Box<dyn FnOnce(Option<&LifecycleError>) + Send + Sync>;

/// Timeouts and signal handling for a [`Runner`].
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Aggregate budget for initializing all components.
    pub init_timeout: Duration,
    /// Aggregate budget for shutting down all initialized components.
    pub shutdown_timeout: Duration,
    /// Grace period an in-flight `init` gets when a signal arrives during startup.
    pub on_init_signal_timeout: Duration,
    /// Install SIGHUP/SIGINT/SIGQUIT/SIGTERM handlers (default: true).
    pub trap_signals: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(60),
            on_init_signal_timeout: Duration::from_secs(10),
            trap_signals: true,
        }
    }
}

pub struct RunnerBuilder {
    config: RunnerConfig,
    post_shutdown: Option<PostShutdown>,
}

impl RunnerBuilder {
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.config.init_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    pub fn with_on_init_signal_timeout(mut self, timeout: Duration) -> Self {
        self.config.on_init_signal_timeout = timeout;
        self
    }

    pub fn with_trap_signals(mut self, trap: bool) -> Self {
        self.config.trap_signals = trap;
        self
    }

    /// Replaces the default hook ([`kill_on_shutdown_timeout`]).
    pub fn with_post_shutdown<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(Option<&LifecycleError>) + Send + Sync + 'static,
    {
        self.post_shutdown = Some(Box::new(hook));
        self
    }

    pub fn build(self) -> Runner {
        let mut runner = Runner::new(self.config);
        if let Some(hook) = self.post_shutdown {
            runner.post_shutdown = Some(hook);
        }
        runner
    }
}

#[derive(Clone)]
struct Runnable {
    name: String,
    service: Arc<dyn Service>,
}

/// Programmatic equivalent of a termination signal. Cloneable, usable from any task.
#[derive(Clone, Debug)]
pub struct StopHandle {
    tx: mpsc::Sender<Signal>,
}

impl StopHandle {
    /// Starts shutdown as if SIGQUIT had been received.
    pub fn stop(&self) {
        self.signal(Signal::Quit);
    }

    pub fn signal(&self, signal: Signal) {
        if !signals::deliver(&self.tx, signal) {
            debug!(signal = %signal, "Lifecycle: stop requested after runner exited");
        }
    }
}

/// Runs services added with [`Runner::add`]. On [`Runner::run`] they are initialized in
/// the order of adding, then the runner waits for a shutdown trigger and shuts the
/// initialized services down in reverse order.
pub struct Runner {
    config: RunnerConfig,
    services: Vec<Runnable>,
    post_shutdown: Option<PostShutdown>,
    signal_tx: mpsc::Sender<Signal>,
    signal_rx: mpsc::Receiver<Signal>,
}

impl Runner {
    pub fn new(config: RunnerConfig) -> Self {
        // Buffered like the OS signal channel: senders never block.
        let (signal_tx, signal_rx) = mpsc::channel(2);
        Self {
            config,
            services: Vec::new(),
            post_shutdown: Some(Box::new(kill_on_shutdown_timeout)),
            signal_tx,
            signal_rx,
        }
    }

    pub fn builder() -> RunnerBuilder {
        RunnerBuilder {
            config: RunnerConfig::default(),
            post_shutdown: None,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// The order of adding determines init order, and reversed, shutdown order.
    pub fn add(&mut self, service: Arc<dyn Service>) {
        let name = service.name().to_string();
        debug!(component = %name, "Lifecycle: service added");
        self.services.push(Runnable { name, service });
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn service_names(&self) -> Vec<&str> {
        self.services.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.signal_tx.clone(),
        }
    }

    /// Drives the whole lifecycle and returns once every initialized service was shut down
    /// (or the shutdown budget ran out). An init failure or timeout is returned in
    /// preference to a run failure, which is returned in preference to a shutdown timeout.
    pub async fn run(mut self) -> Result<(), LifecycleError> {
        if self.config.trap_signals {
            let listener = SignalListener::install().map_err(LifecycleError::SignalHandler)?;
            tokio::spawn(listener.forward(self.signal_tx.clone()));
        }

        info!(
            services = %joined_names(&self.services),
            "Lifecycle: starting services"
        );
        let (initialized, mut signal, init_result) = self.init_services().await;
        info!(
            started = %joined_names(&initialized),
            signal = ?signal,
            ok = init_result.is_ok(),
            "Lifecycle: service start finished"
        );

        let mut running = Vec::new();
        let mut run_result = Ok(());
        if init_result.is_ok() && signal.is_none() {
            let (tx, rx) = mpsc::unbounded_channel();
            running = spawn_runs(&initialized, tx);
            (signal, run_result) = self.wait_for_trigger(rx).await;
        }

        let reversed: Vec<Runnable> = initialized.into_iter().rev().collect();
        info!(
            services = %joined_names(&reversed),
            "Lifecycle: shutting down services"
        );
        let shutdown_result = self.shutdown_services(&reversed, signal).await;

        for handle in running {
            handle.abort();
        }

        if let Some(hook) = self.post_shutdown.take() {
            hook(shutdown_result.as_ref().err());
        }

        init_result.and(run_result).and(shutdown_result)
    }

    async fn init_services(
        &mut self,
    ) -> (Vec<Runnable>, Option<Signal>, Result<(), LifecycleError>) {
        let started = Instant::now();
        let deadline = started + self.config.init_timeout;
        let mut initialized = Vec::new();

        for runnable in &self.services {
            let name = runnable.name.as_str();
            info!(component = %name, "Lifecycle: service begin init");
            let init_started = Instant::now();
            let service = runnable.service.clone();
            let mut task = tokio::spawn(async move { service.init().await });

            tokio::select! {
                biased;

                joined = &mut task => match joined {
                    Ok(Ok(())) => {
                        let took = init_started.elapsed();
                        metrics::emit_init_duration(name, took);
                        info!(component = %name, took_ms = took.as_millis(), "Lifecycle: service init successful");
                        initialized.push(runnable.clone());
                    }
                    Ok(Err(source)) => {
                        let err = LifecycleError::Init { component: name.to_string(), source };
                        return (initialized, None, Err(err));
                    }
                    Err(_) => {
                        let err = LifecycleError::InitPanicked { component: name.to_string() };
                        return (initialized, None, Err(err));
                    }
                },

                signal = self.signal_rx.recv() => {
                    let grace = self.config.on_init_signal_timeout;
                    info!(
                        signal = ?signal,
                        component = %name,
                        grace_ms = grace.as_millis(),
                        "Lifecycle: signaled, waiting for init to finish before termination"
                    );
                    let mut result = Ok(());
                    match tokio::time::timeout(grace, &mut task).await {
                        Ok(Ok(Ok(()))) => initialized.push(runnable.clone()),
                        Ok(Ok(Err(source))) => {
                            result = Err(LifecycleError::Init { component: name.to_string(), source });
                        }
                        Ok(Err(_)) => {
                            result = Err(LifecycleError::InitPanicked { component: name.to_string() });
                        }
                        Err(_) => {
                            task.abort();
                            info!(component = %name, "Lifecycle: waiting for init timed out, ignoring");
                        }
                    }
                    return (initialized, signal, result);
                }

                _ = sleep_until(deadline) => {
                    task.abort();
                    metrics::emit_timeout(Phase::Init, name);
                    let err = LifecycleError::Timeout {
                        phase: Phase::Init,
                        component: name.to_string(),
                        elapsed: started.elapsed(),
                    };
                    warn!(component = %name, "Lifecycle: {err}");
                    return (initialized, None, Err(err));
                }
            }
        }

        (initialized, None, Ok(()))
    }

    /// Blocks until a signal arrives or a `run` fails.
    async fn wait_for_trigger(
        &mut self,
        mut finished: mpsc::UnboundedReceiver<(String, Option<String>)>,
    ) -> (Option<Signal>, Result<(), LifecycleError>) {
        loop {
            tokio::select! {
                signal = self.signal_rx.recv() => {
                    info!(signal = ?signal, "Lifecycle: signaled");
                    return (signal, Ok(()));
                }
                Some((component, failure)) = finished.recv() => match failure {
                    None => debug!(component = %component, "Lifecycle: run finished"),
                    Some(reason) => {
                        warn!(component = %component, "Lifecycle: shutdown initiated, run failed: {reason}");
                        return (None, Err(LifecycleError::ComponentFailure { component, reason }));
                    }
                },
            }
        }
    }

    async fn shutdown_services(
        &self,
        services: &[Runnable],
        signal: Option<Signal>,
    ) -> Result<(), LifecycleError> {
        let started = Instant::now();
        let deadline = started + self.config.shutdown_timeout;

        for runnable in services {
            let name = runnable.name.as_str();
            info!(component = %name, "Lifecycle: shutting down");
            let shutdown_started = Instant::now();
            let service = runnable.service.clone();
            let mut task = tokio::spawn(async move { service.shutdown(signal).await });
            let tick = Duration::from_secs(1);
            let mut progress = tokio::time::interval_at(shutdown_started + tick, tick);

            loop {
                tokio::select! {
                    biased;

                    joined = &mut task => {
                        if joined.is_err() {
                            warn!(component = %name, "Lifecycle: shutdown panicked");
                        }
                        let took = shutdown_started.elapsed();
                        metrics::emit_shutdown_duration(name, took);
                        info!(component = %name, took_ms = took.as_millis(), "Lifecycle: shutdown done");
                        break;
                    }

                    _ = sleep_until(deadline) => {
                        metrics::emit_timeout(Phase::Shutdown, name);
                        let err = LifecycleError::Timeout {
                            phase: Phase::Shutdown,
                            component: name.to_string(),
                            elapsed: started.elapsed(),
                        };
                        warn!(component = %name, "Lifecycle: {err}");
                        return Err(err);
                    }

                    _ = progress.tick() => {
                        info!(
                            component = %name,
                            since_ms = shutdown_started.elapsed().as_millis(),
                            "Lifecycle: still shutting down"
                        );
                    }
                }
            }
        }

        Ok(())
    }
}

/// Spawns every `run`; each reports `(name, failure reason)` when it returns.
fn spawn_runs(
    services: &[Runnable],
    finished: mpsc::UnboundedSender<(String, Option<String>)>,
) -> Vec<AbortHandle> {
    let mut handles = Vec::with_capacity(services.len());
    for runnable in services {
        let service = runnable.service.clone();
        let task = tokio::spawn(async move { service.run().await });
        handles.push(task.abort_handle());

        let name = runnable.name.clone();
        let finished = finished.clone();
        tokio::spawn(async move {
            let failure = match task.await {
                Ok(Ok(())) => None,
                Ok(Err(err)) => Some(format!("{err:#}")),
                Err(err) if err.is_cancelled() => return,
                Err(_) => Some("run panicked".to_string()),
            };
            if finished.send((name.clone(), failure)).is_err() {
                debug!(component = %name, "Lifecycle: run finished after the runner exited");
            }
        });
    }
    handles
}

fn joined_names(services: &[Runnable]) -> String {
    services
        .iter()
        .map(|r| r.name.as_str())
        .collect::<Vec<_>>()
        .join(",")
}
