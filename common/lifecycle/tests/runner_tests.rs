use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lifecycle::{LifecycleError, Phase, Runner, RunnerBuilder, Service, Signal};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

type Events = Arc<Mutex<Vec<String>>>;

fn events() -> Events {
    Arc::new(Mutex::new(Vec::new()))
}

fn snapshot(events: &Events) -> Vec<String> {
    events.lock().unwrap().clone()
}

/// Runner without OS signal handling, and a post-shutdown hook that never kills.
fn test_runner() -> RunnerBuilder {
    Runner::builder()
        .with_trap_signals(false)
        .with_post_shutdown(|_| {})
}

/// Configurable component that records every lifecycle call.
struct Component {
    name: &'static str,
    events: Events,
    init_delay: Duration,
    init_error: Option<&'static str>,
    run_error: Option<(Duration, &'static str)>,
    shutdown_delay: Duration,
}

impl Component {
    fn new(name: &'static str, events: &Events) -> Self {
        Self {
            name,
            events: events.clone(),
            init_delay: Duration::ZERO,
            init_error: None,
            run_error: None,
            shutdown_delay: Duration::ZERO,
        }
    }

    fn init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    fn init_error(mut self, reason: &'static str) -> Self {
        self.init_error = Some(reason);
        self
    }

    fn run_error(mut self, after: Duration, reason: &'static str) -> Self {
        self.run_error = Some((after, reason));
        self
    }

    fn shutdown_delay(mut self, delay: Duration) -> Self {
        self.shutdown_delay = delay;
        self
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

#[async_trait]
impl Service for Component {
    fn name(&self) -> &str {
        self.name
    }

    async fn init(&self) -> anyhow::Result<()> {
        self.record(format!("init {}", self.name));
        if !self.init_delay.is_zero() {
            tokio::time::sleep(self.init_delay).await;
        }
        match self.init_error {
            Some(reason) => Err(anyhow::anyhow!(reason)),
            None => Ok(()),
        }
    }

    async fn run(&self) -> anyhow::Result<()> {
        match self.run_error {
            Some((after, reason)) => {
                tokio::time::sleep(after).await;
                Err(anyhow::anyhow!(reason))
            }
            None => Ok(()),
        }
    }

    async fn shutdown(&self, signal: Option<Signal>) {
        let signal = signal.map_or("none".to_string(), |s| s.to_string());
        self.record(format!("shutdown {} {}", self.name, signal));
        if !self.shutdown_delay.is_zero() {
            tokio::time::sleep(self.shutdown_delay).await;
        }
    }
}

/// Init never returns.
struct Stuck;

#[async_trait]
impl Service for Stuck {
    async fn init(&self) -> anyhow::Result<()> {
        std::future::pending().await
    }

    async fn shutdown(&self, _signal: Option<Signal>) {}
}

// ---------------------------------------------------------------------------
// Ordering
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn init_in_order_and_shutdown_in_reverse() {
    let events = events();
    let mut runner = test_runner().build();
    runner.add(Arc::new(Component::new("s1", &events)));
    runner.add(Arc::new(Component::new("s2", &events)));
    runner.add(Arc::new(Component::new("s3", &events)));
    assert_eq!(runner.service_names(), vec!["s1", "s2", "s3"]);

    let stop = runner.stop_handle();
    let run = tokio::spawn(runner.run());
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop.stop();

    let result = run.await.unwrap();
    assert!(result.is_ok(), "{result:?}");
    assert_eq!(
        snapshot(&events),
        vec![
            "init s1",
            "init s2",
            "init s3",
            "shutdown s3 SIGQUIT",
            "shutdown s2 SIGQUIT",
            "shutdown s1 SIGQUIT",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn forwarded_signal_reaches_shutdown() {
    let events = events();
    let mut runner = test_runner().build();
    runner.add(Arc::new(Component::new("only", &events)));

    let stop = runner.stop_handle();
    let run = tokio::spawn(runner.run());
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop.signal(Signal::Terminate);

    assert!(run.await.unwrap().is_ok());
    assert_eq!(snapshot(&events), vec!["init only", "shutdown only SIGTERM"]);
}

// ---------------------------------------------------------------------------
// Init failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn init_timeout_aborts_startup() {
    let events = events();
    let mut runner = test_runner()
        .with_init_timeout(Duration::from_millis(1))
        .build();
    runner.add(Arc::new(Component::new("first", &events)));
    runner.add(Arc::new(Stuck));
    runner.add(Arc::new(Component::new("never", &events)));

    let result = runner.run().await;
    match result {
        Err(LifecycleError::Timeout {
            phase,
            component,
            elapsed,
        }) => {
            assert_eq!(phase, Phase::Init);
            assert_eq!(component, "Stuck");
            assert!(elapsed >= Duration::from_millis(1));
            assert!(elapsed < Duration::from_millis(50));
        }
        other => panic!("expected init timeout, got {other:?}"),
    }
    // Only the component that made it through init is shut down.
    assert_eq!(snapshot(&events), vec!["init first", "shutdown first none"]);
}

#[tokio::test(start_paused = true)]
async fn init_error_shuts_down_started_components() {
    let events = events();
    let mut runner = test_runner().build();
    runner.add(Arc::new(Component::new("a", &events)));
    runner.add(Arc::new(Component::new("b", &events).init_error("boom")));
    runner.add(Arc::new(Component::new("c", &events)));

    let err = runner.run().await.unwrap_err();
    assert!(matches!(&err, LifecycleError::Init { component, .. } if component == "b"));
    assert_eq!(err.to_string(), "service init failed for b: boom");
    assert_eq!(snapshot(&events), vec!["init a", "init b", "shutdown a none"]);
}

// ---------------------------------------------------------------------------
// Signals during init
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn signal_during_init_waits_for_grace_period() {
    let events = events();
    let mut runner = test_runner()
        .with_on_init_signal_timeout(Duration::from_secs(10))
        .build();
    runner.add(Arc::new(
        Component::new("slow", &events).init_delay(Duration::from_secs(5)),
    ));
    runner.add(Arc::new(Component::new("skipped", &events)));

    let stop = runner.stop_handle();
    let run = tokio::spawn(runner.run());
    tokio::time::sleep(Duration::from_secs(1)).await;
    stop.stop();

    assert!(run.await.unwrap().is_ok());
    // "slow" finished within the grace period and is shut down, "skipped" never starts.
    assert_eq!(snapshot(&events), vec!["init slow", "shutdown slow SIGQUIT"]);
}

#[tokio::test(start_paused = true)]
async fn signal_during_init_abandons_component_after_grace_period() {
    let events = events();
    let mut runner = test_runner()
        .with_init_timeout(Duration::from_secs(600))
        .with_on_init_signal_timeout(Duration::from_secs(1))
        .build();
    runner.add(Arc::new(Component::new("fast", &events)));
    runner.add(Arc::new(
        Component::new("slow", &events).init_delay(Duration::from_secs(60)),
    ));

    let stop = runner.stop_handle();
    let run = tokio::spawn(runner.run());
    tokio::time::sleep(Duration::from_secs(1)).await;
    stop.stop();

    assert!(run.await.unwrap().is_ok());
    assert_eq!(
        snapshot(&events),
        vec!["init fast", "init slow", "shutdown fast SIGQUIT"]
    );
}

// ---------------------------------------------------------------------------
// Shutdown timeouts and post-shutdown hook
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn shutdown_timeout_invokes_post_shutdown() {
    let events = events();
    let seen: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let seen_hook = seen.clone();

    let mut runner = Runner::builder()
        .with_trap_signals(false)
        .with_shutdown_timeout(Duration::from_secs(1))
        .with_post_shutdown(move |err| {
            *seen_hook.lock().unwrap() = Some(err.map_or("none".to_string(), |e| e.to_string()));
        })
        .build();
    runner.add(Arc::new(Component::new("first", &events)));
    runner.add(Arc::new(
        Component::new("stuck", &events).shutdown_delay(Duration::from_secs(30)),
    ));

    let stop = runner.stop_handle();
    let run = tokio::spawn(runner.run());
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop.stop();

    let err = run.await.unwrap().unwrap_err();
    assert!(err.is_shutdown_timeout());
    assert!(matches!(&err, LifecycleError::Timeout { component, .. } if component == "stuck"));
    assert_eq!(
        seen.lock().unwrap().as_deref(),
        Some("timeout on service shutdown service=stuck after=1s")
    );
    // Components after the stuck one are never shut down.
    assert_eq!(
        snapshot(&events),
        vec!["init first", "init stuck", "shutdown stuck SIGQUIT"]
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_budget_is_aggregate() {
    let events = events();
    let mut runner = test_runner()
        .with_shutdown_timeout(Duration::from_secs(3))
        .build();
    runner.add(Arc::new(
        Component::new("a", &events).shutdown_delay(Duration::from_secs(2)),
    ));
    runner.add(Arc::new(
        Component::new("b", &events).shutdown_delay(Duration::from_secs(2)),
    ));

    let stop = runner.stop_handle();
    let run = tokio::spawn(runner.run());
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop.stop();

    // Each fits alone, but together they exceed the budget.
    let err = run.await.unwrap().unwrap_err();
    assert!(matches!(&err, LifecycleError::Timeout { phase: Phase::Shutdown, component, .. } if component == "a"));
}

#[tokio::test(start_paused = true)]
async fn post_shutdown_sees_no_error_on_clean_stop() {
    let calls: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));
    let calls_hook = calls.clone();
    let events = events();

    let mut runner = Runner::builder()
        .with_trap_signals(false)
        .with_post_shutdown(move |err| calls_hook.lock().unwrap().push(err.is_some()))
        .build();
    runner.add(Arc::new(Component::new("a", &events)));

    let stop = runner.stop_handle();
    let run = tokio::spawn(runner.run());
    tokio::time::sleep(Duration::from_millis(10)).await;
    stop.stop();

    assert!(run.await.unwrap().is_ok());
    assert_eq!(*calls.lock().unwrap(), vec![false]);
}

// ---------------------------------------------------------------------------
// Run failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn run_failure_triggers_shutdown() {
    let events = events();
    let mut runner = test_runner().build();
    runner.add(Arc::new(Component::new("a", &events)));
    runner.add(Arc::new(
        Component::new("b", &events).run_error(Duration::from_secs(1), "lost connection"),
    ));

    let err = runner.run().await.unwrap_err();
    match err {
        LifecycleError::ComponentFailure { component, reason } => {
            assert_eq!(component, "b");
            assert_eq!(reason, "lost connection");
        }
        other => panic!("expected component failure, got {other:?}"),
    }
    assert_eq!(
        snapshot(&events),
        vec!["init a", "init b", "shutdown b none", "shutdown a none"]
    );
}
