use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common_metrics::{MetricsRecorder, MetricsRegistry};
use envconfig::Envconfig;
use health::{HealthChecker, PauseCheck};
use lifecycle::{Service, Signal};
use service::logging::init_tracing;
use service::{register_base, Config, ServiceError, ServiceRunner, CODE_BUILD, CODE_VERSION};
use tokio_util::sync::CancellationToken;
use tracing::info;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Example component: ticks a counter until shut down, and reports itself through a
/// pausable health check.
struct Heartbeat {
    health: Arc<PauseCheck>,
    stop: CancellationToken,
}

fn new_heartbeat(checker: Arc<HealthChecker>) -> anyhow::Result<Arc<Heartbeat>> {
    // Failing until init, so readiness waits for it.
    let health = Arc::new(PauseCheck::new());
    health.pause();
    checker.register("heartbeat", health.clone())?;
    Ok(Arc::new(Heartbeat {
        health,
        stop: CancellationToken::new(),
    }))
}

#[async_trait]
impl Service for Heartbeat {
    async fn init(&self) -> anyhow::Result<()> {
        self.health.resume();
        Ok(())
    }

    async fn run(&self) -> anyhow::Result<()> {
        let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        loop {
            tokio::select! {
                _ = self.stop.cancelled() => return Ok(()),
                _ = interval.tick() => metrics::counter!("heartbeat_ticks_total").increment(1),
            }
        }
    }

    async fn shutdown(&self, _signal: Option<Signal>) {
        self.health.pause();
        self.stop.cancel();
    }
}

#[tokio::main]
async fn main() -> Result<(), ServiceError> {
    let config = Config::init_from_env()?;
    init_tracing(*config.debug)?;
    info!(
        service = %config.service_name,
        version = CODE_VERSION,
        build = CODE_BUILD,
        environment = %config.environment,
        "starting"
    );

    let mut runner = ServiceRunner::from_config(&config);
    register_base(runner.registry(), &config)?;
    runner.registry().register(new_heartbeat)?;

    let registry: Arc<MetricsRegistry> = runner.registry().request()?;
    MetricsRecorder::new(registry, "service")
        .install()
        .map_err(|_| ServiceError::RecorderInstalled)?;

    runner.create_base(&config)?;
    runner.create::<Heartbeat>()?;

    runner.run().await?;
    Ok(())
}
