use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common_metrics::PrometheusExporter;
use lifecycle::{Service, Signal};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Rebuilds the exporter cache every `interval`, so `/metrics` never walks the registry
/// on the request path.
pub struct MetricsRefresher {
    exporter: Arc<PrometheusExporter>,
    interval: Duration,
    stop: CancellationToken,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl MetricsRefresher {
    pub fn new(exporter: Arc<PrometheusExporter>, interval: Duration) -> Self {
        Self {
            exporter,
            interval,
            stop: CancellationToken::new(),
            task: tokio::sync::Mutex::new(None),
        }
    }
}

fn refresh(exporter: &PrometheusExporter) {
    if let Err(err) = exporter.update() {
        warn!("metrics export incomplete: {err}");
    }
}

#[async_trait]
impl Service for MetricsRefresher {
    async fn init(&self) -> anyhow::Result<()> {
        refresh(&self.exporter);

        let exporter = self.exporter.clone();
        let stop = self.stop.clone();
        let mut interval = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = interval.tick() => refresh(&exporter),
                }
            }
            debug!("metrics refresher stopped");
        });
        *self.task.lock().await = Some(task);
        Ok(())
    }

    async fn shutdown(&self, _signal: Option<Signal>) {
        self.stop.cancel();
        if let Some(task) = self.task.lock().await.take() {
            if let Err(err) = task.await {
                warn!("metrics refresher task failed: {err}");
            }
        }
        // Final snapshot for anyone scraping during the rest of the shutdown.
        refresh(&self.exporter);
    }
}
