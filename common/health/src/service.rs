use async_trait::async_trait;
use lifecycle::{Service, Signal};
use tracing::warn;

use crate::checker::HealthChecker;

#[async_trait]
impl Service for HealthChecker {
    async fn init(&self) -> anyhow::Result<()> {
        self.run();
        Ok(())
    }

    async fn shutdown(&self, _signal: Option<Signal>) {
        if let Err(err) = self.close().await {
            warn!("health checker close failed: {err}");
        }
    }
}
