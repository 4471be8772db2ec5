use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::bail;
use async_trait::async_trait;

/// Something that can tell whether it is healthy. `Ok(())` means healthy.
#[async_trait]
pub trait HealthCheckable: Send + Sync {
    async fn check_health(&self) -> anyhow::Result<()>;
}

#[async_trait]
impl<F> HealthCheckable for F
where
    F: Fn() -> anyhow::Result<()> + Send + Sync,
{
    async fn check_health(&self) -> anyhow::Result<()> {
        self()
    }
}

/// Always passes. Registered as `"uptime"` by every checker, so its age is the time since
/// the process started evaluating health.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysHealthy;

#[async_trait]
impl HealthCheckable for AlwaysHealthy {
    async fn check_health(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Fails with `"paused"` while paused, e.g. to take an instance out of rotation.
#[derive(Debug, Default)]
pub struct PauseCheck {
    paused: AtomicBool,
}

impl PauseCheck {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthCheckable for PauseCheck {
    async fn check_health(&self) -> anyhow::Result<()> {
        if self.is_paused() {
            bail!("paused");
        }
        Ok(())
    }
}
