use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use common_metrics::{metric_name, Counter, MetricsError, MetricsRegistry};
use lifecycle::{Service, Signal};
use tracing::{error, info, warn};

/// Written once init succeeds.
pub const STARTED_MARKER: &str = ".started";
/// Written at the end of every shutdown. A `.started` without it means the previous
/// process died without shutting down.
pub const SHUTDOWN_DONE_MARKER: &str = ".shutdown_done";

/// First component of every daemon: owns the cache directory and its marker files.
pub struct Base {
    name: String,
    cache_dir: PathBuf,
    unclean_shutdowns: Arc<Counter>,
}

impl Base {
    pub fn new(
        name: &str,
        cache_dir: impl Into<PathBuf>,
        registry: &MetricsRegistry,
    ) -> Result<Self, MetricsError> {
        let unclean_shutdowns =
            registry.get_or_register_counter(&metric_name("service", &[], "unclean_shutdown"))?;
        Ok(Self {
            name: name.to_string(),
            cache_dir: cache_dir.into(),
            unclean_shutdowns,
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn unclean_shutdowns(&self) -> i64 {
        self.unclean_shutdowns.count()
    }

    fn marker(&self, name: &str) -> PathBuf {
        self.cache_dir.join(name)
    }
}

#[async_trait]
impl Service for Base {
    async fn init(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.cache_dir)
            .await
            .with_context(|| format!("creating cache dir {}", self.cache_dir.display()))?;

        let started = self.marker(STARTED_MARKER);
        let done = self.marker(SHUTDOWN_DONE_MARKER);
        if tokio::fs::try_exists(&started).await? && !tokio::fs::try_exists(&done).await? {
            warn!(service = %self.name, "found unclean service shutdown");
            self.unclean_shutdowns.inc(1);
        }

        match tokio::fs::remove_file(&done).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| format!("removing {}", done.display()));
            }
        }
        tokio::fs::write(&started, b"")
            .await
            .with_context(|| format!("writing {}", started.display()))?;

        info!(service = %self.name, cache_dir = %self.cache_dir.display(), "service started");
        Ok(())
    }

    async fn shutdown(&self, signal: Option<Signal>) {
        match signal {
            Some(signal) => info!(service = %self.name, %signal, "service shutdown"),
            None => info!(service = %self.name, signal = "none (normal termination)", "service shutdown"),
        }

        let done = self.marker(SHUTDOWN_DONE_MARKER);
        if let Err(err) = tokio::fs::write(&done, b"").await {
            error!(path = %done.display(), error = %err, "failed to write shutdown marker");
        }
    }
}
