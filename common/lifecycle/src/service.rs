use async_trait::async_trait;

use crate::signals::Signal;

/// A component driven by the [`Runner`](crate::Runner).
///
/// `init` must return once the component is ready; long-running work belongs in `run`,
/// which is spawned after every component initialized. `shutdown` receives the signal that
/// triggered it, or `None` when shutdown was caused by a failing component.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Name used in logs, metrics and errors. Defaults to the type name without its path.
    fn name(&self) -> &str {
        short_type_name::<Self>()
    }

    async fn init(&self) -> anyhow::Result<()>;

    /// Returning `Ok(())` only means there is nothing (left) to run; it does not stop the
    /// process. An error triggers shutdown.
    async fn run(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn shutdown(&self, signal: Option<Signal>);
}

/// `my_crate::server::DebugServer<T>` becomes `DebugServer`.
pub fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
