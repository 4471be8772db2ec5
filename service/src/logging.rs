use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

/// Installs the process-wide subscriber: colored human output when `debug` is set, JSON
/// otherwise. The level comes from `RUST_LOG` and defaults to `info`.
pub fn init_tracing(debug: bool) -> Result<(), TryInitError> {
    let base_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_level(true);

    let log_layer = if debug {
        base_layer
            .with_ansi(true)
            .with_filter(env_filter())
            .boxed()
    } else {
        base_layer.json().with_filter(env_filter()).boxed()
    };

    tracing_subscriber::registry().with(log_layer).try_init()
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
