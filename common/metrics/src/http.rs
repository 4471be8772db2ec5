use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{MatchedPath, State},
    http::{header, Request},
    middleware::Next,
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::net::TcpListener;

use crate::prometheus::PrometheusExporter;
use crate::registry::{metric_name, sanitize_label_value, MetricsRegistry};

pub const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// `path` label of requests no route matched.
pub const UNMATCHED_PATH: &str = "unmatched";

/// Serve a `Router` on an already bound listener until `shutdown` resolves. Binding is left
/// to the caller so that address errors surface before the server task is spawned.
pub async fn serve<F>(router: Router, listener: TcpListener, shutdown: F) -> Result<(), std::io::Error>
where
    F: Future<Output = ()> + Send + 'static,
{
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

/// Add the `/metrics` endpoint serving the exporter cache, and the request tracking
/// middleware. Should be called last so every route is tracked.
pub fn setup_metrics_routes(router: Router, exporter: Arc<PrometheusExporter>) -> Router {
    let registry = exporter.registry().clone();
    router
        .route(
            "/metrics",
            get(move || {
                let body = exporter.render();
                std::future::ready(([(header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)], body))
            }),
        )
        .layer(axum::middleware::from_fn_with_state(registry, track_metrics))
}

/// Middleware to record request counts and latency per route into the registry.
pub async fn track_metrics(
    State(registry): State<Arc<MetricsRegistry>>,
    req: Request<Body>,
    next: Next,
) -> impl IntoResponse {
    let start = Instant::now();

    // Raw paths of unmatched requests are client-controlled, one entry each would grow
    // the registry without bound.
    let path = match req.extensions().get::<MatchedPath>() {
        Some(matched_path) => sanitize_label_value(matched_path.as_str()),
        None => UNMATCHED_PATH.to_owned(),
    };

    let method = req.method().clone();

    // Run the rest of the request handling first, so we can measure it and get response
    // codes.
    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    let labels = [
        ("method", method.as_str()),
        ("path", path.as_str()),
        ("status", status.as_str()),
    ];

    if let Ok(counter) = registry.get_or_register_counter(&metric_name("http", &labels, "requests")) {
        counter.inc(1);
    }
    if let Ok(timer) = registry.get_or_register_timer(&metric_name("http", &labels, "request_duration")) {
        timer.update_since(start);
    }

    response
}
