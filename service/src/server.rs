use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use anyhow::Context;
use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use common_metrics::{serve, setup_metrics_routes, PrometheusExporter};
use common_registry::params;
use health::{GuardChecksHandler, HealthChecker, StateChecksHandler};
use lifecycle::{Service, Signal};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::version::CODE_VERSION;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DebugServerConfig {
    /// Reported by `/meta`.
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl Default for DebugServerConfig {
    fn default() -> Self {
        Self {
            name: "service".to_string(),
            host: "0.0.0.0".to_string(),
            port: 9090,
        }
    }
}

impl DebugServerConfig {
    /// Produce a host:port address for binding a TcpListener.
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

params! {
    pub struct DebugServerParams {
        #[registry(lazy)]
        pub config: DebugServerConfig,
        pub exporter: Arc<PrometheusExporter>,
        pub checker: Arc<HealthChecker>,
        pub report: Arc<StateChecksHandler>,
        pub readiness: Arc<GuardChecksHandler>,
    }
}

#[derive(Clone)]
struct DebugState {
    name: String,
    started: Instant,
    checker: Arc<HealthChecker>,
    report: Arc<StateChecksHandler>,
    readiness: Arc<GuardChecksHandler>,
}

#[derive(Serialize)]
struct Meta {
    service: String,
    version: &'static str,
    /// Nanoseconds since the server was built.
    uptime: u64,
}

/// Internal HTTP server for metrics, health and probes. Not meant to be exposed publicly.
pub struct DebugServer {
    config: DebugServerConfig,
    exporter: Arc<PrometheusExporter>,
    state: DebugState,
    stop: CancellationToken,
    task: tokio::sync::Mutex<Option<JoinHandle<io::Result<()>>>>,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl DebugServer {
    pub fn new(params: DebugServerParams) -> Self {
        let state = DebugState {
            name: params.config.name.clone(),
            started: Instant::now(),
            checker: params.checker,
            report: params.report,
            readiness: params.readiness,
        };
        Self {
            config: params.config,
            exporter: params.exporter,
            state,
            stop: CancellationToken::new(),
            task: tokio::sync::Mutex::new(None),
            local_addr: Mutex::new(None),
        }
    }

    /// Registry provider.
    pub fn from_params(params: DebugServerParams) -> anyhow::Result<Arc<Self>> {
        Ok(Arc::new(Self::new(params)))
    }

    pub fn config(&self) -> &DebugServerConfig {
        &self.config
    }

    /// Address actually bound, once initialized. Differs from the config for port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn router(&self) -> Router {
        let router = Router::new()
            .route("/meta", get(meta))
            .route("/healthcheck", get(healthcheck))
            .route("/_readiness", get(readiness))
            .route("/_liveness", get(liveness))
            .with_state(self.state.clone());

        // Last, so the tracking middleware wraps every route above.
        setup_metrics_routes(router, self.exporter.clone())
    }
}

async fn meta(State(state): State<DebugState>) -> Json<Meta> {
    Json(Meta {
        service: state.name,
        version: CODE_VERSION,
        uptime: u64::try_from(state.started.elapsed().as_nanos()).unwrap_or(u64::MAX),
    })
}

async fn healthcheck(State(state): State<DebugState>) -> impl IntoResponse {
    drop(state.checker.update().await);
    state.report.state()
}

async fn readiness(State(state): State<DebugState>) -> impl IntoResponse {
    if state.readiness.all_healthy() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}

async fn liveness() -> &'static str {
    "ok"
}

#[async_trait]
impl Service for DebugServer {
    async fn init(&self) -> anyhow::Result<()> {
        let bind = self.config.bind();
        let listener = TcpListener::bind(&bind)
            .await
            .with_context(|| format!("binding debug server to {bind}"))?;
        let addr = listener.local_addr()?;
        *self.local_addr.lock().unwrap_or_else(PoisonError::into_inner) = Some(addr);

        info!(%addr, "start debug server");
        let stop = self.stop.clone();
        let task = tokio::spawn(serve(self.router(), listener, async move {
            stop.cancelled().await
        }));
        *self.task.lock().await = Some(task);
        Ok(())
    }

    async fn shutdown(&self, _signal: Option<Signal>) {
        self.stop.cancel();
        let Some(task) = self.task.lock().await.take() else {
            return;
        };
        match task.await {
            Ok(Ok(())) => info!("debug server stopped"),
            Ok(Err(err)) => error!("debug server failed: {err}"),
            Err(err) => error!("debug server task panicked: {err}"),
        }
    }
}
