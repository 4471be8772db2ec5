use std::sync::Arc;

use common_metrics::{MetricsRegistry, PrometheusExporter};
use common_registry::{Extras, Injectable, Registry, RegistryError};
use health::{GuardChecksHandler, HealthChecker, LogChecksHandler, StateChecksHandler};
use lifecycle::{LifecycleError, Runner, Service, StopHandle};
use tracing::debug;

use crate::base::Base;
use crate::config::Config;
use crate::metrics_service::MetricsRefresher;
use crate::server::DebugServer;
use crate::version::CODE_VERSION;

/// A [`Runner`] fed from a [`Registry`]: components are resolved with all their
/// dependencies and started in the order they were created.
pub struct ServiceRunner {
    registry: Registry,
    runner: Runner,
}

impl ServiceRunner {
    pub fn new(runner: Runner) -> Self {
        Self {
            registry: Registry::new(),
            runner,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(Runner::new(config.runner_config()))
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.runner.stop_handle()
    }

    /// Resolves `Arc<S>` and appends it to the runner.
    pub fn create<S: Service>(&mut self) -> Result<Arc<S>, RegistryError>
    where
        Arc<S>: Injectable,
    {
        self.create_with(Extras::new())
    }

    /// Like [`create`](Self::create), with request extras for lazy params fields and
    /// trailing constructor arguments.
    pub fn create_with<S: Service>(&mut self, extras: Extras) -> Result<Arc<S>, RegistryError>
    where
        Arc<S>: Injectable,
    {
        let service: Arc<S> = self.registry.request_with(extras)?;
        debug!(component = %service.name(), position = self.runner.len(), "Lifecycle: component created");
        self.runner.add(service.clone());
        Ok(service)
    }

    /// Creates the components every daemon starts with, in order: marker files, health
    /// checks, metrics refresh, then the debug server.
    pub fn create_base(&mut self, config: &Config) -> Result<(), RegistryError> {
        self.create::<Base>()?;
        self.create::<HealthChecker>()?;
        self.create::<MetricsRefresher>()?;
        self.create_with::<DebugServer>(Extras::new().with(config.debug_server_config()))?;
        Ok(())
    }

    pub async fn run(self) -> Result<(), LifecycleError> {
        self.runner.run().await
    }
}

/// Registers the providers [`ServiceRunner::create_base`] needs.
pub fn register_base(registry: &Registry, config: &Config) -> Result<(), RegistryError> {
    let config = config.clone();
    registry.register(move || -> anyhow::Result<Config> { Ok(config.clone()) })?;
    registry.register(new_metrics_registry)?;
    registry.register(new_exporter)?;
    registry.register(new_log_handler)?;
    registry.register(new_state_handler)?;
    registry.register(new_readiness_guard)?;
    registry.register(new_health_checker)?;
    registry.register(new_base)?;
    registry.register(new_metrics_refresher)?;
    registry.register_params(DebugServer::from_params)?;
    Ok(())
}

fn new_metrics_registry() -> anyhow::Result<Arc<MetricsRegistry>> {
    Ok(Arc::new(MetricsRegistry::new()))
}

fn new_exporter(
    config: Config,
    registry: Arc<MetricsRegistry>,
) -> anyhow::Result<Arc<PrometheusExporter>> {
    Ok(Arc::new(PrometheusExporter::new(
        registry,
        &config.service_name,
    )))
}

fn new_log_handler() -> anyhow::Result<Arc<LogChecksHandler>> {
    Ok(Arc::new(LogChecksHandler::new(CODE_VERSION)))
}

fn new_state_handler() -> anyhow::Result<Arc<StateChecksHandler>> {
    Ok(Arc::new(StateChecksHandler::new(CODE_VERSION)))
}

fn new_readiness_guard(config: Config) -> anyhow::Result<Arc<GuardChecksHandler>> {
    Ok(Arc::new(GuardChecksHandler::new(
        config.readiness_checks.0.iter().cloned(),
    )))
}

fn new_health_checker(
    config: Config,
    registry: Arc<MetricsRegistry>,
    log: Arc<LogChecksHandler>,
    state: Arc<StateChecksHandler>,
    readiness: Arc<GuardChecksHandler>,
) -> anyhow::Result<Arc<HealthChecker>> {
    let checker = HealthChecker::new(config.health_config(CODE_VERSION), registry)?
        .with_handler(log)
        .with_handler(state)
        .with_handler(readiness);
    Ok(Arc::new(checker))
}

fn new_base(config: Config, registry: Arc<MetricsRegistry>) -> anyhow::Result<Arc<Base>> {
    Ok(Arc::new(Base::new(
        &config.service_name,
        config.cache_dir.clone(),
        &registry,
    )?))
}

fn new_metrics_refresher(
    config: Config,
    exporter: Arc<PrometheusExporter>,
) -> anyhow::Result<Arc<MetricsRefresher>> {
    Ok(Arc::new(MetricsRefresher::new(
        exporter,
        config.metrics_refresh_interval.0,
    )))
}
