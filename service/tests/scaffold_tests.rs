use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use common_registry::RegistryError;
use envconfig::Envconfig;
use lifecycle::Runner;
use service::base::{SHUTDOWN_DONE_MARKER, STARTED_MARKER};
use service::{register_base, Base, Config, DebugServer, ServiceRunner};

fn config(cache: &std::path::Path) -> Config {
    let env = HashMap::from([
        ("DEBUG_BIND_HOST".to_string(), "127.0.0.1".to_string()),
        ("DEBUG_BIND_PORT".to_string(), "0".to_string()),
        (
            "CACHE_DIR".to_string(),
            cache.to_string_lossy().into_owned(),
        ),
    ]);
    Config::init_from_hashmap(&env).unwrap()
}

fn service_runner() -> ServiceRunner {
    ServiceRunner::new(
        Runner::builder()
            .with_trap_signals(false)
            .with_post_shutdown(|_| {})
            .build(),
    )
}

#[test]
fn base_components_are_created_in_order() {
    let cache = tempfile::tempdir().unwrap();
    let config = config(cache.path());
    let mut runner = service_runner();
    register_base(runner.registry(), &config).unwrap();

    runner.create_base(&config).unwrap();
    assert_eq!(
        runner.runner().service_names(),
        vec!["Base", "HealthChecker", "MetricsRefresher", "DebugServer"]
    );
}

#[test]
fn created_components_are_singletons() {
    let cache = tempfile::tempdir().unwrap();
    let config = config(cache.path());
    let mut runner = service_runner();
    register_base(runner.registry(), &config).unwrap();

    let created = runner.create::<Base>().unwrap();
    let requested: Arc<Base> = runner.registry().request().unwrap();
    assert!(Arc::ptr_eq(&created, &requested));
}

#[test]
fn registering_base_twice_fails() {
    let cache = tempfile::tempdir().unwrap();
    let config = config(cache.path());
    let runner = service_runner();
    register_base(runner.registry(), &config).unwrap();

    let err = register_base(runner.registry(), &config).unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateProvider(_)));
}

#[test]
fn create_without_provider_fails() {
    let mut runner = service_runner();
    let err = runner.create::<DebugServer>().err().expect("nothing registered");
    assert!(matches!(err, RegistryError::NoProvider { .. }));
    assert!(runner.runner().is_empty());
}

#[tokio::test]
async fn runs_until_stopped_and_leaves_clean_markers() {
    let cache = tempfile::tempdir().unwrap();
    let config = config(cache.path());
    let mut runner = service_runner();
    register_base(runner.registry(), &config).unwrap();
    runner.create_base(&config).unwrap();
    let server: Arc<DebugServer> = runner.registry().request().unwrap();

    let stop = runner.stop_handle();
    let run = tokio::spawn(runner.run());
    tokio::time::timeout(Duration::from_secs(5), async {
        while server.local_addr().is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("debug server bound");
    assert!(cache.path().join(STARTED_MARKER).exists());

    stop.stop();
    let result = run.await.unwrap();
    assert!(result.is_ok(), "{result:?}");
    assert!(cache.path().join(SHUTDOWN_DONE_MARKER).exists());
}
