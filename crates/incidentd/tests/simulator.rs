//! Simulator loop: autonomous fault injection and clean cancellation.

use incidentd::config::Config;
use incidentd::faults::FaultController;
use incidentd::registry::FleetRegistry;
use incidentd::runtime::{ContainerState, FakeRuntime, RuntimeCall};
use incidentd::shutdown::ShutdownSignal;
use incidentd::simulator::{Simulator, SimulatorSettings};
use std::sync::Arc;
use std::time::Duration;

fn simulator(runtime: Arc<FakeRuntime>, min: Duration, max: Duration) -> Simulator {
    let registry = Arc::new(FleetRegistry::from_config(&Config::default().fleet).unwrap());
    let faults = Arc::new(FaultController::new(registry, runtime.clone()));
    Simulator::new(
        faults,
        runtime,
        SimulatorSettings {
            min_delay: min,
            max_delay: max,
            victim_tag: "victim".to_string(),
            seed: Some(42),
        },
    )
}

#[tokio::test]
async fn test_loop_stops_a_running_victim() {
    let runtime = Arc::new(
        FakeRuntime::new()
            .with_container("user_service_victim", "svc:good", ContainerState::Running)
            .with_container("payments_victim", "pay:1", ContainerState::Running)
            .with_container("postgres_db", "pg:16", ContainerState::Running),
    );
    let shutdown = ShutdownSignal::new();
    let handle = simulator(
        runtime.clone(),
        Duration::from_millis(5),
        Duration::from_millis(10),
    )
    .start(shutdown.listener());

    let probe = runtime.clone();
    tokio::time::timeout(Duration::from_secs(5), async move {
        while probe.count(|c| matches!(c, RuntimeCall::Stop(_))) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();

    // non-victims are never touched
    assert_eq!(
        runtime.container("postgres_db").unwrap().state,
        ContainerState::Running
    );
    let stopped_victims = ["user_service_victim", "payments_victim"]
        .iter()
        .filter(|name| runtime.container(name).unwrap().state == ContainerState::Exited)
        .count();
    assert!(stopped_victims >= 1);
}

#[tokio::test]
async fn test_loop_survives_unavailable_runtime() {
    let runtime = Arc::new(FakeRuntime::new());
    runtime.set_available(false);
    let shutdown = ShutdownSignal::new();
    let handle = simulator(
        runtime.clone(),
        Duration::from_millis(1),
        Duration::from_millis(2),
    )
    .start(shutdown.listener());

    let probe = runtime.clone();
    tokio::time::timeout(Duration::from_secs(5), async move {
        while probe.count(|c| *c == RuntimeCall::Ping) < 3 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .unwrap();
    assert!(!handle.is_finished());

    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_shutdown_during_sleep_touches_nothing() {
    let runtime = Arc::new(
        FakeRuntime::new().with_container("user_service_victim", "svc", ContainerState::Running),
    );
    let shutdown = ShutdownSignal::new();
    let handle = simulator(
        runtime.clone(),
        Duration::from_secs(3600),
        Duration::from_secs(3600),
    )
    .start(shutdown.listener());

    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.trigger();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();

    assert!(runtime.calls().is_empty());
}
