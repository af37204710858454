use processor_failover::domain::health::{HealthSample, ProcessorHealth};
use processor_failover::domain::processor::Processor;
use processor_failover::gateways::mock::MockProcessorClient;
use processor_failover::gateways::HEALTH_PATH;
use processor_failover::repo::in_memory::InMemoryStore;
use processor_failover::service::health_monitor::{HealthMonitor, HEALTH_CHECK_INTERVAL};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

fn sample(failing: bool, min_response_time: i64) -> Option<HealthSample> {
    Some(HealthSample {
        failing,
        min_response_time,
    })
}

fn monitor() -> (Arc<MockProcessorClient>, InMemoryStore, HealthMonitor) {
    let gateway = Arc::new(MockProcessorClient::default());
    let store = InMemoryStore::new();
    let monitor = HealthMonitor::new(gateway.clone(), Arc::new(store.clone()));
    (gateway, store, monitor)
}

#[tokio::test]
async fn starts_healthy_before_first_sample() {
    let (_, _, monitor) = monitor();
    let snapshot = monitor.get_health();
    assert_eq!(snapshot.default, ProcessorHealth::default());
    assert!(snapshot.default.is_healthy());
    assert!(snapshot.fallback.is_healthy());
    assert_eq!(monitor.interval(), HEALTH_CHECK_INTERVAL);
}

#[tokio::test]
async fn counts_falling_cycles_and_resets_on_recovery() {
    let (gateway, _, monitor) = monitor();
    gateway.set_health(Processor::Default, sample(true, 0));
    gateway.set_health(Processor::Fallback, sample(false, 40));

    for expected in 1..=3 {
        let snapshot = monitor.tick().await;
        assert!(snapshot.default.failing);
        assert_eq!(snapshot.default.falling_cycles, expected);
        assert_eq!(snapshot.fallback.falling_cycles, 0);
    }

    gateway.set_health(Processor::Default, sample(false, 120));
    let snapshot = monitor.tick().await;
    assert_eq!(
        snapshot.default,
        ProcessorHealth {
            failing: false,
            min_response_time: 120,
            falling_cycles: 0,
        }
    );
}

#[tokio::test]
async fn unreachable_health_endpoint_keeps_last_known_value() {
    let (gateway, _, monitor) = monitor();
    gateway.set_health(Processor::Fallback, sample(true, 0));
    monitor.tick().await;

    gateway.set_health(Processor::Fallback, None);
    let snapshot = monitor.tick().await;

    assert!(snapshot.fallback.failing);
    assert_eq!(snapshot.fallback.falling_cycles, 1);
    assert!(snapshot.default.is_healthy());
    assert_eq!(gateway.calls_to(Processor::Fallback, HEALTH_PATH), 2);
}

#[tokio::test]
async fn successful_samples_are_persisted() {
    let (gateway, _, monitor) = monitor();
    gateway.set_health(Processor::Default, sample(false, 15));
    monitor.tick().await;

    let persisted = monitor.persisted().await.unwrap();
    assert_eq!(persisted.len(), 1);
    assert_eq!(persisted[0].processor, Processor::Default);
    assert_eq!(persisted[0].health.min_response_time, 15);

    gateway.set_health(Processor::Fallback, sample(true, 0));
    monitor.tick().await;
    assert_eq!(monitor.persisted().await.unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn run_samples_on_interval_until_shutdown() {
    let (gateway, _, monitor) = monitor();
    gateway.set_health(Processor::Default, sample(true, 0));
    gateway.set_health(Processor::Fallback, sample(false, 5));
    let mut updates = monitor.subscribe();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(monitor.clone().run(shutdown_rx));

    tokio::time::sleep(HEALTH_CHECK_INTERVAL + Duration::from_millis(100)).await;
    assert_eq!(monitor.get_health().default.falling_cycles, 2);
    assert!(updates.has_changed().unwrap());
    assert!(updates.borrow_and_update().default.failing);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
    assert_eq!(gateway.calls_to(Processor::Default, HEALTH_PATH), 2);
}
