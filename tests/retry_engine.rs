use chrono::{Duration as ChronoDuration, Utc};
use processor_failover::domain::health::HealthSample;
use processor_failover::domain::payment::{FailureReason, Payment, PaymentRetry, PaymentStatus};
use processor_failover::domain::processor::Processor;
use processor_failover::error::GatewayError;
use processor_failover::gateways::mock::{MockBehavior, MockProcessorClient};
use processor_failover::gateways::PAYMENTS_PATH;
use processor_failover::repo::in_memory::InMemoryStore;
use processor_failover::repo::{Claim, PaymentStore};
use processor_failover::service::health_monitor::HealthMonitor;
use processor_failover::service::retry_engine::{
    drain_or_abort, RetryDirective, RetryEngine, RetryPolicy, RetryQueue, RETRY_CALL_TIMEOUT,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

struct Harness {
    gateway: Arc<MockProcessorClient>,
    store: InMemoryStore,
    monitor: HealthMonitor,
    engine: RetryEngine,
    queue: RetryQueue,
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        backoff: Duration::from_millis(20),
        ..RetryPolicy::default()
    }
}

fn harness_with(default: MockBehavior, fallback: MockBehavior, policy: RetryPolicy) -> Harness {
    let gateway = Arc::new(MockProcessorClient::new(default, fallback));
    let store = InMemoryStore::new();
    let monitor = HealthMonitor::new(gateway.clone(), Arc::new(store.clone()));
    let (engine, queue) = RetryEngine::new(gateway.clone(), Arc::new(store.clone()), monitor.clone(), policy);
    Harness {
        gateway,
        store,
        monitor,
        engine,
        queue,
    }
}

fn harness(default: MockBehavior, fallback: MockBehavior) -> Harness {
    harness_with(default, fallback, fast_policy())
}

async fn set_health(h: &Harness, default_failing: bool, fallback_failing: bool) {
    h.gateway.set_health(
        Processor::Default,
        Some(HealthSample {
            failing: default_failing,
            min_response_time: 10,
        }),
    );
    h.gateway.set_health(
        Processor::Fallback,
        Some(HealthSample {
            failing: fallback_failing,
            min_response_time: 10,
        }),
    );
    h.monitor.tick().await;
}

async fn pending_payment(store: &InMemoryStore, id: &str) -> PaymentRetry {
    let payment = Payment {
        correlation_id: id.to_string(),
        amount_cents: 1990,
        requested_at: Utc::now(),
    };
    store.record_pending(&payment).await.unwrap();
    PaymentRetry::new(payment)
}

#[tokio::test]
async fn healthy_default_delivers_and_settles() {
    let h = harness(MockBehavior::AlwaysSuccess, MockBehavior::AlwaysSuccess);
    let mut retry = pending_payment(&h.store, "p-1").await;

    let directive = h.engine.process_one(&mut retry, Utc::now()).await;

    assert_eq!(directive, RetryDirective::Settled);
    let stored = h.store.get("p-1").await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Processed);
    assert_eq!(stored.processor_used, Some(Processor::Default));

    let calls = h.gateway.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].path, PAYMENTS_PATH);
    assert_eq!(calls[0].timeout_override, Some(RETRY_CALL_TIMEOUT));
}

#[tokio::test]
async fn rejected_delivery_rolls_back_and_backs_off() {
    let h = harness(MockBehavior::AlwaysReject(500), MockBehavior::AlwaysSuccess);
    let mut retry = pending_payment(&h.store, "p-2").await;

    let directive = h.engine.process_one(&mut retry, Utc::now()).await;

    assert_eq!(directive, RetryDirective::Backoff);
    assert_eq!(retry.failure_count, 1);
    assert_eq!(retry.last_processor_used, Some(Processor::Default));
    assert_eq!(retry.last_failure_reason, Some(FailureReason::ProcessorTimeout));

    let stored = h.store.get("p-2").await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Pending);
    assert_eq!(stored.processor_used, None);
    assert_eq!(h.gateway.calls_to(Processor::Fallback, PAYMENTS_PATH), 0);
}

#[tokio::test]
async fn unreachable_processor_is_recorded_as_processor_error() {
    let h = harness(MockBehavior::AlwaysTimeout, MockBehavior::AlwaysSuccess);
    let mut retry = pending_payment(&h.store, "p-3").await;

    assert_eq!(h.engine.process_one(&mut retry, Utc::now()).await, RetryDirective::Backoff);
    assert_eq!(h.engine.process_one(&mut retry, Utc::now()).await, RetryDirective::Backoff);

    assert_eq!(retry.failure_count, 2);
    assert_eq!(retry.last_failure_reason, Some(FailureReason::ProcessorError));
}

#[tokio::test]
async fn fallback_waits_for_grace_window() {
    let h = harness(MockBehavior::AlwaysSuccess, MockBehavior::AlwaysSuccess);
    set_health(&h, true, false).await;
    let mut retry = pending_payment(&h.store, "p-4").await;
    let requested_at = retry.payment.requested_at;

    let early = h
        .engine
        .process_one(&mut retry, requested_at + ChronoDuration::milliseconds(1000))
        .await;
    assert_eq!(early, RetryDirective::Backoff);
    assert_eq!(h.gateway.calls_to(Processor::Fallback, PAYMENTS_PATH), 0);
    assert_eq!(h.gateway.calls_to(Processor::Default, PAYMENTS_PATH), 0);
    assert_eq!(retry.failure_count, 0);

    let late = h
        .engine
        .process_one(&mut retry, requested_at + ChronoDuration::milliseconds(1500))
        .await;
    assert_eq!(late, RetryDirective::Settled);
    assert_eq!(h.gateway.calls_to(Processor::Fallback, PAYMENTS_PATH), 1);

    let stored = h.store.get("p-4").await.unwrap();
    assert_eq!(stored.processor_used, Some(Processor::Fallback));
    assert_eq!(stored.status, PaymentStatus::Processed);
}

#[tokio::test]
async fn failing_fallback_is_checked_by_status() {
    let h = harness(MockBehavior::AlwaysSuccess, MockBehavior::AlwaysReject(503));
    set_health(&h, true, false).await;
    let mut retry = pending_payment(&h.store, "p-5").await;
    let later = retry.payment.requested_at + ChronoDuration::seconds(2);

    assert_eq!(h.engine.process_one(&mut retry, later).await, RetryDirective::Backoff);
    assert_eq!(retry.last_processor_used, Some(Processor::Fallback));

    let stored = h.store.get("p-5").await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Pending);
    assert!(h.store.summary(Default::default()).await.unwrap().fallback.total_requests == 0);
}

#[tokio::test]
async fn both_unhealthy_keeps_payment_queued() {
    let h = harness(MockBehavior::AlwaysSuccess, MockBehavior::AlwaysSuccess);
    set_health(&h, true, true).await;
    let mut retry = pending_payment(&h.store, "p-6").await;
    let later = retry.payment.requested_at + ChronoDuration::minutes(10);

    for _ in 0..5 {
        assert_eq!(h.engine.process_one(&mut retry, later).await, RetryDirective::Backoff);
    }

    assert_eq!(h.gateway.calls_to(Processor::Default, PAYMENTS_PATH), 0);
    assert_eq!(h.gateway.calls_to(Processor::Fallback, PAYMENTS_PATH), 0);
    assert_eq!(h.store.get("p-6").await.unwrap().status, PaymentStatus::Pending);
}

#[tokio::test]
async fn persistence_failure_retries_without_backoff() {
    let h = harness(MockBehavior::AlwaysSuccess, MockBehavior::AlwaysSuccess);
    let mut retry = pending_payment(&h.store, "p-7").await;
    h.store.set_unavailable(true);

    let directive = h.engine.process_one(&mut retry, Utc::now()).await;

    assert_eq!(directive, RetryDirective::RetryNow);
    assert_eq!(retry.failure_count, 0);
    assert!(h.gateway.calls().is_empty());
}

#[tokio::test]
async fn already_settled_payment_is_not_delivered_again() {
    let h = harness(MockBehavior::AlwaysSuccess, MockBehavior::AlwaysSuccess);
    let payment = Payment {
        correlation_id: "p-8".to_string(),
        amount_cents: 500,
        requested_at: Utc::now(),
    };
    h.store.record_processed(&payment, Processor::Default).await.unwrap();

    let mut retry = PaymentRetry::new(payment);
    assert_eq!(h.engine.process_one(&mut retry, Utc::now()).await, RetryDirective::Settled);
    assert!(h.gateway.calls().is_empty());
}

#[tokio::test]
async fn delivered_but_unsettled_payment_only_finishes_bookkeeping() {
    let h = harness(MockBehavior::AlwaysSuccess, MockBehavior::AlwaysSuccess);
    let mut retry = pending_payment(&h.store, "p-9").await;
    retry.delivered_via = Some(Processor::Fallback);

    assert_eq!(h.engine.process_one(&mut retry, Utc::now()).await, RetryDirective::Settled);
    assert!(h.gateway.calls().is_empty());

    let stored = h.store.get("p-9").await.unwrap();
    assert_eq!(stored.status, PaymentStatus::Processed);
    assert_eq!(stored.processor_used, Some(Processor::Fallback));
}

async fn wait_until_processed(store: &InMemoryStore, id: &str) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(p) = store.get(id).await {
                if p.status == PaymentStatus::Processed {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("payment was not processed in time");
}

#[tokio::test]
async fn worker_recovers_payment_once_default_comes_back() {
    let h = harness(MockBehavior::AlwaysUnreachable, MockBehavior::AlwaysSuccess);
    let retry = pending_payment(&h.store, "p-10").await;
    h.queue.push(retry).await.unwrap();
    assert_eq!(h.queue.len(), 1);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let gateway = h.gateway.clone();
    let store = h.store.clone();
    let queue = h.queue.clone();
    let worker = tokio::spawn(h.engine.run(shutdown_rx));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(gateway.calls_to(Processor::Default, PAYMENTS_PATH) >= 1);
    gateway.set_behavior(Processor::Default, MockBehavior::AlwaysSuccess);

    wait_until_processed(&store, "p-10").await;
    let stored = store.get("p-10").await.unwrap();
    assert_eq!(stored.processor_used, Some(Processor::Default));
    assert_eq!(store.len().await, 1);

    shutdown_tx.send(true).unwrap();
    assert!(drain_or_abort(worker, Duration::from_secs(1)).await);
    assert!(queue.is_empty());
}

#[tokio::test]
async fn full_queue_rejects_new_retries() {
    let policy = RetryPolicy {
        capacity: 1,
        enqueue_timeout: Duration::from_millis(10),
        ..fast_policy()
    };
    let h = harness_with(MockBehavior::AlwaysSuccess, MockBehavior::AlwaysSuccess, policy);

    let first = pending_payment(&h.store, "q-1").await;
    let second = pending_payment(&h.store, "q-2").await;

    h.queue.push(first).await.unwrap();
    let err = h.queue.push(second).await.unwrap_err();

    assert!(matches!(err, GatewayError::QueueFull));
    assert_eq!(h.queue.len(), 1);
}

#[tokio::test]
async fn restore_requeues_unsettled_records_and_rolls_back_claims() {
    let h = harness(MockBehavior::AlwaysSuccess, MockBehavior::AlwaysSuccess);
    let pending = pending_payment(&h.store, "r-1").await;
    let claimed = pending_payment(&h.store, "r-2").await;
    let Claim::Claimed(_) = h.store.claim(&claimed.payment, Processor::Default).await.unwrap() else {
        panic!("expected claim");
    };
    h.store
        .record_processed(
            &Payment {
                correlation_id: "r-3".to_string(),
                amount_cents: 100,
                requested_at: Utc::now(),
            },
            Processor::Default,
        )
        .await
        .unwrap();
    drop(pending);

    let restored = h.queue.restore(&h.store).await.unwrap();

    assert_eq!(restored, 2);
    assert_eq!(h.queue.len(), 2);
    let rolled_back = h.store.get("r-2").await.unwrap();
    assert_eq!(rolled_back.status, PaymentStatus::Pending);
    assert_eq!(rolled_back.processor_used, None);
}

#[tokio::test]
async fn restore_queues_records_beyond_capacity_and_drains_them_all() {
    let policy = RetryPolicy {
        capacity: 2,
        enqueue_timeout: Duration::from_millis(10),
        ..fast_policy()
    };
    let h = harness_with(MockBehavior::AlwaysSuccess, MockBehavior::AlwaysSuccess, policy);
    let ids: Vec<String> = (0..4).map(|i| format!("c-{i}")).collect();
    for id in &ids {
        pending_payment(&h.store, id).await;
    }

    let restored = h.queue.restore(&h.store).await.unwrap();

    assert_eq!(restored, 4);
    assert_eq!(h.queue.len(), 4);
    assert!(matches!(h.queue.reserve().await, Err(GatewayError::QueueFull)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let store = h.store.clone();
    let queue = h.queue.clone();
    let worker = tokio::spawn(h.engine.run(shutdown_rx));

    for id in &ids {
        wait_until_processed(&store, id).await;
    }
    assert!(store.unsettled().await.unwrap().is_empty());

    shutdown_tx.send(true).unwrap();
    assert!(drain_or_abort(worker, Duration::from_secs(1)).await);
    assert!(queue.is_empty());
    assert!(queue.reserve().await.is_ok());
}

#[tokio::test]
async fn worker_stops_when_shutdown_sender_is_dropped() {
    let h = harness(MockBehavior::AlwaysSuccess, MockBehavior::AlwaysSuccess);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    drop(shutdown_tx);

    tokio::time::timeout(Duration::from_secs(1), h.engine.run(shutdown_rx))
        .await
        .expect("worker kept running without a shutdown sender");
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn undrained_worker_is_aborted_after_grace_period() {
    let h = harness(MockBehavior::AlwaysUnreachable, MockBehavior::AlwaysSuccess);
    let retry = pending_payment(&h.store, "g-1").await;
    h.queue.push(retry).await.unwrap();

    let gateway = h.gateway.clone();
    let store = h.store.clone();
    let queue = h.queue.clone();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = tokio::spawn(h.engine.run(shutdown_rx));
    shutdown_tx.send(true).unwrap();

    assert!(!drain_or_abort(worker, Duration::from_millis(100)).await);

    let calls = gateway.calls_to(Processor::Default, PAYMENTS_PATH);
    assert!(calls >= 1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(gateway.calls_to(Processor::Default, PAYMENTS_PATH), calls);

    assert!(queue.is_empty());
    assert_ne!(store.get("g-1").await.unwrap().status, PaymentStatus::Processed);
}
