use crate::domain::payment::{FailureReason, PaymentRetry, PaymentStatus};
use crate::domain::processor::Processor;
use crate::error::GatewayError;
use crate::gateways::ProcessorClient;
use crate::repo::{Claim, PaymentStore, WriteAhead};
use crate::service::health_monitor::{HealthMonitor, HEALTH_CHECK_INTERVAL};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

pub const RETRY_CALL_TIMEOUT: Duration = Duration::from_millis(7000);
pub const MAX_AGE_IN_QUEUE: Duration = Duration::from_millis(1500);
pub const QUEUE_CAPACITY: usize = 50_000;
pub const ENQUEUE_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Pause after a cycle that hit a struggling processor.
    pub backoff: Duration,
    pub retry_call_timeout: Duration,
    /// Minimum age before a payment may be rerouted to the fallback processor.
    pub max_age_in_queue: Duration,
    pub capacity: usize,
    pub enqueue_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: HEALTH_CHECK_INTERVAL,
            retry_call_timeout: RETRY_CALL_TIMEOUT,
            max_age_in_queue: MAX_AGE_IN_QUEUE,
            capacity: QUEUE_CAPACITY,
            enqueue_timeout: ENQUEUE_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDirective {
    /// Delivered and recorded; drop from the queue.
    Settled,
    /// Requeue and move on to the next item immediately.
    RetryNow,
    /// Requeue and pause for one backoff period before the next item.
    Backoff,
}

/// Holds a payment's place in the queue until it settles.
enum Ticket {
    Slot(OwnedSemaphorePermit),
    /// Restored beyond capacity; counted separately so inbound admission
    /// stays capped while every unsettled record is still retried.
    Overflow(Arc<AtomicUsize>),
}

impl Drop for Ticket {
    fn drop(&mut self) {
        if let Ticket::Overflow(count) = self {
            count.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

struct QueuedRetry {
    retry: PaymentRetry,
    _ticket: Ticket,
}

/// Producer side of the retry queue.
///
/// Capacity is counted in slots: one per payment owned by the engine, held
/// from enqueue until the payment settles. Requeues keep their slot.
#[derive(Clone)]
pub struct RetryQueue {
    tx: mpsc::UnboundedSender<QueuedRetry>,
    slots: Arc<Semaphore>,
    overflow: Arc<AtomicUsize>,
    capacity: usize,
    enqueue_timeout: Duration,
}

/// A reserved place in the retry queue. Dropping it unused releases the place.
pub struct RetrySlot {
    permit: OwnedSemaphorePermit,
    tx: mpsc::UnboundedSender<QueuedRetry>,
}

impl RetrySlot {
    pub fn push(self, retry: PaymentRetry) -> Result<(), GatewayError> {
        self.tx
            .send(QueuedRetry {
                retry,
                _ticket: Ticket::Slot(self.permit),
            })
            .map_err(|_| GatewayError::QueueFull)
    }
}

impl RetryQueue {
    /// Waits at most the configured enqueue timeout for a free slot. Rejects
    /// outright while restored records beyond capacity are still queued.
    pub async fn reserve(&self) -> Result<RetrySlot, GatewayError> {
        if self.overflow.load(Ordering::SeqCst) > 0 {
            return Err(GatewayError::QueueFull);
        }
        let permit = tokio::time::timeout(self.enqueue_timeout, self.slots.clone().acquire_owned())
            .await
            .map_err(|_| GatewayError::QueueFull)?
            .map_err(|_| GatewayError::QueueFull)?;

        Ok(RetrySlot {
            permit,
            tx: self.tx.clone(),
        })
    }

    pub async fn push(&self, retry: PaymentRetry) -> Result<(), GatewayError> {
        self.reserve().await?.push(retry)
    }

    /// Payments currently owned by the engine.
    pub fn len(&self) -> usize {
        self.capacity - self.slots.available_permits() + self.overflow.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Requeues every unsettled record found in storage. Records left
    /// `IN_FLIGHT` by an interrupted attempt are rolled back first.
    ///
    /// Free slots are used first; records beyond capacity are queued anyway,
    /// so new inbound payments see `QueueFull` until the backlog shrinks.
    pub async fn restore(&self, store: &dyn PaymentStore) -> anyhow::Result<usize> {
        let mut restored = 0;
        let mut beyond_capacity = 0;
        for stored in store.unsettled().await? {
            if stored.status == PaymentStatus::InFlight {
                if let Some(processor) = stored.processor_used {
                    store
                        .rollback(WriteAhead {
                            correlation_id: stored.payment.correlation_id.clone(),
                            processor,
                        })
                        .await?;
                }
            }

            let ticket = match self.slots.clone().try_acquire_owned() {
                Ok(permit) => Ticket::Slot(permit),
                Err(_) => {
                    beyond_capacity += 1;
                    self.overflow.fetch_add(1, Ordering::SeqCst);
                    Ticket::Overflow(self.overflow.clone())
                }
            };

            self.tx
                .send(QueuedRetry {
                    retry: PaymentRetry::new(stored.payment),
                    _ticket: ticket,
                })
                .map_err(|_| anyhow::anyhow!("retry engine stopped while restoring"))?;
            restored += 1;
        }

        if beyond_capacity > 0 {
            tracing::warn!(
                "restored {} unsettled payments beyond retry queue capacity {}",
                beyond_capacity,
                self.capacity
            );
        }
        Ok(restored)
    }
}

/// Dead-letter worker: drains the retry queue one payment at a time.
pub struct RetryEngine {
    gateway: Arc<dyn ProcessorClient>,
    store: Arc<dyn PaymentStore>,
    health: HealthMonitor,
    policy: RetryPolicy,
    inbox: mpsc::UnboundedReceiver<QueuedRetry>,
    backlog: VecDeque<QueuedRetry>,
}

impl RetryEngine {
    pub fn new(
        gateway: Arc<dyn ProcessorClient>,
        store: Arc<dyn PaymentStore>,
        health: HealthMonitor,
        policy: RetryPolicy,
    ) -> (RetryEngine, RetryQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = RetryQueue {
            tx,
            slots: Arc::new(Semaphore::new(policy.capacity)),
            overflow: Arc::new(AtomicUsize::new(0)),
            capacity: policy.capacity,
            enqueue_timeout: policy.enqueue_timeout,
        };

        let engine = RetryEngine {
            gateway,
            store,
            health,
            policy,
            inbox: rx,
            backlog: VecDeque::new(),
        };
        (engine, queue)
    }

    /// Runs until shutdown is signalled (or its sender dropped) and the queue
    /// is empty, or until every producer is gone. Anything still queued when
    /// the task is dropped stays unsettled in storage and is picked up by
    /// `RetryQueue::restore`.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            while let Ok(item) = self.inbox.try_recv() {
                self.backlog.push_back(item);
            }

            let mut item = match self.backlog.pop_front() {
                Some(item) => item,
                None => {
                    if *shutdown.borrow() {
                        tracing::info!("retry queue drained, retry engine stopping");
                        return;
                    }
                    tokio::select! {
                        received = self.inbox.recv() => match received {
                            Some(item) => item,
                            None => return,
                        },
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                tracing::info!("shutdown sender gone, retry engine stopping");
                                return;
                            }
                            continue;
                        }
                    }
                }
            };

            match self.process_one(&mut item.retry, Utc::now()).await {
                RetryDirective::Settled => {
                    tracing::debug!(
                        correlation_id = %item.retry.payment.correlation_id,
                        failures = item.retry.failure_count,
                        "retried payment settled"
                    );
                }
                RetryDirective::RetryNow => {
                    self.backlog.push_back(item);
                    tokio::task::yield_now().await;
                }
                RetryDirective::Backoff => {
                    self.backlog.push_back(item);
                    tokio::time::sleep(self.policy.backoff).await;
                }
            }
        }
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Applies the failover policy to one queued payment.
    pub async fn process_one(&self, retry: &mut PaymentRetry, now: DateTime<Utc>) -> RetryDirective {
        if let Some(processor) = retry.delivered_via {
            return self.settle_delivered(retry, processor).await;
        }

        let health = self.health.get_health();

        if health.default.is_healthy() {
            return self.attempt(retry, Processor::Default).await;
        }

        let age = retry.payment.age_at(now).to_std().unwrap_or(Duration::ZERO);
        if age < self.policy.max_age_in_queue {
            return RetryDirective::Backoff;
        }

        if health.fallback.is_healthy() {
            return self.attempt(retry, Processor::Fallback).await;
        }

        tracing::debug!(
            correlation_id = %retry.payment.correlation_id,
            "both processors failing, payment stays queued"
        );
        RetryDirective::Backoff
    }

    async fn attempt(&self, retry: &mut PaymentRetry, processor: Processor) -> RetryDirective {
        let write_ahead = match self.store.claim(&retry.payment, processor).await {
            Ok(Claim::Claimed(write_ahead)) => write_ahead,
            Ok(Claim::AlreadySettled) => return RetryDirective::Settled,
            Err(e) => {
                tracing::warn!(
                    correlation_id = %retry.payment.correlation_id,
                    %processor,
                    "write-ahead insert failed: {:#}",
                    e
                );
                return RetryDirective::RetryNow;
            }
        };

        let delivery = self
            .gateway
            .submit_payment(processor, &retry.payment, Some(self.policy.retry_call_timeout))
            .await;

        match delivery {
            Ok(_) => match self.store.commit(write_ahead).await {
                Ok(()) => RetryDirective::Settled,
                Err(e) => {
                    tracing::error!(
                        correlation_id = %retry.payment.correlation_id,
                        %processor,
                        "payment delivered but commit failed: {:#}",
                        e
                    );
                    retry.delivered_via = Some(processor);
                    RetryDirective::RetryNow
                }
            },
            Err(e) => {
                let reason = FailureReason::classify(&e);
                retry.record_failure(processor, reason);
                tracing::warn!(
                    correlation_id = %retry.payment.correlation_id,
                    %processor,
                    failures = retry.failure_count,
                    reason = reason.as_str(),
                    "retry attempt failed: {}",
                    e
                );

                if let Err(e) = self.store.rollback(write_ahead).await {
                    tracing::error!(
                        correlation_id = %retry.payment.correlation_id,
                        "rollback of write-ahead record failed: {:#}",
                        e
                    );
                }
                RetryDirective::Backoff
            }
        }
    }

    async fn settle_delivered(&self, retry: &mut PaymentRetry, processor: Processor) -> RetryDirective {
        let settled = match self.store.claim(&retry.payment, processor).await {
            Ok(Claim::Claimed(write_ahead)) => self.store.commit(write_ahead).await,
            Ok(Claim::AlreadySettled) => Ok(()),
            Err(e) => Err(e),
        };

        match settled {
            Ok(()) => RetryDirective::Settled,
            Err(e) => {
                tracing::warn!(
                    correlation_id = %retry.payment.correlation_id,
                    %processor,
                    "settling delivered payment failed: {:#}",
                    e
                );
                RetryDirective::RetryNow
            }
        }
    }
}

/// Waits up to `grace` for the engine task to drain, then aborts it so no
/// further claims or processor calls happen. Returns whether it drained.
pub async fn drain_or_abort(mut handle: JoinHandle<()>, grace: Duration) -> bool {
    if tokio::time::timeout(grace, &mut handle).await.is_ok() {
        return true;
    }

    handle.abort();
    let _ = handle.await;
    false
}
