use crate::domain::health::{HealthSnapshot, ProcessorHealth};
use crate::domain::processor::Processor;
use crate::gateways::ProcessorClient;
use crate::repo::{HealthStore, PersistedHealth};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

pub const HEALTH_CHECK_INTERVAL: Duration = Duration::from_millis(5500);

/// Samples both processors' health endpoints on a fixed interval and keeps the
/// latest view in memory.
///
/// The snapshot starts as "not failing, zero cycles" so routing never waits
/// for the first sample. A failed sample leaves the previous value in place.
#[derive(Clone)]
pub struct HealthMonitor {
    gateway: Arc<dyn ProcessorClient>,
    store: Arc<dyn HealthStore>,
    state: Arc<watch::Sender<HealthSnapshot>>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(gateway: Arc<dyn ProcessorClient>, store: Arc<dyn HealthStore>) -> Self {
        let (tx, _) = watch::channel(HealthSnapshot::default());
        Self {
            gateway,
            store,
            state: Arc::new(tx),
            interval: HEALTH_CHECK_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Current in-memory view of both processors. Never touches I/O.
    pub fn get_health(&self) -> HealthSnapshot {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<HealthSnapshot> {
        self.state.subscribe()
    }

    /// Last snapshot written to durable storage, for external readers.
    pub async fn persisted(&self) -> Result<Vec<PersistedHealth>> {
        self.store.load().await
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    tracing::info!("health monitor stopping");
                    return;
                }
            }
        }
    }

    /// Samples both processors concurrently and returns the resulting snapshot.
    pub async fn tick(&self) -> HealthSnapshot {
        tokio::join!(
            self.sample(Processor::Default),
            self.sample(Processor::Fallback)
        );
        self.get_health()
    }

    async fn sample(&self, processor: Processor) -> Option<ProcessorHealth> {
        let sample = match self.gateway.service_health(processor).await {
            Ok(sample) => sample,
            Err(e) => {
                tracing::warn!(%processor, error = %e, "health check failed, keeping last known health");
                return None;
            }
        };

        let mut updated = ProcessorHealth::default();
        self.state.send_modify(|snapshot| {
            updated = snapshot.get(processor).apply_sample(sample);
            snapshot.set(processor, updated);
        });

        tracing::info!(
            %processor,
            failing = updated.failing,
            min_response_time = updated.min_response_time,
            falling_cycles = updated.falling_cycles,
            "processor health"
        );

        if let Err(e) = self.store.save(processor, &updated).await {
            tracing::error!(%processor, "error persisting processor health: {:#}", e);
        }

        Some(updated)
    }
}
