use crate::domain::health::ProcessorHealth;
use crate::domain::payment::{Payment, PaymentStatus, PaymentSummary, StoredPayment, SummaryRange};
use crate::domain::processor::Processor;
use crate::repo::{Claim, HealthStore, PaymentStore, PersistedHealth, WriteAhead};
use anyhow::{bail, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Process-local store for tests and storage-less runs.
///
/// `set_unavailable(true)` makes every payment write fail, which is how tests
/// exercise the persistence-failure paths.
#[derive(Default, Clone)]
pub struct InMemoryStore {
    payments: Arc<RwLock<HashMap<String, StoredPayment>>>,
    health: Arc<RwLock<HashMap<Processor, PersistedHealth>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn get(&self, correlation_id: &str) -> Option<StoredPayment> {
        self.payments.read().await.get(correlation_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.payments.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.payments.read().await.is_empty()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            bail!("in-memory store unavailable");
        }
        Ok(())
    }

    async fn insert_new(&self, payment: &Payment, processor: Option<Processor>, status: PaymentStatus) -> Result<()> {
        self.check_available()?;
        let mut payments = self.payments.write().await;
        if payments.contains_key(&payment.correlation_id) {
            bail!("payment {} already recorded", payment.correlation_id);
        }
        payments.insert(
            payment.correlation_id.clone(),
            StoredPayment {
                payment: payment.clone(),
                processor_used: processor,
                status,
            },
        );
        Ok(())
    }
}

#[async_trait::async_trait]
impl PaymentStore for InMemoryStore {
    async fn record_processed(&self, payment: &Payment, processor: Processor) -> Result<()> {
        self.insert_new(payment, Some(processor), PaymentStatus::Processed).await
    }

    async fn record_pending(&self, payment: &Payment) -> Result<()> {
        self.insert_new(payment, None, PaymentStatus::Pending).await
    }

    async fn claim(&self, payment: &Payment, processor: Processor) -> Result<Claim> {
        self.check_available()?;
        let mut payments = self.payments.write().await;

        if let Some(existing) = payments.get(&payment.correlation_id) {
            if existing.status == PaymentStatus::Processed {
                return Ok(Claim::AlreadySettled);
            }
        }

        payments.insert(
            payment.correlation_id.clone(),
            StoredPayment {
                payment: payment.clone(),
                processor_used: Some(processor),
                status: PaymentStatus::InFlight,
            },
        );

        Ok(Claim::Claimed(WriteAhead {
            correlation_id: payment.correlation_id.clone(),
            processor,
        }))
    }

    async fn commit(&self, write_ahead: WriteAhead) -> Result<()> {
        self.check_available()?;
        let mut payments = self.payments.write().await;
        match payments.get_mut(&write_ahead.correlation_id) {
            Some(p) if p.status == PaymentStatus::InFlight && p.processor_used == Some(write_ahead.processor) => {
                p.status = PaymentStatus::Processed;
                Ok(())
            }
            _ => bail!("no in-flight record for {}", write_ahead.correlation_id),
        }
    }

    async fn rollback(&self, write_ahead: WriteAhead) -> Result<()> {
        self.check_available()?;
        let mut payments = self.payments.write().await;
        if let Some(p) = payments.get_mut(&write_ahead.correlation_id) {
            if p.status == PaymentStatus::InFlight {
                p.status = PaymentStatus::Pending;
                p.processor_used = None;
            }
        }
        Ok(())
    }

    async fn unsettled(&self) -> Result<Vec<StoredPayment>> {
        let payments = self.payments.read().await;
        let mut out: Vec<StoredPayment> = payments
            .values()
            .filter(|p| p.status != PaymentStatus::Processed)
            .cloned()
            .collect();
        out.sort_by_key(|p| p.payment.requested_at);
        Ok(out)
    }

    async fn summary(&self, range: SummaryRange) -> Result<PaymentSummary> {
        let payments = self.payments.read().await;
        let mut summary = PaymentSummary::default();
        for p in payments.values() {
            if p.status != PaymentStatus::Processed || !range.contains(p.payment.requested_at) {
                continue;
            }
            if let Some(processor) = p.processor_used {
                summary.add(processor, 1, p.payment.amount_cents);
            }
        }
        Ok(summary)
    }

    async fn purge(&self) -> Result<()> {
        self.check_available()?;
        self.payments.write().await.clear();
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        self.check_available()
    }
}

#[async_trait::async_trait]
impl HealthStore for InMemoryStore {
    async fn save(&self, processor: Processor, health: &ProcessorHealth) -> Result<()> {
        self.health.write().await.insert(
            processor,
            PersistedHealth {
                processor,
                health: *health,
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn load(&self) -> Result<Vec<PersistedHealth>> {
        let health = self.health.read().await;
        let mut out: Vec<PersistedHealth> = health.values().copied().collect();
        out.sort_by_key(|h| h.processor.as_str());
        Ok(out)
    }
}
