use crate::domain::health::ProcessorHealth;
use crate::domain::payment::{Payment, PaymentSummary, StoredPayment, SummaryRange};
use crate::domain::processor::Processor;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod health_repo;
pub mod in_memory;
pub mod payments_repo;
pub mod redis_store;

/// A payment claimed for delivery through `processor`. Must be finished with
/// exactly one of `PaymentStore::commit` or `PaymentStore::rollback`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAhead {
    pub correlation_id: String,
    pub processor: Processor,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    Claimed(WriteAhead),
    AlreadySettled,
}

/// Durable payment records.
///
/// Delivery through the retry path is a saga: `claim` writes the record ahead
/// of the external call as `IN_FLIGHT`, then `commit` settles it as
/// `PROCESSED` or `rollback` returns it to `PENDING`. Only `PROCESSED`
/// records count towards the summary.
#[async_trait::async_trait]
pub trait PaymentStore: Send + Sync {
    async fn record_processed(&self, payment: &Payment, processor: Processor) -> Result<()>;

    async fn record_pending(&self, payment: &Payment) -> Result<()>;

    async fn claim(&self, payment: &Payment, processor: Processor) -> Result<Claim>;

    async fn commit(&self, write_ahead: WriteAhead) -> Result<()>;

    async fn rollback(&self, write_ahead: WriteAhead) -> Result<()>;

    /// Records not yet `PROCESSED`, oldest first.
    async fn unsettled(&self) -> Result<Vec<StoredPayment>>;

    async fn summary(&self, range: SummaryRange) -> Result<PaymentSummary>;

    async fn purge(&self) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedHealth {
    pub processor: Processor,
    #[serde(flatten)]
    pub health: ProcessorHealth,
    pub updated_at: DateTime<Utc>,
}

/// One row per processor, written by the health monitor for external readers.
#[async_trait::async_trait]
pub trait HealthStore: Send + Sync {
    async fn save(&self, processor: Processor, health: &ProcessorHealth) -> Result<()>;

    async fn load(&self) -> Result<Vec<PersistedHealth>>;
}
