use crate::domain::health::ProcessorHealth;
use crate::domain::payment::{Payment, PaymentStatus, PaymentSummary, StoredPayment, SummaryRange};
use crate::domain::processor::Processor;
use crate::repo::{Claim, HealthStore, PaymentStore, PersistedHealth, WriteAhead};
use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const PAYMENTS_KEY: &str = "payments";
const HEALTH_KEY: &str = "processor_health";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RedisPaymentRecord {
    amount_cents: i64,
    processor_used: Option<Processor>,
    status: PaymentStatus,
    requested_at: DateTime<Utc>,
}

impl RedisPaymentRecord {
    fn into_stored(self, correlation_id: String) -> StoredPayment {
        StoredPayment {
            payment: Payment {
                correlation_id,
                amount_cents: self.amount_cents,
                requested_at: self.requested_at,
            },
            processor_used: self.processor_used,
            status: self.status,
        }
    }
}

/// Key-value backend: every payment is one field of the `payments` hash,
/// keyed by correlation id. Saga transitions are read-modify-write and rely on
/// the retry engine being the single writer for unsettled records.
#[derive(Clone)]
pub struct RedisStore {
    pub client: redis::Client,
}

impl RedisStore {
    pub fn new(redis_url: &str) -> Result<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
        })
    }

    async fn read(&self, correlation_id: &str) -> Result<Option<RedisPaymentRecord>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.hget(PAYMENTS_KEY, correlation_id).await?;
        Ok(match raw {
            Some(p) => Some(serde_json::from_str(&p)?),
            None => None,
        })
    }

    async fn write(&self, correlation_id: &str, record: &RedisPaymentRecord) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(record)?;
        let _: () = conn.hset(PAYMENTS_KEY, correlation_id, payload).await?;
        Ok(())
    }

    async fn insert_new(&self, payment: &Payment, record: RedisPaymentRecord) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(&record)?;
        let inserted: bool = conn
            .hset_nx(PAYMENTS_KEY, &payment.correlation_id, payload)
            .await?;
        if !inserted {
            bail!("payment {} already recorded", payment.correlation_id);
        }
        Ok(())
    }

    async fn all(&self) -> Result<Vec<StoredPayment>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let entries: HashMap<String, String> = conn.hgetall(PAYMENTS_KEY).await?;

        let mut out = Vec::with_capacity(entries.len());
        for (correlation_id, payload) in entries {
            let record: RedisPaymentRecord = serde_json::from_str(&payload)?;
            out.push(record.into_stored(correlation_id));
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl PaymentStore for RedisStore {
    async fn record_processed(&self, payment: &Payment, processor: Processor) -> Result<()> {
        self.insert_new(
            payment,
            RedisPaymentRecord {
                amount_cents: payment.amount_cents,
                processor_used: Some(processor),
                status: PaymentStatus::Processed,
                requested_at: payment.requested_at,
            },
        )
        .await
    }

    async fn record_pending(&self, payment: &Payment) -> Result<()> {
        self.insert_new(
            payment,
            RedisPaymentRecord {
                amount_cents: payment.amount_cents,
                processor_used: None,
                status: PaymentStatus::Pending,
                requested_at: payment.requested_at,
            },
        )
        .await
    }

    async fn claim(&self, payment: &Payment, processor: Processor) -> Result<Claim> {
        if let Some(existing) = self.read(&payment.correlation_id).await? {
            if existing.status == PaymentStatus::Processed {
                return Ok(Claim::AlreadySettled);
            }
        }

        self.write(
            &payment.correlation_id,
            &RedisPaymentRecord {
                amount_cents: payment.amount_cents,
                processor_used: Some(processor),
                status: PaymentStatus::InFlight,
                requested_at: payment.requested_at,
            },
        )
        .await?;

        Ok(Claim::Claimed(WriteAhead {
            correlation_id: payment.correlation_id.clone(),
            processor,
        }))
    }

    async fn commit(&self, write_ahead: WriteAhead) -> Result<()> {
        let Some(mut record) = self.read(&write_ahead.correlation_id).await? else {
            bail!("no in-flight record for {}", write_ahead.correlation_id);
        };
        if record.status != PaymentStatus::InFlight || record.processor_used != Some(write_ahead.processor) {
            bail!("no in-flight record for {}", write_ahead.correlation_id);
        }

        record.status = PaymentStatus::Processed;
        self.write(&write_ahead.correlation_id, &record).await
    }

    async fn rollback(&self, write_ahead: WriteAhead) -> Result<()> {
        let Some(mut record) = self.read(&write_ahead.correlation_id).await? else {
            return Ok(());
        };
        if record.status != PaymentStatus::InFlight {
            return Ok(());
        }

        record.status = PaymentStatus::Pending;
        record.processor_used = None;
        self.write(&write_ahead.correlation_id, &record).await
    }

    async fn unsettled(&self) -> Result<Vec<StoredPayment>> {
        let mut out: Vec<StoredPayment> = self
            .all()
            .await?
            .into_iter()
            .filter(|p| p.status != PaymentStatus::Processed)
            .collect();
        out.sort_by_key(|p| p.payment.requested_at);
        Ok(out)
    }

    async fn summary(&self, range: SummaryRange) -> Result<PaymentSummary> {
        let mut summary = PaymentSummary::default();
        for p in self.all().await? {
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
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.del(PAYMENTS_KEY).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl HealthStore for RedisStore {
    async fn save(&self, processor: Processor, health: &ProcessorHealth) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(&PersistedHealth {
            processor,
            health: *health,
            updated_at: Utc::now(),
        })?;
        let _: () = conn.hset(HEALTH_KEY, processor.as_str(), payload).await?;
        Ok(())
    }

    async fn load(&self) -> Result<Vec<PersistedHealth>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let values: Vec<String> = conn.hvals(HEALTH_KEY).await?;

        let mut out = values
            .iter()
            .map(|v| serde_json::from_str::<PersistedHealth>(v))
            .collect::<Result<Vec<_>, _>>()?;
        out.sort_by_key(|h| h.processor.as_str());
        Ok(out)
    }
}
