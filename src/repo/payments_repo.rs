use crate::domain::payment::{Payment, PaymentStatus, PaymentSummary, StoredPayment, SummaryRange};
use crate::domain::processor::Processor;
use crate::repo::{Claim, PaymentStore, WriteAhead};
use anyhow::{anyhow, bail, Result};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

#[derive(Clone)]
pub struct PaymentsRepo {
    pub pool: PgPool,
}

impl PaymentsRepo {
    async fn insert(&self, payment: &Payment, processor: Option<Processor>, status: PaymentStatus) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (correlation_id, amount_cents, processor_used, status, requested_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&payment.correlation_id)
        .bind(payment.amount_cents)
        .bind(processor.map(|p| p.as_str()))
        .bind(status.as_str())
        .bind(payment.requested_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn stored_from_row(r: &PgRow) -> Result<StoredPayment> {
    let status: String = r.get("status");
    let processor: Option<String> = r.get("processor_used");
    Ok(StoredPayment {
        payment: Payment {
            correlation_id: r.get("correlation_id"),
            amount_cents: r.get("amount_cents"),
            requested_at: r.get("requested_at"),
        },
        processor_used: processor.map(|p| p.parse::<Processor>()).transpose()?,
        status: PaymentStatus::parse(&status).ok_or_else(|| anyhow!("unknown payment status {status}"))?,
    })
}

#[async_trait::async_trait]
impl PaymentStore for PaymentsRepo {
    async fn record_processed(&self, payment: &Payment, processor: Processor) -> Result<()> {
        self.insert(payment, Some(processor), PaymentStatus::Processed).await
    }

    async fn record_pending(&self, payment: &Payment) -> Result<()> {
        self.insert(payment, None, PaymentStatus::Pending).await
    }

    async fn claim(&self, payment: &Payment, processor: Processor) -> Result<Claim> {
        let mut tx = self.pool.begin().await?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM payments WHERE correlation_id = $1 FOR UPDATE")
                .bind(&payment.correlation_id)
                .fetch_optional(tx.as_mut())
                .await?;

        if current.as_deref() == Some(PaymentStatus::Processed.as_str()) {
            tx.rollback().await?;
            return Ok(Claim::AlreadySettled);
        }

        sqlx::query(
            r#"
            INSERT INTO payments (correlation_id, amount_cents, processor_used, status, requested_at)
            VALUES ($1, $2, $3, 'IN_FLIGHT', $4)
            ON CONFLICT (correlation_id) DO UPDATE
            SET processor_used = EXCLUDED.processor_used, status = 'IN_FLIGHT', updated_at = now()
            "#,
        )
        .bind(&payment.correlation_id)
        .bind(payment.amount_cents)
        .bind(processor.as_str())
        .bind(payment.requested_at)
        .execute(tx.as_mut())
        .await?;

        tx.commit().await?;

        Ok(Claim::Claimed(WriteAhead {
            correlation_id: payment.correlation_id.clone(),
            processor,
        }))
    }

    async fn commit(&self, write_ahead: WriteAhead) -> Result<()> {
        let res = sqlx::query(
            r#"
            UPDATE payments SET status = 'PROCESSED', updated_at = now()
            WHERE correlation_id = $1 AND processor_used = $2 AND status = 'IN_FLIGHT'
            "#,
        )
        .bind(&write_ahead.correlation_id)
        .bind(write_ahead.processor.as_str())
        .execute(&self.pool)
        .await?;

        if res.rows_affected() == 0 {
            bail!("no in-flight record for {}", write_ahead.correlation_id);
        }
        Ok(())
    }

    async fn rollback(&self, write_ahead: WriteAhead) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE payments SET status = 'PENDING', processor_used = NULL, updated_at = now()
            WHERE correlation_id = $1 AND status = 'IN_FLIGHT'
            "#,
        )
        .bind(&write_ahead.correlation_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn unsettled(&self) -> Result<Vec<StoredPayment>> {
        let rows = sqlx::query(
            r#"
            SELECT correlation_id, amount_cents, processor_used, status, requested_at
            FROM payments
            WHERE status <> 'PROCESSED'
            ORDER BY requested_at ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(stored_from_row).collect()
    }

    async fn summary(&self, range: SummaryRange) -> Result<PaymentSummary> {
        let rows = sqlx::query(
            r#"
            SELECT processor_used, COUNT(*) AS total_requests, COALESCE(SUM(amount_cents), 0)::BIGINT AS total_cents
            FROM payments
            WHERE status = 'PROCESSED'
              AND processor_used IS NOT NULL
              AND ($1::timestamptz IS NULL OR requested_at >= $1)
              AND ($2::timestamptz IS NULL OR requested_at <= $2)
            GROUP BY processor_used
            "#,
        )
        .bind(range.from)
        .bind(range.to)
        .fetch_all(&self.pool)
        .await?;

        let mut summary = PaymentSummary::default();
        for r in rows {
            let processor: String = r.get("processor_used");
            summary.add(processor.parse()?, r.get("total_requests"), r.get("total_cents"));
        }
        Ok(summary)
    }

    async fn purge(&self) -> Result<()> {
        sqlx::query("TRUNCATE TABLE payments").execute(&self.pool).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
