use crate::domain::payment::{
    CreatePaymentRequest, FailureReason, Payment, PaymentRetry, PaymentSummary, SummaryRange,
};
use crate::domain::processor::Processor;
use crate::error::{GatewayError, Result};
use crate::gateways::{ProcessorClient, ProcessorTimeouts};
use crate::repo::PaymentStore;
use crate::service::retry_engine::RetryQueue;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Accepted by the default processor on the first attempt.
    Processed,
    /// Stored as pending and handed to the retry engine.
    Queued,
}

#[derive(Clone)]
pub struct PaymentService {
    pub gateway: Arc<dyn ProcessorClient>,
    pub store: Arc<dyn PaymentStore>,
    pub retry_queue: RetryQueue,
}

impl PaymentService {
    pub fn new(gateway: Arc<dyn ProcessorClient>, store: Arc<dyn PaymentStore>, retry_queue: RetryQueue) -> Self {
        Self {
            gateway,
            store,
            retry_queue,
        }
    }

    /// One synchronous attempt against the default processor, then either a
    /// processed record or a pending record plus a queued retry.
    ///
    /// Processor failures never reach the caller. Persistence failures do,
    /// and in that case nothing is queued.
    pub async fn submit(&self, req: CreatePaymentRequest) -> Result<SubmitOutcome> {
        let payment = Payment::from_request(req, Utc::now())?;

        let first_attempt = self
            .gateway
            .submit_payment(Processor::Default, &payment, None)
            .await;

        let err = match first_attempt {
            Ok(_) => {
                self.store
                    .record_processed(&payment, Processor::Default)
                    .await
                    .map_err(GatewayError::persistence)?;
                return Ok(SubmitOutcome::Processed);
            }
            Err(e) if e.is_processor_failure() => e,
            Err(e) => return Err(e),
        };

        tracing::debug!(
            correlation_id = %payment.correlation_id,
            "first attempt failed, queueing retry: {}",
            err
        );

        let slot = self.retry_queue.reserve().await?;
        self.store
            .record_pending(&payment)
            .await
            .map_err(GatewayError::persistence)?;

        let mut retry = PaymentRetry::new(payment);
        retry.record_failure(Processor::Default, FailureReason::classify(&err));
        slot.push(retry)?;

        Ok(SubmitOutcome::Queued)
    }

    pub async fn summary(&self, range: SummaryRange) -> Result<PaymentSummary> {
        self.store.summary(range).await.map_err(GatewayError::persistence)
    }

    /// Purges both processors, then local records. Stops at the first failing
    /// processor so local data is never truncated on a partial purge.
    pub async fn purge_all(&self) -> Result<()> {
        for processor in Processor::ALL {
            self.gateway.purge(processor).await.map_err(|e| {
                tracing::warn!(%processor, "purge aborted: {}", e);
                e
            })?;
        }

        self.store.purge().await.map_err(GatewayError::persistence)?;
        tracing::info!("payments purged");
        Ok(())
    }

    pub async fn set_timeout(&self, processor: &str, timeout: Duration) -> Result<ProcessorTimeouts> {
        let processor: Processor = processor.parse()?;
        self.gateway.set_timeout(processor, timeout).await;
        Ok(self.gateway.timeouts().await)
    }

    pub async fn timeouts(&self) -> ProcessorTimeouts {
        self.gateway.timeouts().await
    }

    pub async fn ping_store(&self) -> bool {
        self.store.ping().await.is_ok()
    }
}
