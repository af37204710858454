use crate::domain::health::HealthSample;
use crate::domain::payment::Payment;
use crate::domain::processor::Processor;
use crate::error::GatewayError;
use reqwest::Method;
use std::time::Duration;

pub mod http;
pub mod mock;

pub const PAYMENTS_PATH: &str = "/payments";
pub const HEALTH_PATH: &str = "/payments/service-health";
pub const PURGE_PATH: &str = "/admin/purge-payments";
pub const API_TOKEN_HEADER: &str = "X-Rinha-Token";

pub const DEFAULT_PROCESSOR_TIMEOUT: Duration = Duration::from_millis(500);
pub const FALLBACK_PROCESSOR_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessorTimeouts {
    pub default: Duration,
    pub fallback: Duration,
}

impl Default for ProcessorTimeouts {
    fn default() -> Self {
        Self {
            default: DEFAULT_PROCESSOR_TIMEOUT,
            fallback: FALLBACK_PROCESSOR_TIMEOUT,
        }
    }
}

impl ProcessorTimeouts {
    pub fn get(&self, processor: Processor) -> Duration {
        match processor {
            Processor::Default => self.default,
            Processor::Fallback => self.fallback,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessorResponse {
    pub status: u16,
    pub body: String,
}

/// Bounded-latency access to the two payment processors.
///
/// Implementations never retry. Connection failures and timeouts come back as
/// `GatewayError::Transport`, any status above 399 as `GatewayError::ProcessorRejected`.
#[async_trait::async_trait]
pub trait ProcessorClient: Send + Sync {
    async fn set_timeout(&self, processor: Processor, timeout: Duration);

    async fn timeouts(&self) -> ProcessorTimeouts;

    /// `timeout_override` of `None` (or zero) uses the processor's configured timeout.
    async fn call(
        &self,
        processor: Processor,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        timeout_override: Option<Duration>,
    ) -> Result<ProcessorResponse, GatewayError>;

    async fn call_named(
        &self,
        processor: &str,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        timeout_override: Option<Duration>,
    ) -> Result<ProcessorResponse, GatewayError> {
        let processor: Processor = processor.parse()?;
        self.call(processor, method, path, body, timeout_override).await
    }

    async fn submit_payment(
        &self,
        processor: Processor,
        payment: &Payment,
        timeout_override: Option<Duration>,
    ) -> Result<ProcessorResponse, GatewayError> {
        let body = serde_json::to_value(payment.to_processor_body()).map_err(|e| GatewayError::Transport {
            processor,
            message: format!("encode payment: {e}"),
            timed_out: false,
        })?;
        self.call(processor, Method::POST, PAYMENTS_PATH, Some(body), timeout_override)
            .await
    }

    async fn service_health(&self, processor: Processor) -> Result<HealthSample, GatewayError> {
        let resp = self
            .call(processor, Method::GET, HEALTH_PATH, None, None)
            .await?;
        serde_json::from_str(&resp.body).map_err(|e| GatewayError::Transport {
            processor,
            message: format!("decode health response: {e}"),
            timed_out: false,
        })
    }

    async fn purge(&self, processor: Processor) -> Result<(), GatewayError> {
        self.call(processor, Method::POST, PURGE_PATH, None, None)
            .await
            .map(|_| ())
    }
}
