use crate::domain::processor::Processor;
use crate::error::GatewayError;
use crate::gateways::{ProcessorClient, ProcessorResponse, ProcessorTimeouts, API_TOKEN_HEADER};
use reqwest::Method;
use std::time::Duration;
use tokio::sync::RwLock;

pub struct HttpProcessorGateway {
    pub default_url: String,
    pub fallback_url: String,
    pub api_token: String,
    pub client: reqwest::Client,
    timeouts: RwLock<ProcessorTimeouts>,
}

impl HttpProcessorGateway {
    pub fn new(default_url: String, fallback_url: String, api_token: String) -> Self {
        Self {
            default_url,
            fallback_url,
            api_token,
            client: reqwest::Client::new(),
            timeouts: RwLock::new(ProcessorTimeouts::default()),
        }
    }

    fn base_url(&self, processor: Processor) -> &str {
        match processor {
            Processor::Default => &self.default_url,
            Processor::Fallback => &self.fallback_url,
        }
    }
}

#[async_trait::async_trait]
impl ProcessorClient for HttpProcessorGateway {
    /// Applies to calls started after this returns; in-flight calls keep the
    /// timeout they read when they started.
    async fn set_timeout(&self, processor: Processor, timeout: Duration) {
        let mut timeouts = self.timeouts.write().await;
        match processor {
            Processor::Default => timeouts.default = timeout,
            Processor::Fallback => timeouts.fallback = timeout,
        }
        tracing::info!(%processor, timeout_ms = timeout.as_millis() as u64, "processor timeout updated");
    }

    async fn timeouts(&self) -> ProcessorTimeouts {
        *self.timeouts.read().await
    }

    async fn call(
        &self,
        processor: Processor,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        timeout_override: Option<Duration>,
    ) -> Result<ProcessorResponse, GatewayError> {
        let timeout = match timeout_override {
            Some(t) if !t.is_zero() => t,
            _ => self.timeouts.read().await.get(processor),
        };

        let url = format!("{}{}", self.base_url(processor), path);
        let mut req = self
            .client
            .request(method, url)
            .header(API_TOKEN_HEADER, &self.api_token)
            .timeout(timeout);
        if let Some(body) = body {
            req = req.json(&body);
        }

        let transport = |e: reqwest::Error| GatewayError::Transport {
            processor,
            message: e.to_string(),
            timed_out: e.is_timeout(),
        };

        let resp = req.send().await.map_err(transport)?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(transport)?;

        if status > 399 {
            tracing::debug!(%processor, status, path, "processor rejected request");
            return Err(GatewayError::ProcessorRejected { processor, status });
        }

        Ok(ProcessorResponse { status, body })
    }
}
