use crate::domain::health::HealthSample;
use crate::domain::processor::Processor;
use crate::error::GatewayError;
use crate::gateways::{ProcessorClient, ProcessorResponse, ProcessorTimeouts, HEALTH_PATH};
use reqwest::Method;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    AlwaysSuccess,
    AlwaysReject(u16),
    AlwaysUnreachable,
    AlwaysTimeout,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub processor: Processor,
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub timeout_override: Option<Duration>,
}

#[derive(Debug, Clone, Copy)]
struct Script {
    behavior: MockBehavior,
    health: Option<HealthSample>,
}

/// Scripted in-process processor pair. Health endpoint answers come from
/// `set_health` (or fail as unreachable when unset); every other path follows
/// the processor's `MockBehavior`.
pub struct MockProcessorClient {
    scripts: Mutex<HashMap<Processor, Script>>,
    calls: Mutex<Vec<RecordedCall>>,
    timeouts: Mutex<ProcessorTimeouts>,
}

impl Default for MockProcessorClient {
    fn default() -> Self {
        Self::new(MockBehavior::AlwaysSuccess, MockBehavior::AlwaysSuccess)
    }
}

impl MockProcessorClient {
    pub fn new(default: MockBehavior, fallback: MockBehavior) -> Self {
        let mut scripts = HashMap::new();
        scripts.insert(Processor::Default, Script { behavior: default, health: None });
        scripts.insert(Processor::Fallback, Script { behavior: fallback, health: None });
        Self {
            scripts: Mutex::new(scripts),
            calls: Mutex::new(Vec::new()),
            timeouts: Mutex::new(ProcessorTimeouts::default()),
        }
    }

    pub fn set_behavior(&self, processor: Processor, behavior: MockBehavior) {
        if let Ok(mut scripts) = self.scripts.lock() {
            if let Some(s) = scripts.get_mut(&processor) {
                s.behavior = behavior;
            }
        }
    }

    pub fn set_health(&self, processor: Processor, health: Option<HealthSample>) {
        if let Ok(mut scripts) = self.scripts.lock() {
            if let Some(s) = scripts.get_mut(&processor) {
                s.health = health;
            }
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_to(&self, processor: Processor, path: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.processor == processor && c.path == path)
            .count()
    }

    fn script(&self, processor: Processor) -> Option<Script> {
        self.scripts.lock().ok().and_then(|s| s.get(&processor).copied())
    }
}

#[async_trait::async_trait]
impl ProcessorClient for MockProcessorClient {
    async fn set_timeout(&self, processor: Processor, timeout: Duration) {
        if let Ok(mut timeouts) = self.timeouts.lock() {
            match processor {
                Processor::Default => timeouts.default = timeout,
                Processor::Fallback => timeouts.fallback = timeout,
            }
        }
    }

    async fn timeouts(&self) -> ProcessorTimeouts {
        self.timeouts.lock().map(|t| *t).unwrap_or_default()
    }

    async fn call(
        &self,
        processor: Processor,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        timeout_override: Option<Duration>,
    ) -> Result<ProcessorResponse, GatewayError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(RecordedCall {
                processor,
                method,
                path: path.to_string(),
                body,
                timeout_override,
            });
        }

        let script = self.script(processor).ok_or_else(|| GatewayError::Transport {
            processor,
            message: "mock processor not configured".to_string(),
            timed_out: false,
        })?;

        if path == HEALTH_PATH {
            return match script.health {
                Some(sample) => Ok(ProcessorResponse {
                    status: 200,
                    body: serde_json::to_string(&sample).unwrap_or_default(),
                }),
                None => Err(GatewayError::Transport {
                    processor,
                    message: "mock health endpoint unreachable".to_string(),
                    timed_out: false,
                }),
            };
        }

        match script.behavior {
            MockBehavior::AlwaysSuccess => Ok(ProcessorResponse {
                status: 200,
                body: r#"{"message":"payment processed successfully"}"#.to_string(),
            }),
            MockBehavior::AlwaysReject(status) => Err(GatewayError::ProcessorRejected { processor, status }),
            MockBehavior::AlwaysUnreachable => Err(GatewayError::Transport {
                processor,
                message: "mock connection refused".to_string(),
                timed_out: false,
            }),
            MockBehavior::AlwaysTimeout => Err(GatewayError::Transport {
                processor,
                message: "mock timeout".to_string(),
                timed_out: true,
            }),
        }
    }
}
