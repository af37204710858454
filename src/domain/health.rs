use crate::domain::processor::Processor;
use serde::{Deserialize, Serialize};

/// Body of `GET {processor}/payments/service-health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSample {
    pub failing: bool,
    pub min_response_time: i64,
}

/// Latest observed health of one processor.
///
/// Replaced wholesale on every successful sample so readers never see a mix
/// of old and new fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorHealth {
    pub failing: bool,
    pub min_response_time: i64,
    pub falling_cycles: i64,
}

impl ProcessorHealth {
    pub fn apply_sample(self, sample: HealthSample) -> ProcessorHealth {
        let falling_cycles = if sample.failing {
            self.falling_cycles + 1
        } else {
            0
        };

        ProcessorHealth {
            failing: sample.failing,
            min_response_time: sample.min_response_time,
            falling_cycles,
        }
    }

    pub fn is_healthy(&self) -> bool {
        !self.failing
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthSnapshot {
    pub default: ProcessorHealth,
    pub fallback: ProcessorHealth,
}

impl HealthSnapshot {
    pub fn get(&self, processor: Processor) -> ProcessorHealth {
        match processor {
            Processor::Default => self.default,
            Processor::Fallback => self.fallback,
        }
    }

    pub fn set(&mut self, processor: Processor, health: ProcessorHealth) {
        match processor {
            Processor::Default => self.default = health,
            Processor::Fallback => self.fallback = health,
        }
    }
}
