use crate::error::GatewayError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const PROCESSOR_DEFAULT: &str = "default";
pub const PROCESSOR_FALLBACK: &str = "fallback";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Processor {
    Default,
    Fallback,
}

impl Processor {
    pub const ALL: [Processor; 2] = [Processor::Default, Processor::Fallback];

    pub fn as_str(&self) -> &'static str {
        match self {
            Processor::Default => PROCESSOR_DEFAULT,
            Processor::Fallback => PROCESSOR_FALLBACK,
        }
    }
}

impl fmt::Display for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Processor {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            PROCESSOR_DEFAULT => Ok(Processor::Default),
            PROCESSOR_FALLBACK => Ok(Processor::Fallback),
            other => Err(GatewayError::InvalidProcessor(other.to_string())),
        }
    }
}
