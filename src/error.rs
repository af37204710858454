use crate::domain::processor::Processor;
use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid processor: {0}")]
    InvalidProcessor(String),

    #[error("invalid payment: {0}")]
    InvalidPayment(String),

    #[error("transport error calling {processor} processor: {message}")]
    Transport {
        processor: Processor,
        message: String,
        timed_out: bool,
    },

    #[error("{processor} processor rejected request with status {status}")]
    ProcessorRejected { processor: Processor, status: u16 },

    #[error("persistence error: {0:#}")]
    Persistence(anyhow::Error),

    #[error("retry queue is full")]
    QueueFull,
}

impl GatewayError {
    pub fn persistence(err: impl Into<anyhow::Error>) -> Self {
        GatewayError::Persistence(err.into())
    }

    /// True for failures caused by the processor itself (unreachable, slow or
    /// answering with an error status).
    pub fn is_processor_failure(&self) -> bool {
        matches!(
            self,
            GatewayError::Transport { .. } | GatewayError::ProcessorRejected { .. }
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::InvalidProcessor(_) => StatusCode::BAD_REQUEST,
            GatewayError::InvalidPayment(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::Transport { .. } | GatewayError::ProcessorRejected { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            GatewayError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;
