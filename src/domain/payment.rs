use crate::domain::processor::Processor;
use crate::error::GatewayError;
use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Inbound payload as sent by clients.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentRequest {
    pub correlation_id: String,
    pub amount: Decimal,
}

/// A payment accepted by the gateway. `requested_at` is stamped at ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payment {
    pub correlation_id: String,
    pub amount_cents: i64,
    pub requested_at: DateTime<Utc>,
}

impl Payment {
    pub fn from_request(req: CreatePaymentRequest, requested_at: DateTime<Utc>) -> Result<Self, GatewayError> {
        if req.correlation_id.trim().is_empty() {
            return Err(GatewayError::InvalidPayment("correlationId is required".to_string()));
        }
        if req.amount <= Decimal::ZERO {
            return Err(GatewayError::InvalidPayment("amount must be positive".to_string()));
        }

        Ok(Self {
            correlation_id: req.correlation_id,
            amount_cents: to_cents(req.amount)?,
            requested_at,
        })
    }

    pub fn amount(&self) -> Decimal {
        from_cents(self.amount_cents)
    }

    /// Body for `POST {processor}/payments`.
    pub fn to_processor_body(&self) -> ProcessorPaymentRequest {
        ProcessorPaymentRequest {
            correlation_id: self.correlation_id.clone(),
            amount: self.amount(),
            requested_at: self.requested_at,
        }
    }

    pub fn age_at(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.requested_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorPaymentRequest {
    pub correlation_id: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub requested_at: DateTime<Utc>,
}

pub fn to_cents(amount: Decimal) -> Result<i64, GatewayError> {
    let out_of_range = || GatewayError::InvalidPayment(format!("amount {amount} out of range"));
    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .ok_or_else(out_of_range)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or_else(out_of_range)
}

pub fn from_cents(cents: i64) -> Decimal {
    Decimal::new(cents, 2)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    ProcessorError,
    ProcessorTimeout,
}

impl FailureReason {
    /// A processor that answered with an error status counts as
    /// `ProcessorTimeout`; anything that never produced a response is a
    /// `ProcessorError`.
    pub fn classify(err: &GatewayError) -> Self {
        match err {
            GatewayError::ProcessorRejected { .. } => FailureReason::ProcessorTimeout,
            _ => FailureReason::ProcessorError,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::ProcessorError => "processor_error",
            FailureReason::ProcessorTimeout => "processor_timeout",
        }
    }
}

/// A payment whose first delivery attempt failed, owned by the retry engine while queued.
#[derive(Debug, Clone)]
pub struct PaymentRetry {
    pub payment: Payment,
    pub failure_count: u32,
    pub last_processor_used: Option<Processor>,
    pub last_failure_reason: Option<FailureReason>,
    /// Set when a processor accepted the payment but the record could not be
    /// settled; the next attempt only finishes the bookkeeping.
    pub delivered_via: Option<Processor>,
}

impl PaymentRetry {
    pub fn new(payment: Payment) -> Self {
        Self {
            payment,
            failure_count: 0,
            last_processor_used: None,
            last_failure_reason: None,
            delivered_via: None,
        }
    }

    pub fn record_failure(&mut self, processor: Processor, reason: FailureReason) {
        self.failure_count += 1;
        self.last_processor_used = Some(processor);
        self.last_failure_reason = Some(reason);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    InFlight,
    Processed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::InFlight => "IN_FLIGHT",
            PaymentStatus::Processed => "PROCESSED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(PaymentStatus::Pending),
            "IN_FLIGHT" => Some(PaymentStatus::InFlight),
            "PROCESSED" => Some(PaymentStatus::Processed),
            _ => None,
        }
    }
}

/// A persisted payment record as read back from storage.
#[derive(Debug, Clone)]
pub struct StoredPayment {
    pub payment: Payment,
    pub processor_used: Option<Processor>,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct SummaryRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl SummaryRange {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from.map_or(true, |from| at >= from) && self.to.map_or(true, |to| at <= to)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorSummary {
    pub total_requests: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_amount: Decimal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PaymentSummary {
    pub default: ProcessorSummary,
    pub fallback: ProcessorSummary,
}

impl PaymentSummary {
    pub fn add(&mut self, processor: Processor, requests: i64, amount_cents: i64) {
        let bucket = match processor {
            Processor::Default => &mut self.default,
            Processor::Fallback => &mut self.fallback,
        };
        bucket.total_requests += requests;
        bucket.total_amount += from_cents(amount_cents);
    }
}
