//! Notifier adapters for fulfillment fan-out
//!
//! Each adapter wraps one downstream collaborator (Zapier, Meta CAPI, the
//! payments table). Expected failure modes come back as `NotifyError`
//! values so the retry engine can classify them; adapters never panic on a
//! downstream problem. An adapter whose credentials are absent is
//! constructed disabled and turns `send` into a logged no-op.

mod database;
mod meta_capi;
mod zapier;

pub use database::DatabaseNotifier;
pub use meta_capi::MetaCapiNotifier;
pub use zapier::ZapierNotifier;

use serde::Serialize;
use thiserror::Error;

use crate::products::{DeliveryFlags, ProductId};

/// Payload handed to every adapter after product detection
#[derive(Debug, Clone, Serialize)]
pub struct FulfillmentPayload {
    pub event_id: String,
    pub event_type: String,
    pub payment_id: String,
    pub order_id: String,
    pub amount_paise: i64,
    pub currency: String,
    pub email: Option<String>,
    pub contact: Option<String>,
    pub notes: serde_json::Value,
    pub products: Vec<ProductId>,
    pub flags: DeliveryFlags,
}

/// Failure modes an adapter can report
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Connection-level failure (refused, reset, DNS, client-side timeout)
    #[error("request failed: {0}")]
    Transport(String),

    /// Downstream answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Attempt exceeded the retry engine's per-attempt budget
    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    #[error("database error: {0}")]
    Database(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

impl From<reqwest::Error> for NotifyError {
    fn from(e: reqwest::Error) -> Self {
        NotifyError::Transport(e.to_string())
    }
}

/// Retry classification for a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Terminal,
}

/// Classify an error as retryable or terminal.
///
/// Retryable: transport failures, timeouts, HTTP 5xx, 408/423/429, and
/// rate-limit/quota/throttle messages. Everything else (validation, other
/// 4xx) propagates immediately without consuming the retry budget.
pub fn classify(error: &NotifyError) -> ErrorClass {
    match error {
        NotifyError::Transport(_) | NotifyError::Timeout(_) => ErrorClass::Retryable,
        NotifyError::Status { status, body } => {
            if *status >= 500 || matches!(status, 408 | 423 | 429) {
                ErrorClass::Retryable
            } else if is_rate_limit_message(body) {
                ErrorClass::Retryable
            } else {
                ErrorClass::Terminal
            }
        }
        NotifyError::Database(message) => {
            if message.contains("connection") || message.contains("timed out") {
                ErrorClass::Retryable
            } else {
                ErrorClass::Terminal
            }
        }
        NotifyError::InvalidPayload(_) => ErrorClass::Terminal,
    }
}

fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit")
        || lower.contains("rate_limit")
        || lower.contains("quota")
        || lower.contains("throttl")
}
