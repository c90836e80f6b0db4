//! Fulfillment error types

use thiserror::Error;

pub type FulfillmentResult<T> = Result<T, FulfillmentError>;

#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// Signature did not match the raw body. Callers answer 401 and must
    /// not log payload contents.
    #[error("webhook signature verification failed")]
    SignatureInvalid,

    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    /// Amount below the lowest product tier. Indicates pricing/config
    /// drift, flagged for manual review rather than silently ignored.
    #[error("no product tier matches amount {amount_paise} paise")]
    UnmatchedAmount { amount_paise: i64 },

    #[error("database error: {0}")]
    Database(String),

    #[error("payment provider error: {0}")]
    Provider(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<sqlx::Error> for FulfillmentError {
    fn from(e: sqlx::Error) -> Self {
        FulfillmentError::Database(e.to_string())
    }
}
