//! API error types
//!
//! Internal details stay in the logs; clients get a stable message and
//! status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use funnel_fulfillment::FulfillmentError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Invalid webhook signature")]
    InvalidSignature,
    #[error("Malformed request: {0}")]
    BadRequest(String),
    #[error("Rate limited, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: i64 },
    #[error("Service not configured: {0}")]
    NotConfigured(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Database error")]
    Database(#[from] sqlx::Error),
    #[error("Upstream provider error: {0}")]
    Provider(String),
}

impl From<FulfillmentError> for ApiError {
    fn from(e: FulfillmentError) -> Self {
        match e {
            FulfillmentError::SignatureInvalid => ApiError::InvalidSignature,
            FulfillmentError::MalformedPayload(msg) | FulfillmentError::MissingField(msg) => {
                ApiError::BadRequest(msg)
            }
            FulfillmentError::Provider(msg) => ApiError::Provider(msg),
            other => ApiError::Provider(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::InvalidSignature => {
                (StatusCode::UNAUTHORIZED, "Invalid signature".to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::RateLimited {
                retry_after_seconds,
            } => {
                let body = Json(json!({
                    "error": "Too many requests",
                    "retry_after_seconds": retry_after_seconds,
                    "code": 429,
                }));
                return (StatusCode::TOO_MANY_REQUESTS, body).into_response();
            }
            ApiError::NotConfigured(what) => {
                tracing::error!(service = %what, "Request hit an unconfigured service");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service unavailable".to_string(),
                )
            }
            ApiError::Config(msg) => {
                tracing::error!(error = %msg, "Configuration error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            ApiError::Provider(msg) => {
                tracing::error!(error = %msg, "Upstream provider error");
                (StatusCode::BAD_GATEWAY, "Upstream error".to_string())
            }
        };

        let body = Json(json!({
            "error": message,
            "code": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
