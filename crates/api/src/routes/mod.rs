//! Route registration

pub mod checkout;
pub mod health;
pub mod leads;
pub mod webhook;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/webhooks/razorpay", post(webhook::razorpay_webhook))
        .route("/api/leads", post(leads::capture_lead))
        .route("/api/checkout/order", post(checkout::create_order))
        .with_state(state)
}
