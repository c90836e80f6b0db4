//! Checkout order creation
//!
//! The browser asks for a Razorpay order before opening the checkout
//! modal. The amount comes from the product tier table, never from the
//! client, so a tampered request cannot buy the course for a rupee.

use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use funnel_fulfillment::products;

use crate::error::{ApiError, ApiResult};
use crate::routes::leads::extract_client_ip;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    /// Tier price in paise; must match a configured product tier exactly
    pub amount_paise: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub contact: Option<String>,
    #[serde(default)]
    pub notes: Option<Value>,
}

pub async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CheckoutRequest>,
) -> ApiResult<Json<Value>> {
    let client_ip = extract_client_ip(&headers);
    let window = Duration::from_secs(state.config.lead_rate_window_minutes * 60);

    let limit = state
        .rate_limiter
        .check(&client_ip, state.config.lead_rate_limit, window)
        .await;
    if !limit.allowed {
        tracing::warn!(client_ip = %client_ip, "Checkout order creation rate limited");
        return Err(ApiError::RateLimited {
            retry_after_seconds: limit.retry_after_seconds.unwrap_or(1) as i64,
        });
    }

    // Only exact tier prices may become orders
    if !products::is_tier_price(request.amount_paise) {
        return Err(ApiError::BadRequest("unknown product amount".to_string()));
    }
    let detected = products::detect(request.amount_paise)?;

    let orders = state
        .fulfillment
        .orders()
        .ok_or_else(|| ApiError::NotConfigured("razorpay orders".to_string()))?;

    let receipt = format!("rcpt_{}", Uuid::new_v4().simple());
    let mut notes = request.notes.unwrap_or_else(|| json!({}));
    if let Some(map) = notes.as_object_mut() {
        if let Some(email) = &request.email {
            map.insert("email".into(), json!(email));
        }
        if let Some(contact) = &request.contact {
            map.insert("contact".into(), json!(contact));
        }
    }

    let order = orders
        .create_order(request.amount_paise, "INR", &receipt, notes)
        .await?;

    tracing::info!(
        order_id = %order.id,
        amount_paise = order.amount,
        products = ?detected.products,
        "Checkout order created"
    );

    Ok(Json(json!({
        "order_id": order.id,
        "amount": order.amount,
        "currency": order.currency,
        "key_id": orders.key_id(),
    })))
}
