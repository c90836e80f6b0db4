//! Razorpay webhook endpoint
//!
//! The body must reach signature verification as raw bytes; axum's `Bytes`
//! extractor guarantees no intermediate JSON round trip. The response goes
//! out as soon as the event is claimed; fulfillment fan-out continues on
//! its own task.

use std::time::Instant;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use funnel_fulfillment::signature::SIGNATURE_HEADER;
use funnel_fulfillment::Disposition;

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn razorpay_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let started = Instant::now();

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let handler = state.fulfillment.webhooks();
    let event = handler.verify_event(&body, signature)?;
    let accept = handler.handle_event(event).await?;

    let processing_time_ms = started.elapsed().as_millis() as u64;
    match accept.disposition {
        Disposition::Accepted => {
            tracing::info!(
                event_type = %accept.event_type,
                event_id = ?accept.event_id,
                processing_time_ms = processing_time_ms,
                "Webhook accepted"
            );
        }
        Disposition::Duplicate | Disposition::Ignored => {}
    }

    Ok(Json(json!({
        "success": true,
        "event": accept.event_type,
        "processing_time_ms": processing_time_ms,
    })))
}
