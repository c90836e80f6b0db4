//! Lead capture endpoint
//!
//! Public form endpoint, so it sits behind the per-IP sliding-window rate
//! limiter. Captured leads are stored locally and forwarded to the Zapier
//! lead hook on a fire-and-forget task; a hook outage never fails the
//! form submission.

use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LeadRequest {
    pub name: String,
    pub email: String,
    pub phone: String,
    #[serde(default)]
    pub utm_source: Option<String>,
    #[serde(default)]
    pub utm_campaign: Option<String>,
}

/// First hop of X-Forwarded-For, falling back to "unknown" so direct
/// connections still share one throttle bucket.
pub fn extract_client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn validate(lead: &LeadRequest) -> Result<(), String> {
    if lead.name.trim().is_empty() {
        return Err("name is required".to_string());
    }
    let email = lead.email.trim();
    if email.is_empty() || !email.contains('@') || email.len() > 254 {
        return Err("a valid email is required".to_string());
    }
    let digits = lead.phone.chars().filter(|c| c.is_ascii_digit()).count();
    if digits < 10 {
        return Err("a valid phone number is required".to_string());
    }
    Ok(())
}

pub async fn capture_lead(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(lead): Json<LeadRequest>,
) -> ApiResult<Json<Value>> {
    let client_ip = extract_client_ip(&headers);
    let window = Duration::from_secs(state.config.lead_rate_window_minutes * 60);

    let limit = state
        .rate_limiter
        .check(&client_ip, state.config.lead_rate_limit, window)
        .await;
    if !limit.allowed {
        tracing::warn!(client_ip = %client_ip, "Lead submission rate limited");
        return Err(ApiError::RateLimited {
            retry_after_seconds: limit.retry_after_seconds.unwrap_or(1) as i64,
        });
    }

    validate(&lead).map_err(ApiError::BadRequest)?;

    sqlx::query(
        r#"
        INSERT INTO leads (name, email, phone, utm_source, utm_campaign)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(lead.name.trim())
    .bind(lead.email.trim().to_lowercase())
    .bind(lead.phone.trim())
    .bind(&lead.utm_source)
    .bind(&lead.utm_campaign)
    .execute(&state.pool)
    .await?;

    tracing::info!(email = %lead.email.trim().to_lowercase(), "Lead captured");

    // Forward to Zapier off the request path
    if let Some(hook_url) = state.config.zapier_lead_hook_url.clone() {
        let http = state.http_client.clone();
        let body = json!({
            "name": lead.name.trim(),
            "email": lead.email.trim().to_lowercase(),
            "phone": lead.phone.trim(),
            "utm_source": lead.utm_source,
            "utm_campaign": lead.utm_campaign,
        });
        tokio::spawn(async move {
            match http.post(&hook_url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::info!("Lead forwarded to Zapier");
                }
                Ok(response) => {
                    tracing::error!(
                        status = response.status().as_u16(),
                        "Zapier lead hook rejected the payload"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "Zapier lead hook unreachable");
                }
            }
        });
    }

    Ok(Json(json!({ "success": true })))
}
