//! Meta Conversions API adapter
//!
//! Sends a server-side Purchase event so conversions survive ad blockers
//! and pixel loss. Customer identifiers are SHA-256 hashed as the CAPI
//! contract requires; the `event_id` doubles as Meta's dedup key against
//! the client-side pixel.

use sha2::{Digest, Sha256};

use super::{FulfillmentPayload, NotifyError};

const GRAPH_API_BASE: &str = "https://graph.facebook.com/v18.0";

#[derive(Clone)]
pub struct MetaCapiNotifier {
    http: reqwest::Client,
    pixel_id: Option<String>,
    access_token: Option<String>,
    base_url: String,
}

impl MetaCapiNotifier {
    pub fn new(pixel_id: Option<String>, access_token: Option<String>) -> Self {
        Self::with_base_url(pixel_id, access_token, GRAPH_API_BASE.to_string())
    }

    /// Base URL override for tests
    pub fn with_base_url(
        pixel_id: Option<String>,
        access_token: Option<String>,
        base_url: String,
    ) -> Self {
        if pixel_id.is_none() || access_token.is_none() {
            tracing::warn!("Meta CAPI credentials not configured - conversion tracking disabled");
        }
        Self {
            http: reqwest::Client::new(),
            pixel_id,
            access_token,
            base_url,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.pixel_id.is_some() && self.access_token.is_some()
    }

    pub async fn send(&self, payload: &FulfillmentPayload) -> Result<(), NotifyError> {
        let (Some(pixel_id), Some(access_token)) = (&self.pixel_id, &self.access_token) else {
            tracing::info!(
                event_id = %payload.event_id,
                "Meta CAPI disabled, skipping conversion send"
            );
            return Ok(());
        };

        let mut user_data = serde_json::Map::new();
        if let Some(email) = &payload.email {
            user_data.insert(
                "em".into(),
                serde_json::json!([hash_identifier(&email.to_lowercase())]),
            );
        }
        if let Some(contact) = &payload.contact {
            user_data.insert(
                "ph".into(),
                serde_json::json!([hash_identifier(&normalize_phone(contact))]),
            );
        }

        let body = serde_json::json!({
            "data": [{
                "event_name": "Purchase",
                "event_time": time::OffsetDateTime::now_utc().unix_timestamp(),
                "event_id": payload.event_id,
                "action_source": "website",
                "user_data": user_data,
                "custom_data": {
                    "currency": payload.currency,
                    "value": payload.amount_paise as f64 / 100.0,
                    "content_ids": payload.products,
                    "content_type": "product",
                },
            }],
        });

        let response = self
            .http
            .post(format!("{}/{}/events", self.base_url, pixel_id))
            .query(&[("access_token", access_token.as_str())])
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::Status {
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!(
            event_id = %payload.event_id,
            pixel_id = %pixel_id,
            "Meta CAPI purchase event sent"
        );
        Ok(())
    }
}

/// SHA-256 hex digest, the hashing Meta requires for PII match keys.
fn hash_identifier(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.trim().as_bytes());
    hex::encode(hasher.finalize())
}

/// Strip everything but digits; keep the country code.
fn normalize_phone(contact: &str) -> String {
    contact.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::products::{DeliveryFlags, ProductId};

    fn payload() -> FulfillmentPayload {
        FulfillmentPayload {
            event_id: "payment.captured_order_9".into(),
            event_type: "payment.captured".into(),
            payment_id: "pay_9".into(),
            order_id: "order_9".into(),
            amount_paise: 8997,
            currency: "INR".into(),
            email: Some("Buyer@Example.com".into()),
            contact: Some("+91 98765-43210".into()),
            notes: serde_json::json!({}),
            products: vec![
                ProductId::MainCourse,
                ProductId::OrderBump,
                ProductId::Upsell,
            ],
            flags: DeliveryFlags {
                send_course_access: true,
                send_database: true,
                send_calendar_link: true,
            },
        }
    }

    #[test]
    fn phone_normalization_keeps_digits_only() {
        assert_eq!(normalize_phone("+91 98765-43210"), "919876543210");
    }

    #[test]
    fn identifier_hash_is_sha256_hex() {
        let hash = hash_identifier("buyer@example.com");
        assert_eq!(hash.len(), 64);
        // Stable across calls
        assert_eq!(hash, hash_identifier("buyer@example.com"));
        assert_ne!(hash, hash_identifier("other@example.com"));
    }

    #[tokio::test]
    async fn send_posts_purchase_event() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/px_123/events")
            .match_query(mockito::Matcher::UrlEncoded(
                "access_token".into(),
                "tok_abc".into(),
            ))
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"data":[{"event_name":"Purchase","event_id":"payment.captured_order_9"}]}"#
                    .into(),
            ))
            .with_status(200)
            .with_body(r#"{"events_received":1}"#)
            .create_async()
            .await;

        let notifier = MetaCapiNotifier::with_base_url(
            Some("px_123".into()),
            Some("tok_abc".into()),
            server.url(),
        );
        notifier.send(&payload()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn graph_api_rejection_is_error_value() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/px_123/events")
            .match_query(mockito::Matcher::Any)
            .with_status(400)
            .with_body(r#"{"error":{"message":"Invalid OAuth access token"}}"#)
            .create_async()
            .await;

        let notifier = MetaCapiNotifier::with_base_url(
            Some("px_123".into()),
            Some("bad".into()),
            server.url(),
        );
        let result = notifier.send(&payload()).await;
        assert!(matches!(
            result,
            Err(NotifyError::Status { status: 400, .. })
        ));
    }

    #[tokio::test]
    async fn missing_credentials_degrade_to_noop() {
        let notifier = MetaCapiNotifier::new(Some("px_123".into()), None);
        assert!(!notifier.is_enabled());
        assert!(notifier.send(&payload()).await.is_ok());
    }
}
