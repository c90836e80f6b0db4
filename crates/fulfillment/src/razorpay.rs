//! Razorpay wire types and Orders API client

use serde::{Deserialize, Serialize};

use crate::error::{FulfillmentError, FulfillmentResult};

/// Event type emitted when a payment is captured
pub const EVENT_PAYMENT_CAPTURED: &str = "payment.captured";

/// Inbound webhook event envelope
#[derive(Debug, Clone, Deserialize)]
pub struct RazorpayEvent {
    /// Event type, e.g. "payment.captured"
    pub event: String,
    #[serde(default)]
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventPayload {
    pub payment: Option<PaymentWrapper>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentWrapper {
    pub entity: PaymentEntity,
}

/// Nested payment entity from `payload.payment.entity`
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEntity {
    pub id: String,
    pub order_id: Option<String>,
    /// Integer minor-unit currency (paise)
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub email: Option<String>,
    pub contact: Option<String>,
    /// Free-form merchant notes; Razorpay sends `[]` when empty, an object
    /// otherwise, so this stays an untyped value
    #[serde(default)]
    pub notes: serde_json::Value,
}

impl RazorpayEvent {
    /// The payment entity, if this event carries one
    pub fn payment(&self) -> Option<&PaymentEntity> {
        self.payload.payment.as_ref().map(|w| &w.entity)
    }
}

/// Deduplication key, stable across redelivery of the same logical event.
pub fn derive_event_id(event_type: &str, order_id: &str) -> String {
    format!("{}_{}", event_type, order_id)
}

/// Order created via the Orders API, handed to the client-side checkout
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreated {
    pub id: String,
    pub amount: i64,
    pub currency: String,
}

/// Thin client for the Razorpay Orders API (basic auth over HTTPS).
#[derive(Clone)]
pub struct OrdersClient {
    http: reqwest::Client,
    key_id: String,
    key_secret: String,
    base_url: String,
}

impl OrdersClient {
    pub fn new(key_id: String, key_secret: String) -> Self {
        Self::with_base_url(key_id, key_secret, "https://api.razorpay.com".to_string())
    }

    /// Base URL override for tests
    pub fn with_base_url(key_id: String, key_secret: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            key_id,
            key_secret,
            base_url,
        }
    }

    /// Public key id, returned to the browser for checkout initialization
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Create an order for the given amount in paise.
    pub async fn create_order(
        &self,
        amount_paise: i64,
        currency: &str,
        receipt: &str,
        notes: serde_json::Value,
    ) -> FulfillmentResult<OrderCreated> {
        let body = serde_json::json!({
            "amount": amount_paise,
            "currency": currency,
            "receipt": receipt,
            "notes": notes,
        });

        let response = self
            .http
            .post(format!("{}/v1/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(|e| FulfillmentError::Provider(format!("order creation failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                status = status.as_u16(),
                body = %body,
                "Razorpay order creation rejected"
            );
            return Err(FulfillmentError::Provider(format!(
                "order creation returned HTTP {}",
                status.as_u16()
            )));
        }

        let order: OrderCreated = response
            .json()
            .await
            .map_err(|e| FulfillmentError::Provider(format!("invalid order response: {}", e)))?;

        tracing::info!(
            order_id = %order.id,
            amount_paise = order.amount,
            currency = %order.currency,
            "Razorpay order created"
        );

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_is_stable() {
        assert_eq!(
            derive_event_id("payment.captured", "order_123"),
            "payment.captured_order_123"
        );
        assert_eq!(
            derive_event_id("payment.captured", "order_123"),
            derive_event_id("payment.captured", "order_123"),
        );
    }

    #[test]
    fn parses_captured_payment_event() {
        let raw = r#"{
            "event": "payment.captured",
            "payload": {
                "payment": {
                    "entity": {
                        "id": "pay_ABC123",
                        "order_id": "order_XYZ789",
                        "amount": 299900,
                        "currency": "INR",
                        "status": "captured",
                        "email": "buyer@example.com",
                        "contact": "+919876543210",
                        "notes": {"utm_source": "instagram"}
                    }
                }
            }
        }"#;

        let event: RazorpayEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event, "payment.captured");
        let payment = event.payment().unwrap();
        assert_eq!(payment.id, "pay_ABC123");
        assert_eq!(payment.order_id.as_deref(), Some("order_XYZ789"));
        assert_eq!(payment.amount, 299900);
        assert_eq!(payment.notes["utm_source"], "instagram");
    }

    #[test]
    fn parses_event_with_empty_array_notes() {
        // Razorpay sends notes as [] when the merchant set none
        let raw = r#"{
            "event": "payment.captured",
            "payload": {
                "payment": {
                    "entity": {
                        "id": "pay_1",
                        "order_id": "order_1",
                        "amount": 8997,
                        "currency": "INR",
                        "status": "captured",
                        "notes": []
                    }
                }
            }
        }"#;

        let event: RazorpayEvent = serde_json::from_str(raw).unwrap();
        let payment = event.payment().unwrap();
        assert!(payment.email.is_none());
        assert!(payment.notes.is_array());
    }

    #[test]
    fn parses_event_without_payment_payload() {
        let raw = r#"{"event": "order.paid", "payload": {}}"#;
        let event: RazorpayEvent = serde_json::from_str(raw).unwrap();
        assert!(event.payment().is_none());
    }

    #[tokio::test]
    async fn create_order_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/orders")
            .match_header("authorization", mockito::Matcher::Regex("^Basic ".into()))
            .with_status(200)
            .with_body(r#"{"id":"order_new1","amount":299900,"currency":"INR"}"#)
            .create_async()
            .await;

        let client = OrdersClient::with_base_url(
            "rzp_test_key".into(),
            "secret".into(),
            server.url(),
        );
        let order = client
            .create_order(299900, "INR", "rcpt_1", serde_json::json!({}))
            .await
            .unwrap();

        assert_eq!(order.id, "order_new1");
        assert_eq!(order.amount, 299900);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn create_order_propagates_provider_rejection() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/orders")
            .with_status(400)
            .with_body(r#"{"error":{"description":"amount too small"}}"#)
            .create_async()
            .await;

        let client =
            OrdersClient::with_base_url("rzp_test_key".into(), "secret".into(), server.url());
        let result = client
            .create_order(1, "INR", "rcpt_2", serde_json::json!({}))
            .await;

        assert!(matches!(result, Err(FulfillmentError::Provider(_))));
    }
}
