//! Zapier catch-hook adapter

use super::{FulfillmentPayload, NotifyError};

/// Forwards fulfillment payloads to a Zapier catch hook, which drives the
/// course-access email and calendar-link automations.
#[derive(Clone)]
pub struct ZapierNotifier {
    http: reqwest::Client,
    hook_url: Option<String>,
}

impl ZapierNotifier {
    pub fn new(hook_url: Option<String>) -> Self {
        if hook_url.is_none() {
            tracing::warn!("Zapier hook URL not configured - Zapier fulfillment disabled");
        }
        Self {
            http: reqwest::Client::new(),
            hook_url,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.hook_url.is_some()
    }

    pub async fn send(&self, payload: &FulfillmentPayload) -> Result<(), NotifyError> {
        let Some(hook_url) = &self.hook_url else {
            tracing::info!(
                event_id = %payload.event_id,
                "Zapier disabled, skipping fulfillment send"
            );
            return Ok(());
        };

        let response = self.http.post(hook_url).json(payload).send().await?;

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
            order_id = %payload.order_id,
            "Zapier fulfillment sent"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::products::{DeliveryFlags, ProductId};

    fn payload() -> FulfillmentPayload {
        FulfillmentPayload {
            event_id: "payment.captured_order_1".into(),
            event_type: "payment.captured".into(),
            payment_id: "pay_1".into(),
            order_id: "order_1".into(),
            amount_paise: 2999,
            currency: "INR".into(),
            email: Some("buyer@example.com".into()),
            contact: Some("+919876543210".into()),
            notes: serde_json::json!({}),
            products: vec![ProductId::MainCourse],
            flags: DeliveryFlags {
                send_course_access: true,
                send_database: true,
                send_calendar_link: false,
            },
        }
    }

    #[tokio::test]
    async fn send_posts_payload_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hooks/catch/123/abc")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"order_id":"order_1","products":["main_course"]}"#.into(),
            ))
            .with_status(200)
            .create_async()
            .await;

        let notifier = ZapierNotifier::new(Some(format!("{}/hooks/catch/123/abc", server.url())));
        notifier.send(&payload()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_error_value() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/hook")
            .with_status(500)
            .with_body("internal error")
            .create_async()
            .await;

        let notifier = ZapierNotifier::new(Some(format!("{}/hook", server.url())));
        let result = notifier.send(&payload()).await;
        assert!(matches!(
            result,
            Err(NotifyError::Status { status: 500, .. })
        ));
    }

    #[tokio::test]
    async fn disabled_adapter_is_noop_success() {
        let notifier = ZapierNotifier::new(None);
        assert!(!notifier.is_enabled());
        assert!(notifier.send(&payload()).await.is_ok());
    }
}
