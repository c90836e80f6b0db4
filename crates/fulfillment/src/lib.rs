// Fulfillment crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Course Funnel Fulfillment Module
//!
//! Handles Razorpay integration for the paid-course funnel: webhook
//! verification, idempotent event processing, and fulfillment fan-out.
//!
//! ## Features
//!
//! - **Signature Verification**: Constant-time HMAC-SHA256 over raw bytes
//! - **Deduplication**: In-memory window plus a durable claim on the event id
//! - **Product Detection**: Maps captured amounts to purchased product tiers
//! - **Fan-out**: Zapier, Meta CAPI, and database adapters with settle-all
//!   semantics and per-adapter retry budgets
//! - **Orders**: Razorpay order creation for the checkout page

pub mod dedup;
pub mod error;
pub mod notify;
pub mod products;
pub mod razorpay;
pub mod retry;
pub mod signature;
pub mod webhooks;


// Dedup
pub use dedup::{ClaimOutcome, DedupWindow, EventStore, ProcessingResult, WebhookEventRecord};

// Error
pub use error::{FulfillmentError, FulfillmentResult};

// Notify
pub use notify::{
    DatabaseNotifier, ErrorClass, FulfillmentPayload, MetaCapiNotifier, NotifyError,
    ZapierNotifier,
};

// Products
pub use products::{DeliveryFlags, DetectedProducts, ProductId};

// Razorpay
pub use razorpay::{OrdersClient, PaymentEntity, RazorpayEvent, EVENT_PAYMENT_CAPTURED};

// Retry
pub use retry::{RetryError, RetryPolicy};

// Webhooks
pub use webhooks::{Disposition, WebhookAccept, WebhookHandler};

use sqlx::PgPool;

/// Environment-derived configuration for the fulfillment service.
#[derive(Clone)]
pub struct FulfillmentConfig {
    pub webhook_secret: String,
    pub razorpay_key_id: Option<String>,
    pub razorpay_key_secret: Option<String>,
    pub zapier_payment_hook_url: Option<String>,
    pub meta_pixel_id: Option<String>,
    pub meta_access_token: Option<String>,
}

impl FulfillmentConfig {
    pub fn from_env() -> FulfillmentResult<Self> {
        let webhook_secret = std::env::var("RAZORPAY_WEBHOOK_SECRET").map_err(|_| {
            FulfillmentError::Config("RAZORPAY_WEBHOOK_SECRET must be set".to_string())
        })?;

        Ok(Self {
            webhook_secret,
            razorpay_key_id: std::env::var("RAZORPAY_KEY_ID").ok(),
            razorpay_key_secret: std::env::var("RAZORPAY_KEY_SECRET").ok(),
            zapier_payment_hook_url: std::env::var("ZAPIER_PAYMENT_HOOK_URL").ok(),
            meta_pixel_id: std::env::var("META_PIXEL_ID").ok(),
            meta_access_token: std::env::var("META_ACCESS_TOKEN").ok(),
        })
    }
}

/// Top-level fulfillment service wiring the webhook handler and the
/// Razorpay orders client from one config.
#[derive(Clone)]
pub struct FulfillmentService {
    webhooks: WebhookHandler,
    orders: Option<OrdersClient>,
}

impl FulfillmentService {
    pub fn new(config: &FulfillmentConfig, pool: PgPool) -> Self {
        let store = EventStore::new(pool.clone());
        let webhooks = WebhookHandler::new(
            config.webhook_secret.clone(),
            store,
            ZapierNotifier::new(config.zapier_payment_hook_url.clone()),
            MetaCapiNotifier::new(config.meta_pixel_id.clone(), config.meta_access_token.clone()),
            DatabaseNotifier::new(pool),
        );

        let orders = match (&config.razorpay_key_id, &config.razorpay_key_secret) {
            (Some(key_id), Some(key_secret)) => {
                Some(OrdersClient::new(key_id.clone(), key_secret.clone()))
            }
            _ => {
                tracing::warn!("Razorpay API keys not configured - order creation disabled");
                None
            }
        };

        Self { webhooks, orders }
    }

    pub fn webhooks(&self) -> &WebhookHandler {
        &self.webhooks
    }

    pub fn orders(&self) -> Option<&OrdersClient> {
        self.orders.as_ref()
    }
}
