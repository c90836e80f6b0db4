//! Application state

use std::sync::Arc;

use sqlx::PgPool;

use funnel_fulfillment::FulfillmentService;
use funnel_shared::RateLimiter;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub fulfillment: Arc<FulfillmentService>,
    /// Per-IP throttle for the public form endpoints
    pub rate_limiter: RateLimiter,
    pub http_client: reqwest::Client,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, fulfillment: FulfillmentService) -> Self {
        Self {
            pool,
            config,
            fulfillment: Arc::new(fulfillment),
            rate_limiter: RateLimiter::new_in_memory(),
            http_client: reqwest::Client::new(),
        }
    }
}
