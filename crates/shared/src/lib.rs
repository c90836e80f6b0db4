// Shared crate clippy configuration
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Funnel Shared Components
//!
//! Infrastructure shared between the API server and the background worker:
//! database pool construction, migrations, and the in-memory sliding-window
//! rate limiter used on public form endpoints.

pub mod db;
pub mod rate_limit;

pub use db::{create_pool, run_migrations};
pub use rate_limit::{RateLimitResult, RateLimiter, DEFAULT_WINDOW};
