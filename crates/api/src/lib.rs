// API crate clippy configuration
// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Course Funnel API Library
//!
//! HTTP surface for the funnel backend: Razorpay webhook intake, lead
//! capture, checkout order creation, and health.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
