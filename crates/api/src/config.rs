//! Environment-derived configuration

use crate::error::{ApiError, ApiResult};

/// Server configuration loaded once at startup.
#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    /// Comma-separated CORS origin allowlist
    pub allowed_origins: String,
    /// Zapier hook for captured leads (separate from the payment hook)
    pub zapier_lead_hook_url: Option<String>,
    /// Max lead submissions per client IP inside the rate-limit window
    pub lead_rate_limit: u32,
    /// Rate-limit window in minutes
    pub lead_rate_window_minutes: u64,
}

impl Config {
    pub fn from_env() -> ApiResult<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ApiError::Config("DATABASE_URL must be set".to_string()))?;

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string());

        let lead_rate_limit = std::env::var("LEAD_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(5);

        let lead_rate_window_minutes = std::env::var("LEAD_RATE_WINDOW_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(15);

        Ok(Self {
            database_url,
            bind_address,
            allowed_origins,
            zapier_lead_hook_url: std::env::var("ZAPIER_LEAD_HOOK_URL").ok(),
            lead_rate_limit,
            lead_rate_window_minutes,
        })
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;

    #[test]
    #[serial]
    fn missing_database_url_is_an_error() {
        std::env::remove_var("DATABASE_URL");
        assert!(Config::from_env().is_err());
    }

    #[test]
    #[serial]
    fn defaults_applied_when_optional_vars_absent() {
        std::env::set_var("DATABASE_URL", "postgres://localhost/funnel");
        std::env::remove_var("BIND_ADDRESS");
        std::env::remove_var("LEAD_RATE_LIMIT");
        std::env::remove_var("ZAPIER_LEAD_HOOK_URL");

        let config = Config::from_env().unwrap();
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert_eq!(config.lead_rate_limit, 5);
        assert_eq!(config.lead_rate_window_minutes, 15);
        assert!(config.zapier_lead_hook_url.is_none());

        std::env::remove_var("DATABASE_URL");
    }
}
