//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to automatically deserialize environment variables into a type-safe struct.

use std::time::Duration;

use serde::Deserialize;

use crate::{notify::webhook::validate_webhook_url, services::allocation_service::RetryPolicy};

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (optional): PostgreSQL connection string. Without it the
///   service runs on the in-memory store.
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `DATABASE_MAX_CONNECTIONS` (optional): pool size, defaults to 5
/// - `ALLOCATION_MAX_ATTEMPTS` (optional): claim attempts under contention, defaults to 3
/// - `ALLOCATION_RETRY_BACKOFF_MS` (optional): pause between attempts, defaults to 25
/// - `NOTIFICATION_WEBHOOK_URL` (optional): where customer notifications are POSTed
/// - `NOTIFICATION_WEBHOOK_SECRET` (required with the URL): HMAC signing secret
/// - `NOTIFICATION_TIMEOUT_SECS` (optional): webhook timeout, defaults to 5
/// - `BOOTSTRAP_API_KEY` (optional): API key registered at startup
/// - `BOOTSTRAP_API_KEY_LABEL` (optional): its label, defaults to "bootstrap"
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database_url: Option<String>,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    #[serde(default = "default_max_attempts")]
    pub allocation_max_attempts: u32,

    #[serde(default = "default_backoff_ms")]
    pub allocation_retry_backoff_ms: u64,

    #[serde(default)]
    pub notification_webhook_url: Option<String>,

    #[serde(default)]
    pub notification_webhook_secret: Option<String>,

    #[serde(default = "default_notification_timeout")]
    pub notification_timeout_secs: u64,

    #[serde(default)]
    pub bootstrap_api_key: Option<String>,

    #[serde(default = "default_bootstrap_label")]
    pub bootstrap_api_key_label: String,
}

/// Configuration could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn default_port() -> u16 {
    3000
}

fn default_max_connections() -> u32 {
    5
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    25
}

fn default_notification_timeout() -> u64 {
    5
}

fn default_bootstrap_label() -> String {
    "bootstrap".to_string()
}

/// Treat blank optional variables as unset.
fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Environment variable values cannot be parsed into expected types
    /// - The values are inconsistent (see [`Config::validate`])
    pub fn from_env() -> Result<Self, ConfigError> {
        // Try to load .env file if it exists (does nothing if not found)
        dotenvy::dotenv().ok();

        Self::from_vars(std::env::vars())
    }

    /// Build configuration from explicit `(NAME, value)` pairs.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        // Field names are automatically converted: database_url -> DATABASE_URL
        let mut config = envy::from_iter::<_, Config>(vars)?;

        config.database_url = non_blank(config.database_url);
        config.notification_webhook_url = non_blank(config.notification_webhook_url);
        config.notification_webhook_secret = non_blank(config.notification_webhook_secret);
        config.bootstrap_api_key = non_blank(config.bootstrap_api_key);

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field rules envy can't express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.allocation_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "ALLOCATION_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        if self.database_max_connections == 0 {
            return Err(ConfigError::Invalid(
                "DATABASE_MAX_CONNECTIONS must be at least 1".to_string(),
            ));
        }

        if let Some(url) = &self.notification_webhook_url {
            validate_webhook_url(url)
                .map_err(|e| ConfigError::Invalid(format!("NOTIFICATION_WEBHOOK_URL: {e}")))?;

            if self.notification_webhook_secret.is_none() {
                return Err(ConfigError::Invalid(
                    "NOTIFICATION_WEBHOOK_SECRET is required when NOTIFICATION_WEBHOOK_URL is set"
                        .to_string(),
                ));
            }
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.allocation_max_attempts,
            backoff: Duration::from_millis(self.allocation_retry_backoff_ms),
        }
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_secs(self.notification_timeout_secs)
    }
}
