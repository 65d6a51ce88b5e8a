//! Application configuration

use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub public_url: String,

    // Database (in-memory store when unset)
    pub database_url: Option<String>,
    pub database_max_connections: u32,

    // Billing
    pub billing_config_path: Option<String>,
    pub webhook_secret: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            public_url: env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            // Database
            database_url: non_empty_var("DATABASE_URL"),
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),

            // Billing
            billing_config_path: non_empty_var("BILLING_CONFIG_PATH"),
            webhook_secret: {
                let secret = non_empty_var("BILLING_WEBHOOK_SECRET")
                    .ok_or(ConfigError::Missing("BILLING_WEBHOOK_SECRET"))?;
                if secret.len() < 16 {
                    return Err(ConfigError::WeakSecret(
                        "BILLING_WEBHOOK_SECRET must be at least 16 characters",
                    ));
                }
                secret
            },
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
}
