//! Billing error types

use thiserror::Error;

/// Billing-specific errors
#[derive(Debug, Error)]
pub enum BillingError {
    /// The static billing configuration is malformed; fatal at boot
    #[error("Invalid billing configuration at `{path}`: {reason}")]
    Configuration { path: String, reason: String },

    /// No plan in the configuration matches the identifier
    #[error("Plan not found: {0}")]
    PlanNotFound(String),

    #[error("Webhook signature verification failed: {0}")]
    SignatureVerification(String),

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Calling the payment gateway's API failed
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    /// Missing or invalid environment configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BillingError {
    pub(crate) fn configuration(path: impl Into<String>, reason: impl Into<String>) -> Self {
        BillingError::Configuration {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Whether the payment gateway should redeliver the webhook that produced this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BillingError::PlanNotFound(_)
                | BillingError::Persistence(_)
                | BillingError::Gateway(_)
        )
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Persistence(err.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        BillingError::Gateway(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
