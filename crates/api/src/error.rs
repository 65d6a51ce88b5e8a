//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use launchkit_billing::BillingError;
use serde_json::json;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Request errors
    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Resource not found")]
    NotFound,

    // Billing errors (the gateway should redeliver)
    #[error("Unknown plan for variant {0}")]
    PlanNotFound(String),
    #[error("Upstream gateway error")]
    Gateway(String),

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::InvalidSignature(_) => {
                (StatusCode::BAD_REQUEST, "INVALID_SIGNATURE", self.to_string())
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),

            ApiError::PlanNotFound(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "PLAN_NOT_FOUND", self.to_string())
            }
            ApiError::Gateway(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "GATEWAY_ERROR", self.to_string())
            }

            ApiError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "Database error".to_string(),
            ),
            ApiError::Internal => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", self.to_string())
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::SignatureVerification(msg) => ApiError::InvalidSignature(msg),
            BillingError::InvalidPayload(msg) => ApiError::BadRequest(msg),
            BillingError::PlanNotFound(id) => ApiError::PlanNotFound(id),
            BillingError::Gateway(msg) => ApiError::Gateway(msg),
            BillingError::Persistence(msg) => ApiError::Database(msg),
            other => {
                tracing::error!(error = %other, "Unexpected billing error");
                ApiError::Internal
            }
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
