//! Health check endpoints

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub provider: String,
    pub database: String,
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    // Check database connectivity when running on Postgres
    let db_status = match &state.pool {
        Some(pool) => match sqlx::query("SELECT 1").execute(pool).await {
            Ok(_) => "healthy",
            Err(_) => "unhealthy",
        },
        None => "in-memory",
    };

    let overall_status = if db_status == "unhealthy" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (
        overall_status,
        Json(HealthResponse {
            status: if overall_status == StatusCode::OK {
                "healthy".to_string()
            } else {
                "unhealthy".to_string()
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            provider: state.reconciler.provider().to_string(),
            database: db_status.to_string(),
        }),
    )
}

/// Liveness probe (just returns 200 if the server is running)
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
