//! API routes

pub mod billing;
pub mod health;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::state::AppState;

/// Webhook payloads are small; anything larger is not from a gateway
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness));

    // Webhook is public; authenticity comes from the signature header
    let billing_routes = Router::new()
        .route("/billing/webhook", post(billing::webhook))
        .route("/billing/plans", get(billing::list_plans))
        .route("/billing/plans/{plan_id}", get(billing::get_plan))
        .route(
            "/billing/line-items/{line_item_id}/quote",
            get(billing::quote_line_item),
        );

    Router::new()
        .merge(health_routes)
        .nest("/api", billing_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}
