//! Application state

use std::sync::Arc;

use launchkit_billing::{BillingConfig, BillingEventReconciler};
use sqlx::PgPool;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Validated billing catalog, shared read-only with the reconciler
    pub billing_config: Arc<BillingConfig>,
    pub reconciler: Arc<BillingEventReconciler>,
    /// Absent when running on the in-memory store
    pub pool: Option<PgPool>,
}

impl AppState {
    pub fn new(
        config: Config,
        reconciler: BillingEventReconciler,
        pool: Option<PgPool>,
    ) -> Self {
        let reconciler = Arc::new(reconciler);
        Self {
            config,
            billing_config: reconciler.shared_config(),
            reconciler,
            pool,
        }
    }
}
