//! Outbound purchase notifications
//!
//! Delivery is best effort: the reconciler logs failures and never retries them.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::BillingResult;

/// Details of a completed purchase worth telling someone about
#[derive(Debug, Clone, PartialEq)]
pub struct PurchaseNotice {
    pub recipient: String,
    pub account_id: Uuid,
    pub product_name: String,
    pub plan_name: String,
    /// Headline price, e.g. `19.99 USD`
    pub price: Option<String>,
    pub trial_days: Option<u32>,
    /// Name of the team member who sent the invitation
    pub invited_by: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Returns `Ok(false)` when the message was not delivered
    async fn send_purchase_confirmation(&self, notice: &PurchaseNotice) -> BillingResult<bool>;
}

/// Drops every notification
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn send_purchase_confirmation(&self, notice: &PurchaseNotice) -> BillingResult<bool> {
        tracing::debug!(
            recipient = %notice.recipient,
            plan = %notice.plan_name,
            "Notifications disabled, skipping purchase confirmation"
        );
        Ok(false)
    }
}
