//! Persisted billing state

use launchkit_shared::{BillingProvider, OrderStatus, SubscriptionStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::Entitlements;

/// Reconciled state of a customer's subscription, keyed by the provider's subscription id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub id: String,
    pub account_id: Uuid,
    pub customer_id: String,
    pub status: SubscriptionStatus,
    /// Plan or line-item id the subscription was purchased through
    pub variant_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub period_starts_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub period_ends_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub trial_ends_at: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub billing_provider: BillingProvider,
    pub currency: String,
    pub entitlements: Entitlements,
}

/// A one-time purchase, keyed by the provider's order or checkout id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: String,
    pub account_id: Uuid,
    pub customer_id: String,
    pub status: OrderStatus,
    pub variant_id: String,
    pub total_amount: Decimal,
    pub currency: String,
    pub billing_provider: BillingProvider,
}
