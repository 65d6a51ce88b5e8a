//! Normalized billing events
//!
//! Provider adapters in [`crate::providers`] translate gateway payloads into these
//! types so the reconciler never deals with provider-specific JSON.

use launchkit_shared::{OrderStatus, SubscriptionStatus};
use rust_decimal::Decimal;
use time::OffsetDateTime;
use uuid::Uuid;

/// A raw inbound webhook delivery
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    /// Value of the provider's signature header, if present
    pub signature: Option<String>,
    /// Raw request body, exactly as received
    pub payload: Vec<u8>,
}

impl WebhookRequest {
    pub fn new(signature: Option<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            signature,
            payload: payload.into(),
        }
    }
}

/// A verified, normalized webhook event
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    /// Provider event id, used for log correlation
    pub id: String,
    /// Provider event type, e.g. `customer.subscription.updated`
    pub event_type: String,
    pub event: BillingEvent,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BillingEvent {
    CheckoutCompleted(CheckoutCompleted),
    SubscriptionUpdated(SubscriptionSnapshot),
    SubscriptionDeleted { subscription_id: String },
    /// A recurring payment went through; quotas are refilled
    InvoicePaid { subscription_id: String },
    PaymentSucceeded { order_id: String },
    PaymentFailed { order_id: String },
    /// An event type the reconciler does not act on
    Unhandled,
}

impl BillingEvent {
    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CheckoutCompleted(_) => "checkout_completed",
            Self::SubscriptionUpdated(_) => "subscription_updated",
            Self::SubscriptionDeleted { .. } => "subscription_deleted",
            Self::InvoicePaid { .. } => "invoice_paid",
            Self::PaymentSucceeded { .. } => "payment_succeeded",
            Self::PaymentFailed { .. } => "payment_failed",
            Self::Unhandled => "unhandled",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutCompleted {
    pub purchase: Purchase,
    /// Set when the checkout was started from a team invitation
    pub invitation: Option<Invitation>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Purchase {
    Subscription(SubscriptionSnapshot),
    Order(OrderSnapshot),
}

/// Subscription state as reported by the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionSnapshot {
    pub id: String,
    /// Absent when the gateway payload carries no account metadata
    pub account_id: Option<Uuid>,
    pub customer_id: String,
    pub status: SubscriptionStatus,
    pub variant_id: String,
    pub period_starts_at: OffsetDateTime,
    pub period_ends_at: OffsetDateTime,
    pub trial_ends_at: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    /// Absent for providers that do not report it; the product currency applies
    pub currency: Option<String>,
}

/// One-time purchase as reported by the gateway
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSnapshot {
    pub id: String,
    pub account_id: Uuid,
    pub customer_id: String,
    pub status: OrderStatus,
    pub variant_id: String,
    pub total_amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Invitation {
    /// Invitee who should receive the confirmation
    pub email: String,
    pub invited_by: Option<String>,
}

/// Result of handling a webhook delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The record store was updated
    Processed,
    /// Valid delivery that required no state change
    Ignored,
}
