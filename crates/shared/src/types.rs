//! Core types shared by the billing core and the API server

use serde::{Deserialize, Serialize};

use crate::error::SharedError;

// =============================================================================
// Billing Provider
// =============================================================================

/// Payment gateway a deployment bills through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum BillingProvider {
    Stripe,
    LemonSqueezy,
}

impl BillingProvider {
    /// All providers the billing core can reconcile
    pub const ALL: [BillingProvider; 2] = [BillingProvider::Stripe, BillingProvider::LemonSqueezy];

    /// HTTP header carrying the webhook signature for this provider
    pub fn signature_header(&self) -> &'static str {
        match self {
            Self::Stripe => "stripe-signature",
            Self::LemonSqueezy => "x-signature",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stripe => "stripe",
            Self::LemonSqueezy => "lemon-squeezy",
        }
    }
}

impl std::fmt::Display for BillingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BillingProvider {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stripe" => Ok(Self::Stripe),
            "lemon-squeezy" => Ok(Self::LemonSqueezy),
            _ => Err(SharedError::invalid("billing provider", s)),
        }
    }
}

// =============================================================================
// Subscription Status
// =============================================================================

/// Reconciled status of a subscription, as reported by the payment gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    IncompleteExpired,
    Paused,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Trialing => "trialing",
            Self::PastDue => "past_due",
            Self::Canceled => "canceled",
            Self::Unpaid => "unpaid",
            Self::Incomplete => "incomplete",
            Self::IncompleteExpired => "incomplete_expired",
            Self::Paused => "paused",
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "trialing" | "on_trial" => Ok(Self::Trialing),
            "past_due" => Ok(Self::PastDue),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            "unpaid" => Ok(Self::Unpaid),
            "incomplete" => Ok(Self::Incomplete),
            "incomplete_expired" | "expired" => Ok(Self::IncompleteExpired),
            "paused" => Ok(Self::Paused),
            _ => Err(SharedError::invalid("subscription status", s)),
        }
    }
}

// =============================================================================
// Order Status
// =============================================================================

/// Status of a one-time purchase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Succeeded,
    Failed,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = SharedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "succeeded" | "paid" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            _ => Err(SharedError::invalid("order status", s)),
        }
    }
}
