//! Stripe webhook payloads
//!
//! Checkout sessions only reference their subscription, so subscription
//! checkouts are completed with a follow-up fetch through the [`GatewayClient`].

use launchkit_shared::OrderStatus;
use serde::Deserialize;
use serde_json::Value;

use super::{
    account_id_from, from_unix, from_value, invitation_from, parse_account_id, parse_json,
    parse_status, Metadata,
};
use crate::client::GatewayClient;
use crate::currency::{from_minor_units, normalize_currency};
use crate::error::{BillingError, BillingResult};
use crate::events::{
    BillingEvent, CheckoutCompleted, EventEnvelope, OrderSnapshot, Purchase, SubscriptionSnapshot,
};

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: Value,
}

#[derive(Debug, Deserialize)]
struct CheckoutSession {
    id: String,
    mode: String,
    customer: Option<String>,
    subscription: Option<String>,
    client_reference_id: Option<String>,
    #[serde(default)]
    metadata: Metadata,
    amount_total: Option<i64>,
    currency: Option<String>,
    payment_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Invoice {
    subscription: Option<String>,
    /// Newer API versions nest the subscription under `parent`
    parent: Option<InvoiceParent>,
}

#[derive(Debug, Deserialize)]
struct InvoiceParent {
    subscription_details: Option<InvoiceSubscriptionDetails>,
}

#[derive(Debug, Deserialize)]
struct InvoiceSubscriptionDetails {
    subscription: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ObjectId {
    id: String,
}

/// Stripe list envelope
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StripeList<T> {
    pub data: Vec<T>,
}

/// The subset of a Stripe subscription object the reconciler needs
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    pub customer: String,
    pub status: String,
    pub items: StripeList<StripeSubscriptionItem>,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub trial_end: Option<i64>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StripeSubscriptionItem {
    pub price: StripePrice,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StripePrice {
    pub id: String,
}

/// A checkout session line item
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StripeLineItem {
    pub price: Option<StripePrice>,
}

pub async fn normalize(
    payload: &[u8],
    gateway: &dyn GatewayClient,
) -> BillingResult<EventEnvelope> {
    let StripeEvent {
        id,
        event_type,
        data,
    } = parse_json(payload)?;

    let event = match event_type.as_str() {
        "checkout.session.completed" => {
            let session: CheckoutSession = from_value(data.object, "checkout session")?;
            checkout_completed(session, gateway).await?
        }
        "customer.subscription.updated" => {
            let subscription: StripeSubscription = from_value(data.object, "subscription")?;
            let account_id = account_id_from(&subscription.metadata)?;
            BillingEvent::SubscriptionUpdated(subscription_snapshot(subscription, account_id)?)
        }
        "customer.subscription.deleted" => {
            let ObjectId { id } = from_value(data.object, "subscription")?;
            BillingEvent::SubscriptionDeleted {
                subscription_id: id,
            }
        }
        "invoice.paid" => {
            let invoice: Invoice = from_value(data.object, "invoice")?;
            let subscription_id = invoice.subscription.or_else(|| {
                invoice
                    .parent
                    .and_then(|parent| parent.subscription_details)
                    .and_then(|details| details.subscription)
            });
            match subscription_id {
                Some(subscription_id) => BillingEvent::InvoicePaid { subscription_id },
                // One-off invoices have no subscription to refill
                None => BillingEvent::Unhandled,
            }
        }
        "checkout.session.async_payment_succeeded" => {
            let ObjectId { id } = from_value(data.object, "checkout session")?;
            BillingEvent::PaymentSucceeded { order_id: id }
        }
        "checkout.session.async_payment_failed" => {
            let ObjectId { id } = from_value(data.object, "checkout session")?;
            BillingEvent::PaymentFailed { order_id: id }
        }
        _ => BillingEvent::Unhandled,
    };

    Ok(EventEnvelope {
        id,
        event_type,
        event,
    })
}

async fn checkout_completed(
    session: CheckoutSession,
    gateway: &dyn GatewayClient,
) -> BillingResult<BillingEvent> {
    let account_id = match session.client_reference_id.as_deref().map(str::trim) {
        Some(reference) if !reference.is_empty() => parse_account_id(reference)?,
        _ => account_id_from(&session.metadata)?.ok_or_else(|| {
            BillingError::InvalidPayload(format!(
                "checkout session {} carries no account id",
                session.id
            ))
        })?,
    };

    let invitation = invitation_from(&session.metadata);

    let purchase = match session.mode.as_str() {
        "subscription" => {
            let subscription_id = session.subscription.ok_or_else(|| {
                BillingError::InvalidPayload(format!(
                    "subscription checkout {} has no subscription",
                    session.id
                ))
            })?;
            let subscription = gateway.fetch_subscription(&subscription_id).await?;
            Purchase::Subscription(subscription_snapshot(subscription, Some(account_id))?)
        }
        "payment" => {
            let price_ids = gateway.fetch_checkout_price_ids(&session.id).await?;
            let variant_id = price_ids.into_iter().next().ok_or_else(|| {
                BillingError::InvalidPayload(format!(
                    "checkout session {} has no priced line items",
                    session.id
                ))
            })?;
            let currency = session
                .currency
                .as_deref()
                .and_then(normalize_currency)
                .ok_or_else(|| {
                    BillingError::InvalidPayload(format!(
                        "checkout session {} has no valid currency",
                        session.id
                    ))
                })?;
            let status = match session.payment_status.as_deref() {
                Some("paid") | Some("no_payment_required") => OrderStatus::Succeeded,
                _ => OrderStatus::Pending,
            };

            Purchase::Order(OrderSnapshot {
                id: session.id,
                account_id,
                customer_id: session.customer.unwrap_or_default(),
                status,
                variant_id,
                total_amount: from_minor_units(session.amount_total.unwrap_or(0), &currency),
                currency,
            })
        }
        // Setup-mode sessions only collect a payment method
        _ => return Ok(BillingEvent::Unhandled),
    };

    Ok(BillingEvent::CheckoutCompleted(CheckoutCompleted {
        purchase,
        invitation,
    }))
}

fn subscription_snapshot(
    subscription: StripeSubscription,
    account_id: Option<uuid::Uuid>,
) -> BillingResult<SubscriptionSnapshot> {
    let item = subscription.items.data.first().ok_or_else(|| {
        BillingError::InvalidPayload(format!("subscription {} has no items", subscription.id))
    })?;

    let period_start = subscription
        .current_period_start
        .or(item.current_period_start)
        .ok_or_else(|| {
            BillingError::InvalidPayload(format!(
                "subscription {} has no current period",
                subscription.id
            ))
        })?;
    let period_end = subscription
        .current_period_end
        .or(item.current_period_end)
        .unwrap_or(period_start);

    Ok(SubscriptionSnapshot {
        account_id,
        customer_id: subscription.customer.clone(),
        status: parse_status(&subscription.status)?,
        variant_id: item.price.id.clone(),
        period_starts_at: from_unix(period_start)?,
        period_ends_at: from_unix(period_end)?,
        trial_ends_at: subscription.trial_end.map(from_unix).transpose()?,
        cancel_at_period_end: subscription.cancel_at_period_end,
        currency: subscription.currency.as_deref().and_then(normalize_currency),
        id: subscription.id,
    })
}
