//! Lemon Squeezy webhook payloads
//!
//! Lemon Squeezy sends full resource attributes with every event and reports
//! subscription purchases as `subscription_created`, so no follow-up API call is needed.

use std::str::FromStr;

use launchkit_shared::OrderStatus;
use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;

use super::{
    account_id_from, from_value, invitation_from, parse_json, parse_status, string_or_number,
    Metadata,
};
use crate::currency::{from_minor_units, normalize_currency};
use crate::error::{BillingError, BillingResult};
use crate::events::{
    BillingEvent, CheckoutCompleted, EventEnvelope, OrderSnapshot, Purchase, SubscriptionSnapshot,
};

#[derive(Debug, Deserialize)]
struct Webhook {
    meta: Meta,
    data: Resource,
}

#[derive(Debug, Deserialize)]
struct Meta {
    event_name: String,
    #[serde(default)]
    custom_data: Metadata,
    webhook_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Resource {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    attributes: Value,
}

#[derive(Debug, Deserialize)]
struct SubscriptionAttributes {
    #[serde(deserialize_with = "string_or_number")]
    customer_id: String,
    #[serde(deserialize_with = "string_or_number")]
    variant_id: String,
    status: String,
    #[serde(default)]
    cancelled: bool,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
    #[serde(default, with = "time::serde::rfc3339::option")]
    renews_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    ends_at: Option<OffsetDateTime>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    trial_ends_at: Option<OffsetDateTime>,
}

#[derive(Debug, Deserialize)]
struct OrderAttributes {
    #[serde(deserialize_with = "string_or_number")]
    customer_id: String,
    status: String,
    currency: String,
    /// Minor units
    total: i64,
    first_order_item: OrderItem,
}

#[derive(Debug, Deserialize)]
struct OrderItem {
    #[serde(deserialize_with = "string_or_number")]
    variant_id: String,
}

#[derive(Debug, Deserialize)]
struct InvoiceAttributes {
    #[serde(deserialize_with = "string_or_number")]
    subscription_id: String,
}

pub fn normalize(payload: &[u8]) -> BillingResult<EventEnvelope> {
    let Webhook { meta, data } = parse_json(payload)?;
    let envelope_id = meta
        .webhook_id
        .clone()
        .unwrap_or_else(|| format!("{}:{}", meta.event_name, data.id));

    let event = match meta.event_name.as_str() {
        "order_created" => {
            let attributes: OrderAttributes = from_value(data.attributes, "order")?;
            order_checkout(data.id, attributes, &meta.custom_data)?
        }
        "subscription_created" => {
            let attributes: SubscriptionAttributes = from_value(data.attributes, "subscription")?;
            let snapshot = subscription_snapshot(data.id.clone(), attributes, &meta.custom_data)?;
            if snapshot.account_id.is_none() {
                return Err(BillingError::InvalidPayload(format!(
                    "subscription {} carries no account id",
                    data.id
                )));
            }
            BillingEvent::CheckoutCompleted(CheckoutCompleted {
                purchase: Purchase::Subscription(snapshot),
                invitation: invitation_from(&meta.custom_data),
            })
        }
        "subscription_updated"
        | "subscription_cancelled"
        | "subscription_resumed"
        | "subscription_paused"
        | "subscription_unpaused" => {
            let attributes: SubscriptionAttributes = from_value(data.attributes, "subscription")?;
            BillingEvent::SubscriptionUpdated(subscription_snapshot(
                data.id.clone(),
                attributes,
                &meta.custom_data,
            )?)
        }
        "subscription_expired" => BillingEvent::SubscriptionDeleted {
            subscription_id: data.id.clone(),
        },
        "subscription_payment_success" => {
            let attributes: InvoiceAttributes =
                from_value(data.attributes, "subscription invoice")?;
            BillingEvent::InvoicePaid {
                subscription_id: attributes.subscription_id,
            }
        }
        _ => BillingEvent::Unhandled,
    };

    Ok(EventEnvelope {
        id: envelope_id,
        event_type: meta.event_name,
        event,
    })
}

fn order_checkout(
    order_id: String,
    attributes: OrderAttributes,
    custom_data: &Metadata,
) -> BillingResult<BillingEvent> {
    let account_id = account_id_from(custom_data)?.ok_or_else(|| {
        BillingError::InvalidPayload(format!("order {} carries no account id", order_id))
    })?;
    let currency = normalize_currency(&attributes.currency).ok_or_else(|| {
        BillingError::InvalidPayload(format!("unknown currency `{}`", attributes.currency))
    })?;
    let status = match attributes.status.as_str() {
        // Refunds are not reconciled
        "refunded" => return Ok(BillingEvent::Unhandled),
        other => OrderStatus::from_str(other)
            .map_err(|e| BillingError::InvalidPayload(e.to_string()))?,
    };

    Ok(BillingEvent::CheckoutCompleted(CheckoutCompleted {
        purchase: Purchase::Order(OrderSnapshot {
            id: order_id,
            account_id,
            customer_id: attributes.customer_id,
            status,
            variant_id: attributes.first_order_item.variant_id,
            total_amount: from_minor_units(attributes.total, &currency),
            currency,
        }),
        invitation: invitation_from(custom_data),
    }))
}

fn subscription_snapshot(
    id: String,
    attributes: SubscriptionAttributes,
    custom_data: &Metadata,
) -> BillingResult<SubscriptionSnapshot> {
    Ok(SubscriptionSnapshot {
        id,
        account_id: account_id_from(custom_data)?,
        customer_id: attributes.customer_id,
        status: parse_status(&attributes.status)?,
        variant_id: attributes.variant_id,
        period_starts_at: attributes.created_at,
        period_ends_at: attributes
            .renews_at
            .or(attributes.ends_at)
            .unwrap_or(attributes.created_at),
        trial_ends_at: attributes.trial_ends_at,
        cancel_at_period_end: attributes.cancelled,
        currency: None,
    })
}
