//! Provider payload adapters
//!
//! Each adapter parses a verified webhook body into an [`EventEnvelope`].
//! Account ids and invitation details travel in checkout metadata under the keys
//! [`ACCOUNT_ID_KEY`], [`INVITATION_EMAIL_KEY`] and [`INVITED_BY_KEY`].

pub mod lemon_squeezy;
pub mod stripe;

use std::collections::HashMap;
use std::str::FromStr;

use launchkit_shared::{BillingProvider, SubscriptionStatus};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::GatewayClient;
use crate::error::{BillingError, BillingResult};
use crate::events::{EventEnvelope, Invitation};

pub const ACCOUNT_ID_KEY: &str = "account_id";
pub const INVITATION_EMAIL_KEY: &str = "invitation_email";
pub const INVITED_BY_KEY: &str = "invited_by";

/// Free-form key/value metadata attached to a checkout
pub type Metadata = HashMap<String, Value>;

/// Parse a verified webhook body for `provider`
pub async fn normalize_event(
    provider: BillingProvider,
    payload: &[u8],
    gateway: &dyn GatewayClient,
) -> BillingResult<EventEnvelope> {
    match provider {
        BillingProvider::Stripe => stripe::normalize(payload, gateway).await,
        BillingProvider::LemonSqueezy => lemon_squeezy::normalize(payload),
    }
}

fn metadata_str<'a>(metadata: &'a Metadata, key: &str) -> Option<&'a str> {
    metadata
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Account id from metadata; a present but malformed value is an error
fn account_id_from(metadata: &Metadata) -> BillingResult<Option<Uuid>> {
    metadata_str(metadata, ACCOUNT_ID_KEY)
        .map(parse_account_id)
        .transpose()
}

fn parse_account_id(raw: &str) -> BillingResult<Uuid> {
    Uuid::parse_str(raw)
        .map_err(|_| BillingError::InvalidPayload(format!("invalid account id `{}`", raw)))
}

fn invitation_from(metadata: &Metadata) -> Option<Invitation> {
    metadata_str(metadata, INVITATION_EMAIL_KEY).map(|email| Invitation {
        email: email.to_string(),
        invited_by: metadata_str(metadata, INVITED_BY_KEY).map(str::to_string),
    })
}

fn parse_status(raw: &str) -> BillingResult<SubscriptionStatus> {
    SubscriptionStatus::from_str(raw).map_err(|e| BillingError::InvalidPayload(e.to_string()))
}

fn from_unix(seconds: i64) -> BillingResult<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(seconds)
        .map_err(|_| BillingError::InvalidPayload(format!("invalid timestamp {}", seconds)))
}

fn parse_json<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> BillingResult<T> {
    serde_json::from_slice(payload).map_err(|e| BillingError::InvalidPayload(e.to_string()))
}

fn from_value<T: serde::de::DeserializeOwned>(value: Value, what: &str) -> BillingResult<T> {
    serde_json::from_value(value)
        .map_err(|e| BillingError::InvalidPayload(format!("malformed {}: {}", what, e)))
}

/// Gateways are inconsistent about numeric vs string ids
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(u64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(text) => text,
        Id::Number(number) => number.to_string(),
    })
}
