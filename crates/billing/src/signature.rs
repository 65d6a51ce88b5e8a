//! Webhook signature verification
//!
//! Both supported gateways sign webhooks with HMAC-SHA256:
//!
//! - Stripe: `stripe-signature: t=<unix>,v1=<hex>[,v1=<hex>]`, computed over
//!   `"<t>.<payload>"`. Deliveries older than [`STRIPE_TOLERANCE_SECS`] are rejected.
//! - Lemon Squeezy: `x-signature: <hex>`, computed over the raw body.

use hmac::{Hmac, Mac};
use launchkit_shared::BillingProvider;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a Stripe signature timestamp, in seconds
pub const STRIPE_TOLERANCE_SECS: i64 = 300;

/// Verify a webhook signature for `provider` against the configured secret
pub fn verify_signature(
    provider: BillingProvider,
    payload: &[u8],
    signature: &str,
    secret: &str,
) -> BillingResult<()> {
    match provider {
        BillingProvider::Stripe => verify_stripe_signature(
            payload,
            signature,
            secret,
            OffsetDateTime::now_utc().unix_timestamp(),
        ),
        BillingProvider::LemonSqueezy => verify_lemon_squeezy_signature(payload, signature, secret),
    }
}

/// Verify a `stripe-signature` header at the given wall-clock time
pub fn verify_stripe_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        BillingError::SignatureVerification("missing timestamp in signature header".to_string())
    })?;
    if candidates.is_empty() {
        return Err(BillingError::SignatureVerification(
            "missing v1 signature in signature header".to_string(),
        ));
    }

    // The timestamp is unauthenticated here, so the distance must not overflow
    if now.abs_diff(timestamp) > STRIPE_TOLERANCE_SECS.unsigned_abs() {
        tracing::warn!(
            timestamp = timestamp,
            now = now,
            "Webhook timestamp outside tolerance"
        );
        return Err(BillingError::SignatureVerification(
            "timestamp outside tolerance".to_string(),
        ));
    }

    let expected = hmac_sha256(secret, &[timestamp.to_string().as_bytes(), b".", payload])?;
    if candidates
        .iter()
        .any(|candidate| matches_hex(&expected, candidate))
    {
        Ok(())
    } else {
        Err(BillingError::SignatureVerification(
            "signature mismatch".to_string(),
        ))
    }
}

/// Verify an `x-signature` header
pub fn verify_lemon_squeezy_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
) -> BillingResult<()> {
    let expected = hmac_sha256(secret, &[payload])?;
    if matches_hex(&expected, header.trim()) {
        Ok(())
    } else {
        Err(BillingError::SignatureVerification(
            "signature mismatch".to_string(),
        ))
    }
}

/// Build a `stripe-signature` header value, as Stripe would for `payload`
pub fn sign_stripe_payload(payload: &[u8], secret: &str, timestamp: i64) -> BillingResult<String> {
    let mac = hmac_sha256(secret, &[timestamp.to_string().as_bytes(), b".", payload])?;
    Ok(format!("t={},v1={}", timestamp, hex::encode(mac)))
}

/// Build an `x-signature` header value, as Lemon Squeezy would for `payload`
pub fn sign_lemon_squeezy_payload(payload: &[u8], secret: &str) -> BillingResult<String> {
    Ok(hex::encode(hmac_sha256(secret, &[payload])?))
}

fn hmac_sha256(secret: &str, parts: &[&[u8]]) -> BillingResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::SignatureVerification("invalid webhook secret".to_string()))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().to_vec())
}

fn matches_hex(expected: &[u8], candidate: &str) -> bool {
    match hex::decode(candidate) {
        Ok(provided) => expected.ct_eq(&provided).into(),
        Err(_) => false,
    }
}
