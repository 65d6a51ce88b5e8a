//! Billing configuration schema
//!
//! Validates an untyped configuration document and turns it into a
//! [`BillingConfig`]. Validation stops at the first violation and reports the
//! offending field path (e.g. `products[1].plans[0].lineItems[2].tiers`), so a
//! broken configuration fails the process at boot instead of on the first request.

use std::collections::HashMap;
use std::str::FromStr;

use launchkit_shared::BillingProvider;
use rust_decimal::Decimal;
use serde_json::{Map, Value};

use crate::config::{
    BillingConfig, BillingInterval, Entitlements, LineItem, LineItemKind, PaymentType, Plan,
    PriceTier, Product, TierLimit,
};
use crate::currency::normalize_currency;
use crate::error::{BillingError, BillingResult};

type Object = Map<String, Value>;

/// Validate a raw configuration document
pub fn parse_configuration(raw: &Value) -> BillingResult<BillingConfig> {
    let root = as_object(raw, "$")?;

    let provider_name = required_str(root, "provider", "")?;
    let provider = BillingProvider::from_str(&provider_name).map_err(|_| {
        BillingError::configuration(
            "provider",
            format!(
                "unsupported provider `{}` (expected one of: {})",
                provider_name,
                BillingProvider::ALL
                    .iter()
                    .map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        )
    })?;

    let mut ids = IdRegistry::default();
    let products = required_array(root, "products", "")?
        .iter()
        .enumerate()
        .map(|(index, value)| {
            parse_product(value, &index_path("products", index), provider, &mut ids)
        })
        .collect::<BillingResult<Vec<_>>>()?;

    tracing::debug!(
        provider = %provider,
        products = products.len(),
        plans = ids.plan_count,
        "Billing configuration validated"
    );

    Ok(BillingConfig { provider, products })
}

/// Tracks every id seen so far, and where it was declared
#[derive(Default)]
struct IdRegistry {
    products: HashMap<String, String>,
    /// Plan and line-item ids share one namespace: both are lookup keys for webhooks
    items: HashMap<String, String>,
    plan_count: usize,
}

impl IdRegistry {
    fn claim_product(&mut self, id: &str, path: &str) -> BillingResult<()> {
        claim(&mut self.products, id, path)
    }

    fn claim_item(&mut self, id: &str, path: &str) -> BillingResult<()> {
        claim(&mut self.items, id, path)
    }
}

fn claim(seen: &mut HashMap<String, String>, id: &str, path: &str) -> BillingResult<()> {
    if let Some(first) = seen.get(id) {
        return Err(BillingError::configuration(
            path,
            format!("duplicate id `{}` (first declared at {})", id, first),
        ));
    }
    seen.insert(id.to_string(), path.to_string());
    Ok(())
}

fn parse_product(
    value: &Value,
    path: &str,
    provider: BillingProvider,
    ids: &mut IdRegistry,
) -> BillingResult<Product> {
    let obj = as_object(value, path)?;

    let id = required_str(obj, "id", path)?;
    ids.claim_product(&id, &field_path(path, "id"))?;

    let currency_raw = required_str(obj, "currency", path)?;
    let currency = normalize_currency(&currency_raw).ok_or_else(|| {
        BillingError::configuration(
            field_path(path, "currency"),
            format!("`{}` is not a recognized ISO 4217 currency code", currency_raw),
        )
    })?;

    let features = match obj.get("features") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    BillingError::configuration(
                        index_path(&field_path(path, "features"), index),
                        "expected a string",
                    )
                })
            })
            .collect::<BillingResult<Vec<_>>>()?,
        Some(_) => {
            return Err(BillingError::configuration(
                field_path(path, "features"),
                "expected an array of strings",
            ))
        }
    };

    let plans_path = field_path(path, "plans");
    let plans = required_array(obj, "plans", path)?
        .iter()
        .enumerate()
        .map(|(index, value)| parse_plan(value, &index_path(&plans_path, index), provider, ids))
        .collect::<BillingResult<Vec<_>>>()?;

    Ok(Product {
        id,
        name: required_str(obj, "name", path)?,
        description: required_str(obj, "description", path)?,
        currency,
        badge: optional_str(obj, "badge", path)?,
        highlighted: optional_bool(obj, "highlighted", path)?.unwrap_or(false),
        features,
        plans,
    })
}

fn parse_plan(
    value: &Value,
    path: &str,
    provider: BillingProvider,
    ids: &mut IdRegistry,
) -> BillingResult<Plan> {
    let obj = as_object(value, path)?;

    let id = required_str(obj, "id", path)?;
    ids.claim_item(&id, &field_path(path, "id"))?;
    ids.plan_count += 1;

    let payment_type_raw = required_str(obj, "paymentType", path)?;
    let payment_type: PaymentType = payment_type_raw.parse().map_err(|reason: String| {
        BillingError::configuration(field_path(path, "paymentType"), reason)
    })?;

    let interval = optional_str(obj, "interval", path)?
        .map(|raw| raw.parse::<BillingInterval>())
        .transpose()
        .map_err(|reason| BillingError::configuration(field_path(path, "interval"), reason))?;

    let trial_days = optional_u64(obj, "trialPeriod", path)?;

    match payment_type {
        PaymentType::Recurring if interval.is_none() => {
            return Err(BillingError::configuration(
                field_path(path, "interval"),
                "recurring plans require an interval",
            ));
        }
        PaymentType::OneTime if interval.is_some() => {
            return Err(BillingError::configuration(
                field_path(path, "interval"),
                "one-time plans cannot have an interval",
            ));
        }
        PaymentType::OneTime if trial_days.is_some() => {
            return Err(BillingError::configuration(
                field_path(path, "trialPeriod"),
                "one-time plans cannot have a trial period",
            ));
        }
        _ => {}
    }

    let trial_days = match trial_days {
        Some(0) => {
            return Err(BillingError::configuration(
                field_path(path, "trialPeriod"),
                "trial period must be at least one day",
            ))
        }
        Some(days) => Some(u32::try_from(days).map_err(|_| {
            BillingError::configuration(field_path(path, "trialPeriod"), "trial period is too long")
        })?),
        None => None,
    };

    let entitlements = match obj.get("entitlements") {
        None | Some(Value::Null) => Entitlements::default(),
        Some(value) => {
            let entitlements_path = field_path(path, "entitlements");
            let entitlements = as_object(value, &entitlements_path)?;
            Entitlements {
                tokens: optional_u64(entitlements, "tokens", &entitlements_path)?,
                messages: optional_u64(entitlements, "messages", &entitlements_path)?,
            }
        }
    };

    let items_path = field_path(path, "lineItems");
    let line_items = required_array(obj, "lineItems", path)?
        .iter()
        .enumerate()
        .map(|(index, value)| parse_line_item(value, &index_path(&items_path, index), ids))
        .collect::<BillingResult<Vec<_>>>()?;

    if provider == BillingProvider::LemonSqueezy && line_items.len() != 1 {
        return Err(BillingError::configuration(
            items_path,
            "lemon-squeezy plans must have exactly one line item",
        ));
    }

    Ok(Plan {
        id,
        name: required_str(obj, "name", path)?,
        payment_type,
        interval,
        trial_days,
        entitlements,
        line_items,
    })
}

fn parse_line_item(value: &Value, path: &str, ids: &mut IdRegistry) -> BillingResult<LineItem> {
    let obj = as_object(value, path)?;

    let id = required_str(obj, "id", path)?;
    ids.claim_item(&id, &field_path(path, "id"))?;

    let kind_raw = required_str(obj, "type", path)?;
    let kind: LineItemKind = kind_raw
        .parse()
        .map_err(|reason: String| BillingError::configuration(field_path(path, "type"), reason))?;

    let cost_path = field_path(path, "cost");
    let cost = match obj.get("cost") {
        Some(value) => non_negative_decimal(value, &cost_path)?,
        None => return Err(BillingError::configuration(cost_path, "missing required field")),
    };

    let unit = optional_str(obj, "unit", path)?;
    if kind.is_usage_based() && unit.is_none() {
        return Err(BillingError::configuration(
            field_path(path, "unit"),
            format!("`{}` line items require a unit", kind_raw),
        ));
    }

    let tiers = match obj.get("tiers") {
        None | Some(Value::Null) => Vec::new(),
        Some(value) => {
            let tiers_path = field_path(path, "tiers");
            if kind == LineItemKind::Base {
                return Err(BillingError::configuration(
                    tiers_path,
                    "base line items cannot be tiered",
                ));
            }
            parse_tiers(value, &tiers_path)?
        }
    };

    Ok(LineItem {
        id,
        name: required_str(obj, "name", path)?,
        cost,
        kind,
        unit,
        tiers,
    })
}

fn parse_tiers(value: &Value, path: &str) -> BillingResult<Vec<PriceTier>> {
    let entries = value
        .as_array()
        .ok_or_else(|| BillingError::configuration(path, "expected an array"))?;
    if entries.is_empty() {
        return Err(BillingError::configuration(path, "must not be empty"));
    }

    let mut tiers: Vec<PriceTier> = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let tier_path = index_path(path, index);
        let obj = as_object(entry, &tier_path)?;
        let up_to_path = field_path(&tier_path, "upTo");

        let up_to = match obj.get("upTo") {
            Some(Value::String(s)) if s == "unlimited" => TierLimit::Unlimited,
            Some(Value::Number(n)) => TierLimit::UpTo(n.as_u64().ok_or_else(|| {
                BillingError::configuration(&up_to_path, "expected a non-negative integer")
            })?),
            Some(_) => {
                return Err(BillingError::configuration(
                    up_to_path,
                    "expected an integer or \"unlimited\"",
                ))
            }
            None => return Err(BillingError::configuration(up_to_path, "missing required field")),
        };

        let cost_path = field_path(&tier_path, "cost");
        let cost = match obj.get("cost") {
            Some(value) => non_negative_decimal(value, &cost_path)?,
            None => return Err(BillingError::configuration(cost_path, "missing required field")),
        };

        if let Some(previous) = tiers.last() {
            match (previous.up_to, up_to) {
                (TierLimit::Unlimited, _) => {
                    return Err(BillingError::configuration(
                        up_to_path,
                        "no tier may follow the unlimited tier",
                    ))
                }
                (TierLimit::UpTo(prev), TierLimit::UpTo(next)) if next <= prev => {
                    return Err(BillingError::configuration(
                        up_to_path,
                        format!("tiers must be ascending ({} follows {})", next, prev),
                    ))
                }
                _ => {}
            }
        }

        tiers.push(PriceTier { up_to, cost });
    }

    if !matches!(tiers.last(), Some(PriceTier { up_to: TierLimit::Unlimited, .. })) {
        return Err(BillingError::configuration(
            path,
            "the last tier must be \"unlimited\"",
        ));
    }

    Ok(tiers)
}

// =============================================================================
// Field helpers
// =============================================================================

fn field_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", parent, key)
    }
}

fn index_path(parent: &str, index: usize) -> String {
    format!("{}[{}]", parent, index)
}

fn as_object<'a>(value: &'a Value, path: &str) -> BillingResult<&'a Object> {
    value
        .as_object()
        .ok_or_else(|| BillingError::configuration(path, "expected an object"))
}

fn required_str(obj: &Object, key: &str, parent: &str) -> BillingResult<String> {
    match optional_str(obj, key, parent)? {
        Some(value) => Ok(value),
        None => Err(BillingError::configuration(
            field_path(parent, key),
            "missing required field",
        )),
    }
}

/// A present-but-blank string is an error; `null` and absence are `None`
fn optional_str(obj: &Object, key: &str, parent: &str) -> BillingResult<Option<String>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Err(BillingError::configuration(
            field_path(parent, key),
            "must not be empty",
        )),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(BillingError::configuration(
            field_path(parent, key),
            "expected a string",
        )),
    }
}

fn optional_bool(obj: &Object, key: &str, parent: &str) -> BillingResult<Option<bool>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(BillingError::configuration(
            field_path(parent, key),
            "expected a boolean",
        )),
    }
}

fn optional_u64(obj: &Object, key: &str, parent: &str) -> BillingResult<Option<u64>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n.as_u64().map(Some).ok_or_else(|| {
            BillingError::configuration(field_path(parent, key), "expected a non-negative integer")
        }),
        Some(_) => Err(BillingError::configuration(
            field_path(parent, key),
            "expected a non-negative integer",
        )),
    }
}

fn required_array<'a>(obj: &'a Object, key: &str, parent: &str) -> BillingResult<&'a Vec<Value>> {
    let path = field_path(parent, key);
    match obj.get(key) {
        Some(Value::Array(items)) if items.is_empty() => {
            Err(BillingError::configuration(path, "must contain at least one entry"))
        }
        Some(Value::Array(items)) => Ok(items),
        None | Some(Value::Null) => {
            Err(BillingError::configuration(path, "missing required field"))
        }
        Some(_) => Err(BillingError::configuration(path, "expected an array")),
    }
}

/// Costs may be written as JSON numbers or decimal strings
fn non_negative_decimal(value: &Value, path: &str) -> BillingResult<Decimal> {
    let parsed = match value {
        Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text).or_else(|_| Decimal::from_scientific(&text))
        }
        Value::String(s) => Decimal::from_str(s.trim()),
        _ => {
            return Err(BillingError::configuration(
                path,
                "expected a number or decimal string",
            ))
        }
    };

    let amount = parsed.map_err(|_| {
        BillingError::configuration(path, format!("`{}` is not a valid amount", value))
    })?;
    if amount.is_sign_negative() && !amount.is_zero() {
        return Err(BillingError::configuration(path, "must not be negative"));
    }
    Ok(amount)
}
