//! Billing configuration: products, plans, line items and pricing tiers
//!
//! A [`BillingConfig`] is authored as JSON, validated once at startup by
//! [`parse_configuration`](crate::schema::parse_configuration), and then shared
//! read-only (behind an `Arc`) by the resolver and the webhook reconciler.

use std::path::Path;
use std::str::FromStr;

use launchkit_shared::BillingProvider;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{BillingError, BillingResult};
use crate::schema::parse_configuration;

/// Catalog shipped with the starter kit, used when no configuration file is provided
const DEFAULT_CATALOG: &str = include_str!("../catalog/default.json");

/// Validated billing configuration
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BillingConfig {
    pub provider: BillingProvider,
    pub products: Vec<Product>,
}

impl BillingConfig {
    /// Parse and validate a configuration from JSON text
    pub fn from_json_str(json: &str) -> BillingResult<Self> {
        let raw: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| BillingError::configuration("$", format!("malformed JSON: {}", e)))?;
        parse_configuration(&raw)
    }

    /// Read, parse and validate a configuration file
    pub fn from_file(path: impl AsRef<Path>) -> BillingResult<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            BillingError::Config(format!(
                "Failed to read billing configuration {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json_str(&json)
    }

    /// The embedded starter / pro / enterprise catalog
    pub fn default_catalog() -> BillingResult<Self> {
        Self::from_json_str(DEFAULT_CATALOG)
    }

    /// Iterate over every plan together with its product
    pub fn plans(&self) -> impl Iterator<Item = (&Product, &Plan)> {
        self.products
            .iter()
            .flat_map(|product| product.plans.iter().map(move |plan| (product, plan)))
    }
}

/// A sellable tier (e.g. "Pro")
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Upper-case ISO 4217 code
    pub currency: String,
    pub badge: Option<String>,
    pub highlighted: bool,
    pub features: Vec<String>,
    pub plans: Vec<Plan>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PaymentType {
    Recurring,
    OneTime,
}

impl FromStr for PaymentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recurring" => Ok(Self::Recurring),
            "one-time" => Ok(Self::OneTime),
            _ => Err(format!(
                "unknown payment type `{}` (expected `recurring` or `one-time`)",
                s
            )),
        }
    }
}

/// Billing interval of a recurring plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    Month,
    Year,
}

impl FromStr for BillingInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "month" => Ok(Self::Month),
            "year" => Ok(Self::Year),
            _ => Err(format!("unknown interval `{}` (expected `month` or `year`)", s)),
        }
    }
}

/// Usage allowance granted by a plan and written alongside its subscription
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlements {
    pub tokens: Option<u64>,
    pub messages: Option<u64>,
}

/// A purchasable interval/price variant of a product (e.g. "Pro Monthly")
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub payment_type: PaymentType,
    /// Present exactly when `payment_type` is recurring
    pub interval: Option<BillingInterval>,
    pub trial_days: Option<u32>,
    pub entitlements: Entitlements,
    pub line_items: Vec<LineItem>,
}

impl Plan {
    /// The line item whose cost represents the plan's headline price
    pub fn primary_line_item(&self) -> Option<&LineItem> {
        self.line_items
            .iter()
            .find(|item| item.kind == LineItemKind::Base)
            .or_else(|| self.line_items.first())
    }

    pub fn is_recurring(&self) -> bool {
        self.payment_type == PaymentType::Recurring
    }

    pub fn has_trial(&self) -> bool {
        self.trial_days.is_some_and(|days| days > 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum LineItemKind {
    /// Flat fee
    Base,
    /// Billed on reported usage
    Metered,
    /// Billed per team member
    PerSeat,
}

impl FromStr for LineItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base" => Ok(Self::Base),
            "metered" => Ok(Self::Metered),
            "per-seat" => Ok(Self::PerSeat),
            _ => Err(format!(
                "unknown line item type `{}` (expected `base`, `metered` or `per-seat`)",
                s
            )),
        }
    }
}

impl LineItemKind {
    pub fn is_usage_based(&self) -> bool {
        matches!(self, Self::Metered | Self::PerSeat)
    }
}

/// A billable component of a plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineItem {
    pub id: String,
    pub name: String,
    pub cost: Decimal,
    pub kind: LineItemKind,
    pub unit: Option<String>,
    /// Ascending by `up_to`, terminated by a single unlimited tier; empty for flat pricing
    pub tiers: Vec<PriceTier>,
}

impl LineItem {
    /// First tier covering `quantity`; `None` for flat pricing
    pub fn tier_for_quantity(&self, quantity: u64) -> Option<&PriceTier> {
        self.tiers.iter().find(|tier| tier.up_to.covers(quantity))
    }

    /// Unit cost applicable at the given quantity
    pub fn unit_cost_for_quantity(&self, quantity: u64) -> Decimal {
        self.tier_for_quantity(quantity)
            .map(|tier| tier.cost)
            .unwrap_or(self.cost)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TierLimit {
    UpTo(u64),
    Unlimited,
}

impl TierLimit {
    pub fn covers(&self, quantity: u64) -> bool {
        match self {
            TierLimit::UpTo(limit) => quantity <= *limit,
            TierLimit::Unlimited => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceTier {
    pub up_to: TierLimit,
    pub cost: Decimal,
}
