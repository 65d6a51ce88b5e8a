//! Billing routes

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use launchkit_billing::{
    find_line_item, find_product_and_plan_by_plan_id, find_product_and_plan_by_variant_id,
    format_price, plan_intervals, BillingError, BillingInterval, Entitlements, LineItem,
    LineItemKind, PaymentType, ProductPlan, TierLimit, WebhookOutcome, WebhookRequest,
};
use launchkit_shared::BillingProvider;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

// ============================================================================
// Webhook
// ============================================================================

/// Payment gateway webhook. The body is passed through untouched so the
/// signature can be checked against the exact bytes that were signed.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let provider = state.reconciler.provider();
    tracing::debug!(provider = %provider, body_len = body.len(), "Billing webhook received");

    let signature = headers
        .get(provider.signature_header())
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let outcome = state
        .reconciler
        .handle_webhook_event(WebhookRequest::new(signature, body.to_vec()))
        .await?;

    match outcome {
        WebhookOutcome::Processed => {
            tracing::info!(provider = %provider, "Billing webhook processed")
        }
        WebhookOutcome::Ignored => {
            tracing::debug!(provider = %provider, "Billing webhook ignored")
        }
    }

    Ok(Json(json!({ "received": true })))
}

// ============================================================================
// Pricing
// ============================================================================

#[derive(Debug, Serialize)]
pub struct PricingResponse {
    pub provider: BillingProvider,
    pub intervals: Vec<BillingInterval>,
    pub products: Vec<ProductResponse>,
}

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    pub id: String,
    pub name: String,
    pub description: String,
    pub currency: String,
    pub badge: Option<String>,
    pub highlighted: bool,
    pub features: Vec<String>,
    pub plans: Vec<PlanResponse>,
}

#[derive(Debug, Serialize)]
pub struct PlanResponse {
    pub id: String,
    pub product_id: String,
    pub name: String,
    pub payment_type: PaymentType,
    pub interval: Option<BillingInterval>,
    /// Headline price of the primary line item, e.g. `19.99 USD`
    pub price: Option<String>,
    pub trial_days: Option<u32>,
    pub entitlements: Entitlements,
    pub line_items: Vec<LineItemResponse>,
}

#[derive(Debug, Serialize)]
pub struct LineItemResponse {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: LineItemKind,
    pub cost: Decimal,
    pub unit: Option<String>,
    pub tiers: Vec<TierResponse>,
}

#[derive(Debug, Serialize)]
pub struct TierResponse {
    /// `None` for the unlimited tier
    pub up_to: Option<u64>,
    pub cost: Decimal,
}

impl From<&LineItem> for LineItemResponse {
    fn from(item: &LineItem) -> Self {
        Self {
            id: item.id.clone(),
            name: item.name.clone(),
            kind: item.kind,
            cost: item.cost,
            unit: item.unit.clone(),
            tiers: item
                .tiers
                .iter()
                .map(|tier| TierResponse {
                    up_to: match tier.up_to {
                        TierLimit::UpTo(limit) => Some(limit),
                        TierLimit::Unlimited => None,
                    },
                    cost: tier.cost,
                })
                .collect(),
        }
    }
}

impl From<ProductPlan<'_>> for PlanResponse {
    fn from(resolved: ProductPlan<'_>) -> Self {
        Self {
            id: resolved.plan.id.clone(),
            product_id: resolved.product.id.clone(),
            name: resolved.plan.name.clone(),
            payment_type: resolved.plan.payment_type,
            interval: resolved.plan.interval,
            price: resolved.display_price(),
            trial_days: resolved.plan.trial_days,
            entitlements: resolved.plan.entitlements,
            line_items: resolved
                .plan
                .line_items
                .iter()
                .map(LineItemResponse::from)
                .collect(),
        }
    }
}

/// Pricing table derived from the billing catalog
pub async fn list_plans(State(state): State<AppState>) -> Json<PricingResponse> {
    let config = state.billing_config.as_ref();

    let products = config
        .products
        .iter()
        .map(|product| ProductResponse {
            id: product.id.clone(),
            name: product.name.clone(),
            description: product.description.clone(),
            currency: product.currency.clone(),
            badge: product.badge.clone(),
            highlighted: product.highlighted,
            features: product.features.clone(),
            plans: product
                .plans
                .iter()
                .map(|plan| PlanResponse::from(ProductPlan { product, plan }))
                .collect(),
        })
        .collect();

    Json(PricingResponse {
        provider: config.provider,
        intervals: plan_intervals(config),
        products,
    })
}

/// A single plan by id
pub async fn get_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<String>,
) -> ApiResult<Json<PlanResponse>> {
    match find_product_and_plan_by_plan_id(&state.billing_config, &plan_id) {
        Ok(resolved) => Ok(Json(resolved.into())),
        // Unknown ids are a client error here, unlike in webhooks
        Err(BillingError::PlanNotFound(_)) => Err(ApiError::NotFound),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Deserialize)]
pub struct QuoteQuery {
    #[serde(default = "default_quantity")]
    pub quantity: u64,
}

fn default_quantity() -> u64 {
    1
}

#[derive(Debug, Serialize)]
pub struct QuoteResponse {
    pub line_item_id: String,
    pub plan_id: String,
    pub quantity: u64,
    pub unit_cost: Decimal,
    pub total: Decimal,
    pub currency: String,
    /// e.g. `39.92 USD`
    pub price: String,
    /// Upper bound of the tier that priced the quantity; absent for flat or unlimited
    pub tier_up_to: Option<u64>,
}

/// Price a quantity of one line item, applying its volume tiers
pub async fn quote_line_item(
    State(state): State<AppState>,
    Path(line_item_id): Path<String>,
    Query(query): Query<QuoteQuery>,
) -> ApiResult<Json<QuoteResponse>> {
    let config = state.billing_config.as_ref();
    let item = find_line_item(config, &line_item_id).ok_or(ApiError::NotFound)?;
    let resolved = find_product_and_plan_by_variant_id(config, &item.id)?;

    let unit_cost = item.unit_cost_for_quantity(query.quantity);
    let total = unit_cost * Decimal::from(query.quantity);
    let currency = resolved.product.currency.clone();

    Ok(Json(QuoteResponse {
        line_item_id: item.id.clone(),
        plan_id: resolved.plan.id.clone(),
        quantity: query.quantity,
        unit_cost,
        total,
        price: format_price(total, &currency),
        currency,
        tier_up_to: item.tier_for_quantity(query.quantity).and_then(|tier| match tier.up_to {
            TierLimit::UpTo(limit) => Some(limit),
            TierLimit::Unlimited => None,
        }),
    }))
}
