//! Plan resolution
//!
//! Looks up the product and plan owning a plan id or a gateway price/variant id.
//! Ids are unique across the configuration, so a lookup matches at most one plan.

use serde::Serialize;

use crate::config::{BillingConfig, BillingInterval, LineItem, Plan, Product};
use crate::currency::format_price;
use crate::error::{BillingError, BillingResult};

/// A plan together with the product that owns it
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProductPlan<'a> {
    pub product: &'a Product,
    pub plan: &'a Plan,
}

impl<'a> ProductPlan<'a> {
    /// Headline price of the plan, e.g. `9.99 USD`
    pub fn display_price(&self) -> Option<String> {
        self.plan
            .primary_line_item()
            .map(|item| format_price(item.cost, &self.product.currency))
    }
}

/// Find the plan with the given id
pub fn find_product_and_plan_by_plan_id<'a>(
    config: &'a BillingConfig,
    plan_id: &str,
) -> BillingResult<ProductPlan<'a>> {
    find_plan(config, |plan| plan.id == plan_id)
        .ok_or_else(|| BillingError::PlanNotFound(plan_id.to_string()))
}

/// Find the plan a gateway variant/price id belongs to.
///
/// Matches either the plan id itself or the id of one of its line items.
pub fn find_product_and_plan_by_variant_id<'a>(
    config: &'a BillingConfig,
    variant_id: &str,
) -> BillingResult<ProductPlan<'a>> {
    find_plan(config, |plan| {
        plan.id == variant_id || plan.line_items.iter().any(|item| item.id == variant_id)
    })
    .ok_or_else(|| BillingError::PlanNotFound(variant_id.to_string()))
}

/// Find a line item by id anywhere in the configuration
pub fn find_line_item<'a>(config: &'a BillingConfig, line_item_id: &str) -> Option<&'a LineItem> {
    config
        .plans()
        .flat_map(|(_, plan)| plan.line_items.iter())
        .find(|item| item.id == line_item_id)
}

/// Distinct billing intervals offered, in declaration order
pub fn plan_intervals(config: &BillingConfig) -> Vec<BillingInterval> {
    let mut intervals = Vec::new();
    for interval in config.plans().filter_map(|(_, plan)| plan.interval) {
        if !intervals.contains(&interval) {
            intervals.push(interval);
        }
    }
    intervals
}

fn find_plan<'a>(
    config: &'a BillingConfig,
    matches: impl Fn(&Plan) -> bool,
) -> Option<ProductPlan<'a>> {
    config
        .plans()
        .find(|(_, plan)| matches(plan))
        .map(|(product, plan)| ProductPlan { product, plan })
}
