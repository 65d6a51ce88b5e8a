// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! LaunchKit Billing Module
//!
//! Validates the billing catalog, resolves gateway price ids to plans, and
//! reconciles payment gateway webhooks into subscription and order records.
//!
//! ## Features
//!
//! - **Configuration Schema**: Fail-fast validation of products, plans, line items and tiers
//! - **Plan Resolver**: Plan / variant id lookups used by pricing views and webhooks
//! - **Reconciler**: Signed webhook handling for Stripe and Lemon Squeezy
//! - **Record Store**: Postgres and in-memory persistence of reconciled state
//! - **Email Notifications**: Purchase confirmations for invited team members

pub mod client;
pub mod config;
pub mod currency;
pub mod email;
pub mod error;
pub mod events;
pub mod notify;
pub mod pg_store;
pub mod providers;
pub mod reconciler;
pub mod records;
pub mod resolver;
pub mod schema;
pub mod signature;
pub mod store;

// Client
pub use client::{GatewayClient, StripeConfig, StripeGateway, UnconfiguredGateway};

// Configuration
pub use config::{
    BillingConfig, BillingInterval, Entitlements, LineItem, LineItemKind, PaymentType, Plan,
    PriceTier, Product, TierLimit,
};
pub use schema::parse_configuration;

// Currency
pub use currency::format_price;

// Email
pub use email::{EmailConfig, EmailNotifier};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{BillingEvent, EventEnvelope, WebhookOutcome, WebhookRequest};

// Notifications
pub use notify::{NoopNotifier, Notifier, PurchaseNotice};

// Reconciler
pub use reconciler::BillingEventReconciler;

// Records
pub use records::{OrderRecord, SubscriptionRecord};

// Resolver
pub use resolver::{
    find_line_item, find_product_and_plan_by_plan_id, find_product_and_plan_by_variant_id,
    plan_intervals, ProductPlan,
};

// Store
pub use pg_store::PgBillingStore;
pub use store::{BillingRecordStore, InMemoryBillingStore};
