//! Payment gateway API client
//!
//! Webhook payloads are not always self-contained; the Stripe adapter completes
//! checkout events by reading the subscription and line items back from the API.

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::{BillingError, BillingResult};
use crate::providers::stripe::{StripeLineItem, StripeList, StripeSubscription};

const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";

/// Read access to the gateway's REST API
#[async_trait]
pub trait GatewayClient: Send + Sync {
    async fn fetch_subscription(&self, subscription_id: &str) -> BillingResult<StripeSubscription>;

    /// Price ids of a checkout session's line items, in order
    async fn fetch_checkout_price_ids(&self, session_id: &str) -> BillingResult<Vec<String>>;
}

/// Configuration for the Stripe REST API
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Overridable for tests and proxies
    pub api_base: String,
}

impl StripeConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY")
                .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?,
            api_base: std::env::var("STRIPE_API_BASE")
                .unwrap_or_else(|_| DEFAULT_STRIPE_API_BASE.to_string()),
        })
    }
}

/// Stripe REST client over reqwest
#[derive(Clone)]
pub struct StripeGateway {
    client: reqwest::Client,
    config: StripeConfig,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> BillingResult<T> {
        let url = format!("{}{}", self.config.api_base.trim_end_matches('/'), path);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.config.secret_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(
                path = %path,
                status = %status,
                body = %body,
                "Stripe API request failed"
            );
            return Err(BillingError::Gateway(format!(
                "GET {} returned {}",
                path, status
            )));
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl GatewayClient for StripeGateway {
    async fn fetch_subscription(&self, subscription_id: &str) -> BillingResult<StripeSubscription> {
        self.get(&format!("/v1/subscriptions/{}", subscription_id))
            .await
    }

    async fn fetch_checkout_price_ids(&self, session_id: &str) -> BillingResult<Vec<String>> {
        let items: StripeList<StripeLineItem> = self
            .get(&format!("/v1/checkout/sessions/{}/line_items", session_id))
            .await?;

        Ok(items
            .data
            .into_iter()
            .filter_map(|item| item.price.map(|price| price.id))
            .collect())
    }
}

/// Used by deployments whose provider sends self-contained payloads
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredGateway;

#[async_trait]
impl GatewayClient for UnconfiguredGateway {
    async fn fetch_subscription(&self, subscription_id: &str) -> BillingResult<StripeSubscription> {
        Err(BillingError::Gateway(format!(
            "no gateway client configured to fetch subscription {}",
            subscription_id
        )))
    }

    async fn fetch_checkout_price_ids(&self, session_id: &str) -> BillingResult<Vec<String>> {
        Err(BillingError::Gateway(format!(
            "no gateway client configured to fetch checkout {}",
            session_id
        )))
    }
}
