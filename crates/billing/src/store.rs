//! Record store for reconciled billing state
//!
//! The reconciler only ever issues single-row upserts and deletes keyed by the
//! provider-assigned id; concurrent deliveries for the same id are last-write-wins
//! at the store.

use std::collections::HashMap;

use async_trait::async_trait;
use launchkit_shared::OrderStatus;
use tokio::sync::RwLock;

use crate::error::BillingResult;
use crate::records::{OrderRecord, SubscriptionRecord};

#[async_trait]
pub trait BillingRecordStore: Send + Sync {
    /// Insert or replace the subscription with `record.id`
    async fn upsert_subscription(&self, record: &SubscriptionRecord) -> BillingResult<()>;

    async fn get_subscription(&self, subscription_id: &str)
        -> BillingResult<Option<SubscriptionRecord>>;

    /// Remove a subscription. Returns whether a record existed.
    async fn delete_subscription(&self, subscription_id: &str) -> BillingResult<bool>;

    /// Insert or replace the order with `record.id`
    async fn upsert_order(&self, record: &OrderRecord) -> BillingResult<()>;

    async fn get_order(&self, order_id: &str) -> BillingResult<Option<OrderRecord>>;

    /// Set the status of an existing order. Returns whether the order was found.
    async fn update_order_status(&self, order_id: &str, status: OrderStatus)
        -> BillingResult<bool>;
}

/// Process-local store for tests and local development
#[derive(Debug, Default)]
pub struct InMemoryBillingStore {
    subscriptions: RwLock<HashMap<String, SubscriptionRecord>>,
    orders: RwLock<HashMap<String, OrderRecord>>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.read().await.len()
    }
}

#[async_trait]
impl BillingRecordStore for InMemoryBillingStore {
    async fn upsert_subscription(&self, record: &SubscriptionRecord) -> BillingResult<()> {
        self.subscriptions
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        Ok(self.subscriptions.read().await.get(subscription_id).cloned())
    }

    async fn delete_subscription(&self, subscription_id: &str) -> BillingResult<bool> {
        Ok(self
            .subscriptions
            .write()
            .await
            .remove(subscription_id)
            .is_some())
    }

    async fn upsert_order(&self, record: &OrderRecord) -> BillingResult<()> {
        self.orders
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> BillingResult<Option<OrderRecord>> {
        Ok(self.orders.read().await.get(order_id).cloned())
    }

    async fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> BillingResult<bool> {
        let mut orders = self.orders.write().await;
        match orders.get_mut(order_id) {
            Some(order) => {
                order.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
