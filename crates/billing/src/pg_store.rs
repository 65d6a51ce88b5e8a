//! Postgres-backed record store

use async_trait::async_trait;
use launchkit_shared::{BillingProvider, OrderStatus, SubscriptionStatus};
use rust_decimal::Decimal;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::config::Entitlements;
use crate::error::BillingResult;
use crate::records::{OrderRecord, SubscriptionRecord};
use crate::store::BillingRecordStore;

pub struct PgBillingStore {
    pool: PgPool,
}

impl PgBillingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    id: String,
    account_id: Uuid,
    customer_id: String,
    status: SubscriptionStatus,
    variant_id: String,
    period_starts_at: OffsetDateTime,
    period_ends_at: OffsetDateTime,
    trial_ends_at: Option<OffsetDateTime>,
    cancel_at_period_end: bool,
    billing_provider: BillingProvider,
    currency: String,
    tokens_quota: Option<i64>,
    messages_quota: Option<i64>,
}

impl From<SubscriptionRow> for SubscriptionRecord {
    fn from(row: SubscriptionRow) -> Self {
        SubscriptionRecord {
            id: row.id,
            account_id: row.account_id,
            customer_id: row.customer_id,
            status: row.status,
            variant_id: row.variant_id,
            period_starts_at: row.period_starts_at,
            period_ends_at: row.period_ends_at,
            trial_ends_at: row.trial_ends_at,
            cancel_at_period_end: row.cancel_at_period_end,
            billing_provider: row.billing_provider,
            currency: row.currency,
            entitlements: Entitlements {
                tokens: row.tokens_quota.and_then(|v| u64::try_from(v).ok()),
                messages: row.messages_quota.and_then(|v| u64::try_from(v).ok()),
            },
        }
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: String,
    account_id: Uuid,
    customer_id: String,
    status: OrderStatus,
    variant_id: String,
    total_amount: Decimal,
    currency: String,
    billing_provider: BillingProvider,
}

impl From<OrderRow> for OrderRecord {
    fn from(row: OrderRow) -> Self {
        OrderRecord {
            id: row.id,
            account_id: row.account_id,
            customer_id: row.customer_id,
            status: row.status,
            variant_id: row.variant_id,
            total_amount: row.total_amount,
            currency: row.currency,
            billing_provider: row.billing_provider,
        }
    }
}

/// Quotas are BIGINT columns; values past `i64::MAX` saturate
fn quota_column(value: Option<u64>) -> Option<i64> {
    value.map(|v| i64::try_from(v).unwrap_or(i64::MAX))
}

#[async_trait]
impl BillingRecordStore for PgBillingStore {
    async fn upsert_subscription(&self, record: &SubscriptionRecord) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (
                id, account_id, customer_id, status, variant_id,
                period_starts_at, period_ends_at, trial_ends_at, cancel_at_period_end,
                billing_provider, currency, tokens_quota, messages_quota
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET
                account_id = EXCLUDED.account_id,
                customer_id = EXCLUDED.customer_id,
                status = EXCLUDED.status,
                variant_id = EXCLUDED.variant_id,
                period_starts_at = EXCLUDED.period_starts_at,
                period_ends_at = EXCLUDED.period_ends_at,
                trial_ends_at = EXCLUDED.trial_ends_at,
                cancel_at_period_end = EXCLUDED.cancel_at_period_end,
                billing_provider = EXCLUDED.billing_provider,
                currency = EXCLUDED.currency,
                tokens_quota = EXCLUDED.tokens_quota,
                messages_quota = EXCLUDED.messages_quota,
                updated_at = NOW()
            "#,
        )
        .bind(&record.id)
        .bind(record.account_id)
        .bind(&record.customer_id)
        .bind(record.status)
        .bind(&record.variant_id)
        .bind(record.period_starts_at)
        .bind(record.period_ends_at)
        .bind(record.trial_ends_at)
        .bind(record.cancel_at_period_end)
        .bind(record.billing_provider)
        .bind(&record.currency)
        .bind(quota_column(record.entitlements.tokens))
        .bind(quota_column(record.entitlements.messages))
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            subscription_id = %record.id,
            status = %record.status,
            "Subscription row upserted"
        );

        Ok(())
    }

    async fn get_subscription(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(
            r#"
            SELECT id, account_id, customer_id, status, variant_id,
                   period_starts_at, period_ends_at, trial_ends_at, cancel_at_period_end,
                   billing_provider, currency, tokens_quota, messages_quota
            FROM subscriptions
            WHERE id = $1
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(SubscriptionRecord::from))
    }

    async fn delete_subscription(&self, subscription_id: &str) -> BillingResult<bool> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE id = $1")
            .bind(subscription_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn upsert_order(&self, record: &OrderRecord) -> BillingResult<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, account_id, customer_id, status, variant_id,
                total_amount, currency, billing_provider
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                account_id = EXCLUDED.account_id,
                customer_id = EXCLUDED.customer_id,
                status = EXCLUDED.status,
                variant_id = EXCLUDED.variant_id,
                total_amount = EXCLUDED.total_amount,
                currency = EXCLUDED.currency,
                billing_provider = EXCLUDED.billing_provider,
                updated_at = NOW()
            "#,
        )
        .bind(&record.id)
        .bind(record.account_id)
        .bind(&record.customer_id)
        .bind(record.status)
        .bind(&record.variant_id)
        .bind(record.total_amount)
        .bind(&record.currency)
        .bind(record.billing_provider)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_order(&self, order_id: &str) -> BillingResult<Option<OrderRecord>> {
        let row: Option<OrderRow> = sqlx::query_as(
            r#"
            SELECT id, account_id, customer_id, status, variant_id,
                   total_amount, currency, billing_provider
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(OrderRecord::from))
    }

    async fn update_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> BillingResult<bool> {
        let result =
            sqlx::query("UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1")
                .bind(order_id)
                .bind(status)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}
