//! Billing event reconciliation
//!
//! Brings the record store in line with the gateway's view after each webhook.
//! Every write is a single upsert or delete keyed by the provider-assigned id, so
//! redelivered events converge on the same stored state. The reconciler never
//! retries: errors propagate and the gateway's redelivery policy takes over.

use std::sync::Arc;

use launchkit_shared::{BillingProvider, OrderStatus, SubscriptionStatus};

use crate::client::GatewayClient;
use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::events::{
    BillingEvent, CheckoutCompleted, EventEnvelope, Invitation, OrderSnapshot, Purchase,
    SubscriptionSnapshot, WebhookOutcome, WebhookRequest,
};
use crate::notify::{Notifier, PurchaseNotice};
use crate::providers::normalize_event;
use crate::records::{OrderRecord, SubscriptionRecord};
use crate::resolver::{find_product_and_plan_by_variant_id, ProductPlan};
use crate::signature::verify_signature;
use crate::store::BillingRecordStore;

pub struct BillingEventReconciler {
    config: Arc<BillingConfig>,
    store: Arc<dyn BillingRecordStore>,
    gateway: Arc<dyn GatewayClient>,
    notifier: Arc<dyn Notifier>,
    webhook_secret: String,
}

impl BillingEventReconciler {
    pub fn new(
        config: Arc<BillingConfig>,
        store: Arc<dyn BillingRecordStore>,
        gateway: Arc<dyn GatewayClient>,
        notifier: Arc<dyn Notifier>,
        webhook_secret: impl Into<String>,
    ) -> Self {
        Self {
            config,
            store,
            gateway,
            notifier,
            webhook_secret: webhook_secret.into(),
        }
    }

    pub fn shared_config(&self) -> Arc<BillingConfig> {
        Arc::clone(&self.config)
    }

    pub fn provider(&self) -> BillingProvider {
        self.config.provider
    }

    /// Verify, normalize and apply one webhook delivery.
    ///
    /// A delivery that fails signature verification is rejected before its
    /// payload is even parsed.
    pub async fn handle_webhook_event(
        &self,
        request: WebhookRequest,
    ) -> BillingResult<WebhookOutcome> {
        let provider = self.provider();
        let signature = request.signature.as_deref().ok_or_else(|| {
            BillingError::SignatureVerification(format!(
                "missing {} header",
                provider.signature_header()
            ))
        })?;

        if let Err(e) =
            verify_signature(provider, &request.payload, signature, &self.webhook_secret)
        {
            tracing::warn!(provider = %provider, error = %e, "Rejected billing webhook");
            return Err(e);
        }

        let envelope = normalize_event(provider, &request.payload, self.gateway.as_ref()).await?;

        tracing::info!(
            event_id = %envelope.id,
            event_type = %envelope.event_type,
            kind = envelope.event.kind(),
            "Processing billing webhook"
        );

        let event_id = envelope.id.clone();
        let result = self.dispatch(envelope).await;
        if let Err(ref e) = result {
            tracing::error!(
                event_id = %event_id,
                error = %e,
                retryable = e.is_retryable(),
                "Billing webhook processing failed"
            );
        }
        result
    }

    async fn dispatch(&self, envelope: EventEnvelope) -> BillingResult<WebhookOutcome> {
        match envelope.event {
            BillingEvent::CheckoutCompleted(checkout) => self.handle_checkout(checkout).await,
            BillingEvent::SubscriptionUpdated(snapshot) => {
                self.handle_subscription_updated(snapshot).await
            }
            BillingEvent::SubscriptionDeleted { subscription_id } => {
                self.handle_subscription_deleted(&subscription_id).await
            }
            BillingEvent::InvoicePaid { subscription_id } => {
                self.handle_invoice_paid(&subscription_id).await
            }
            BillingEvent::PaymentSucceeded { order_id } => {
                self.handle_order_payment(&order_id, OrderStatus::Succeeded)
                    .await
            }
            BillingEvent::PaymentFailed { order_id } => {
                self.handle_order_payment(&order_id, OrderStatus::Failed).await
            }
            BillingEvent::Unhandled => {
                tracing::debug!(
                    event_id = %envelope.id,
                    event_type = %envelope.event_type,
                    "Unhandled billing event type"
                );
                Ok(WebhookOutcome::Ignored)
            }
        }
    }

    async fn handle_checkout(&self, checkout: CheckoutCompleted) -> BillingResult<WebhookOutcome> {
        let CheckoutCompleted {
            purchase,
            invitation,
        } = checkout;

        let (resolved, account_id) = match purchase {
            Purchase::Subscription(snapshot) => {
                let resolved =
                    find_product_and_plan_by_variant_id(&self.config, &snapshot.variant_id)?;
                let record = self.checkout_subscription_record(snapshot, resolved)?;
                self.store.upsert_subscription(&record).await?;

                tracing::info!(
                    subscription_id = %record.id,
                    account_id = %record.account_id,
                    plan_id = %resolved.plan.id,
                    status = %record.status,
                    "Subscription created from checkout"
                );
                (resolved, record.account_id)
            }
            Purchase::Order(snapshot) => {
                let resolved =
                    find_product_and_plan_by_variant_id(&self.config, &snapshot.variant_id)?;
                if resolved.plan.is_recurring() {
                    // The matching subscription event carries the state
                    tracing::debug!(
                        order_id = %snapshot.id,
                        plan_id = %resolved.plan.id,
                        "Order for recurring plan, skipping"
                    );
                    return Ok(WebhookOutcome::Ignored);
                }
                let record = order_record(snapshot, self.provider());
                self.store.upsert_order(&record).await?;

                tracing::info!(
                    order_id = %record.id,
                    account_id = %record.account_id,
                    plan_id = %resolved.plan.id,
                    status = %record.status,
                    "Order recorded from checkout"
                );
                (resolved, record.account_id)
            }
        };

        if let Some(invitation) = invitation {
            self.notify_invitee(invitation, resolved, account_id).await;
        }

        Ok(WebhookOutcome::Processed)
    }

    fn checkout_subscription_record(
        &self,
        snapshot: SubscriptionSnapshot,
        resolved: ProductPlan<'_>,
    ) -> BillingResult<SubscriptionRecord> {
        let account_id = snapshot.account_id.ok_or_else(|| {
            BillingError::InvalidPayload(format!(
                "subscription {} carries no account id",
                snapshot.id
            ))
        })?;

        // A fresh subscription starts in trial exactly when its plan has one
        let (status, trial_ends_at) = match resolved.plan.trial_days {
            Some(days) if resolved.plan.has_trial() => (
                SubscriptionStatus::Trialing,
                snapshot.trial_ends_at.or(Some(
                    snapshot.period_starts_at + time::Duration::days(i64::from(days)),
                )),
            ),
            _ => (SubscriptionStatus::Active, None),
        };

        Ok(SubscriptionRecord {
            id: snapshot.id,
            account_id,
            customer_id: snapshot.customer_id,
            status,
            variant_id: snapshot.variant_id,
            period_starts_at: snapshot.period_starts_at,
            period_ends_at: snapshot.period_ends_at,
            trial_ends_at,
            cancel_at_period_end: snapshot.cancel_at_period_end,
            billing_provider: self.provider(),
            currency: snapshot
                .currency
                .unwrap_or_else(|| resolved.product.currency.clone()),
            entitlements: resolved.plan.entitlements,
        })
    }

    async fn handle_subscription_updated(
        &self,
        snapshot: SubscriptionSnapshot,
    ) -> BillingResult<WebhookOutcome> {
        let terminal = matches!(
            snapshot.status,
            SubscriptionStatus::Canceled | SubscriptionStatus::IncompleteExpired
        );
        let existing = if snapshot.account_id.is_none() || terminal {
            self.store.get_subscription(&snapshot.id).await?
        } else {
            None
        };

        // A terminal update for a row that is already gone must not recreate it
        if terminal && existing.is_none() {
            tracing::info!(
                subscription_id = %snapshot.id,
                status = %snapshot.status,
                "Ended subscription has no stored record, ignoring update"
            );
            return Ok(WebhookOutcome::Ignored);
        }

        let resolved =
            find_product_and_plan_by_variant_id(&self.config, &snapshot.variant_id)?;
        let account_id = snapshot
            .account_id
            .or(existing.as_ref().map(|record| record.account_id))
            .ok_or_else(|| {
                BillingError::InvalidPayload(format!(
                    "subscription {} has no account id and no stored record",
                    snapshot.id
                ))
            })?;
        let currency = snapshot
            .currency
            .or(existing.map(|record| record.currency))
            .unwrap_or_else(|| resolved.product.currency.clone());

        let record = SubscriptionRecord {
            id: snapshot.id,
            account_id,
            customer_id: snapshot.customer_id,
            status: snapshot.status,
            variant_id: snapshot.variant_id,
            period_starts_at: snapshot.period_starts_at,
            period_ends_at: snapshot.period_ends_at,
            trial_ends_at: snapshot.trial_ends_at,
            cancel_at_period_end: snapshot.cancel_at_period_end,
            billing_provider: self.provider(),
            currency,
            entitlements: resolved.plan.entitlements,
        };
        self.store.upsert_subscription(&record).await?;

        tracing::info!(
            subscription_id = %record.id,
            account_id = %record.account_id,
            plan_id = %resolved.plan.id,
            status = %record.status,
            cancel_at_period_end = record.cancel_at_period_end,
            "Subscription updated"
        );

        Ok(WebhookOutcome::Processed)
    }

    async fn handle_subscription_deleted(
        &self,
        subscription_id: &str,
    ) -> BillingResult<WebhookOutcome> {
        if self.store.delete_subscription(subscription_id).await? {
            tracing::info!(subscription_id = %subscription_id, "Subscription deleted");
            Ok(WebhookOutcome::Processed)
        } else {
            tracing::info!(
                subscription_id = %subscription_id,
                "Subscription already absent, nothing to delete"
            );
            Ok(WebhookOutcome::Ignored)
        }
    }

    /// Renewal payment: reset the subscription's quota to its plan allowance
    async fn handle_invoice_paid(&self, subscription_id: &str) -> BillingResult<WebhookOutcome> {
        let Some(mut record) = self.store.get_subscription(subscription_id).await? else {
            tracing::info!(
                subscription_id = %subscription_id,
                "Invoice paid for unknown subscription, skipping"
            );
            return Ok(WebhookOutcome::Ignored);
        };

        let resolved = find_product_and_plan_by_variant_id(&self.config, &record.variant_id)?;
        record.entitlements = resolved.plan.entitlements;
        self.store.upsert_subscription(&record).await?;

        tracing::info!(
            subscription_id = %record.id,
            account_id = %record.account_id,
            tokens = ?record.entitlements.tokens,
            messages = ?record.entitlements.messages,
            "Subscription quota refilled"
        );

        Ok(WebhookOutcome::Processed)
    }

    async fn handle_order_payment(
        &self,
        order_id: &str,
        status: OrderStatus,
    ) -> BillingResult<WebhookOutcome> {
        if self.store.update_order_status(order_id, status).await? {
            tracing::info!(order_id = %order_id, status = %status, "Order status updated");
            Ok(WebhookOutcome::Processed)
        } else {
            tracing::warn!(
                order_id = %order_id,
                status = %status,
                "Payment event for unknown order, skipping"
            );
            Ok(WebhookOutcome::Ignored)
        }
    }

    async fn notify_invitee(
        &self,
        invitation: Invitation,
        resolved: ProductPlan<'_>,
        account_id: uuid::Uuid,
    ) {
        let notice = PurchaseNotice {
            recipient: invitation.email,
            account_id,
            product_name: resolved.product.name.clone(),
            plan_name: resolved.plan.name.clone(),
            price: resolved.display_price(),
            trial_days: resolved.plan.trial_days,
            invited_by: invitation.invited_by,
        };

        match self.notifier.send_purchase_confirmation(&notice).await {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                recipient = %notice.recipient,
                account_id = %account_id,
                "Purchase confirmation not delivered"
            ),
            Err(e) => tracing::warn!(
                recipient = %notice.recipient,
                account_id = %account_id,
                error = %e,
                "Purchase confirmation failed"
            ),
        }
    }
}

fn order_record(snapshot: OrderSnapshot, provider: BillingProvider) -> OrderRecord {
    OrderRecord {
        id: snapshot.id,
        account_id: snapshot.account_id,
        customer_id: snapshot.customer_id,
        status: snapshot.status,
        variant_id: snapshot.variant_id,
        total_amount: snapshot.total_amount,
        currency: snapshot.currency,
        billing_provider: provider,
    }
}
