use launchkit_billing::{
    BillingConfig, BillingError, BillingRecordStore, Entitlements, WebhookOutcome, WebhookRequest,
};
use launchkit_shared::{BillingProvider, OrderStatus, SubscriptionStatus};
use serde_json::json;
use uuid::Uuid;

use crate::support::{
    stripe_event, stripe_request, stripe_subscription, CountingStore, Harness, RecordingNotifier,
    StaticGateway,
};

fn catalog() -> BillingConfig {
    BillingConfig::default_catalog().unwrap()
}

fn subscription_checkout(
    event_id: &str,
    subscription_id: &str,
    account: Uuid,
) -> serde_json::Value {
    stripe_event(
        event_id,
        "checkout.session.completed",
        json!({
            "id": format!("cs_{}", subscription_id),
            "object": "checkout.session",
            "mode": "subscription",
            "customer": "cus_123",
            "subscription": subscription_id,
            "client_reference_id": account.to_string(),
            "metadata": {}
        }),
    )
}

// ============================================================================
// Checkout
// ============================================================================

#[tokio::test]
async fn test_checkout_creates_trialing_subscription_for_trial_plan() {
    let gateway = StaticGateway::default()
        .with_subscription(stripe_subscription("sub_pro", "price_pro_monthly", "trialing"));
    let harness = Harness::new(catalog(), gateway);
    let account = Uuid::new_v4();

    let outcome = harness
        .reconciler
        .handle_webhook_event(stripe_request(&subscription_checkout("evt_1", "sub_pro", account)))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Processed);

    let record = harness.store.inner.get_subscription("sub_pro").await.unwrap().unwrap();
    assert_eq!(record.account_id, account);
    assert_eq!(record.status, SubscriptionStatus::Trialing);
    assert_eq!(record.variant_id, "price_pro_monthly");
    assert_eq!(record.billing_provider, BillingProvider::Stripe);
    assert_eq!(record.currency, "USD");
    assert_eq!(
        record.entitlements,
        Entitlements {
            tokens: Some(1_000_000),
            messages: Some(10_000)
        }
    );
    // No trial_end from the gateway: derived from the plan's trial length
    assert_eq!(
        record.trial_ends_at.unwrap() - record.period_starts_at,
        time::Duration::days(14)
    );
}

#[tokio::test]
async fn test_checkout_replay_is_idempotent() {
    let gateway = StaticGateway::default()
        .with_subscription(stripe_subscription("sub_1", "price_starter_monthly", "active"));
    let harness = Harness::new(catalog(), gateway);
    let event = subscription_checkout("evt_1", "sub_1", Uuid::new_v4());

    harness
        .reconciler
        .handle_webhook_event(stripe_request(&event))
        .await
        .unwrap();
    let first = harness.store.inner.get_subscription("sub_1").await.unwrap();

    harness
        .reconciler
        .handle_webhook_event(stripe_request(&event))
        .await
        .unwrap();
    let second = harness.store.inner.get_subscription("sub_1").await.unwrap();

    assert_eq!(harness.store.inner.subscription_count().await, 1);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_invited_checkout_sends_confirmation() {
    let gateway = StaticGateway::default()
        .with_subscription(stripe_subscription("sub_inv", "price_pro_monthly", "trialing"));
    let harness = Harness::new(catalog(), gateway);
    let account = Uuid::new_v4();

    let mut event = subscription_checkout("evt_inv", "sub_inv", account);
    event["data"]["object"]["metadata"] = json!({
        "invitation_email": "invitee@example.com",
        "invited_by": "Ada"
    });

    harness
        .reconciler
        .handle_webhook_event(stripe_request(&event))
        .await
        .unwrap();

    let notices = harness.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].recipient, "invitee@example.com");
    assert_eq!(notices[0].account_id, account);
    assert_eq!(notices[0].product_name, "Pro");
    assert_eq!(notices[0].price.as_deref(), Some("19.99 USD"));
    assert_eq!(notices[0].trial_days, Some(14));
    assert_eq!(notices[0].invited_by.as_deref(), Some("Ada"));
}

#[tokio::test]
async fn test_notification_failure_does_not_fail_webhook() {
    let gateway = StaticGateway::default()
        .with_subscription(stripe_subscription("sub_inv", "price_starter_monthly", "active"));
    let notifier = RecordingNotifier {
        fail: true,
        ..RecordingNotifier::default()
    };
    let harness = Harness::with_parts(catalog(), gateway, CountingStore::default(), notifier);

    let mut event = subscription_checkout("evt_inv", "sub_inv", Uuid::new_v4());
    event["data"]["object"]["metadata"] = json!({ "invitation_email": "invitee@example.com" });

    let outcome = harness
        .reconciler
        .handle_webhook_event(stripe_request(&event))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Processed);
    assert_eq!(harness.notices().len(), 1);
    assert!(harness.store.inner.get_subscription("sub_inv").await.unwrap().is_some());
}

#[tokio::test]
async fn test_checkout_without_invitation_sends_nothing() {
    let gateway = StaticGateway::default()
        .with_subscription(stripe_subscription("sub_1", "price_starter_monthly", "active"));
    let harness = Harness::new(catalog(), gateway);

    harness
        .reconciler
        .handle_webhook_event(stripe_request(&subscription_checkout(
            "evt_1",
            "sub_1",
            Uuid::new_v4(),
        )))
        .await
        .unwrap();
    assert!(harness.notices().is_empty());
}

// ============================================================================
// Subscription state machine
// ============================================================================

#[tokio::test]
async fn test_checkout_update_delete_lifecycle() {
    let gateway = StaticGateway::default()
        .with_subscription(stripe_subscription("sub_1", "price_starter_monthly", "active"));
    let harness = Harness::new(catalog(), gateway);
    let account = Uuid::new_v4();

    // checkout -> active (starter has no trial)
    harness
        .reconciler
        .handle_webhook_event(stripe_request(&subscription_checkout("evt_1", "sub_1", account)))
        .await
        .unwrap();
    let record = harness.store.inner.get_subscription("sub_1").await.unwrap().unwrap();
    assert_eq!(record.status, SubscriptionStatus::Active);

    // updated -> past_due, copied verbatim; account falls back to the stored record
    let updated = stripe_event(
        "evt_2",
        "customer.subscription.updated",
        stripe_subscription("sub_1", "price_starter_monthly", "past_due"),
    );
    let outcome = harness
        .reconciler
        .handle_webhook_event(stripe_request(&updated))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Processed);
    let record = harness.store.inner.get_subscription("sub_1").await.unwrap().unwrap();
    assert_eq!(record.status, SubscriptionStatus::PastDue);
    assert_eq!(record.account_id, account);

    // deleted -> absent
    let deleted = stripe_event(
        "evt_3",
        "customer.subscription.deleted",
        json!({ "id": "sub_1", "object": "subscription" }),
    );
    let outcome = harness
        .reconciler
        .handle_webhook_event(stripe_request(&deleted))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Processed);
    assert!(harness.store.inner.get_subscription("sub_1").await.unwrap().is_none());

    // replayed deletion is a no-op
    let outcome = harness
        .reconciler
        .handle_webhook_event(stripe_request(&deleted))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Ignored);
}

#[tokio::test]
async fn test_canceled_update_after_delete_does_not_recreate_row() {
    let gateway = StaticGateway::default()
        .with_subscription(stripe_subscription("sub_1", "price_starter_monthly", "active"));
    let harness = Harness::new(catalog(), gateway);
    let account = Uuid::new_v4();

    harness
        .reconciler
        .handle_webhook_event(stripe_request(&subscription_checkout("evt_1", "sub_1", account)))
        .await
        .unwrap();
    let deleted = stripe_event(
        "evt_2",
        "customer.subscription.deleted",
        json!({ "id": "sub_1", "object": "subscription" }),
    );
    harness
        .reconciler
        .handle_webhook_event(stripe_request(&deleted))
        .await
        .unwrap();
    let writes = harness.store.writes();

    // Gateways deliver out of order: the cancel update lands after the delete
    let mut canceled = stripe_subscription("sub_1", "price_starter_monthly", "canceled");
    canceled["metadata"] = json!({ "account_id": account.to_string() });
    let outcome = harness
        .reconciler
        .handle_webhook_event(stripe_request(&stripe_event(
            "evt_3",
            "customer.subscription.updated",
            canceled,
        )))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Ignored);

    // Also when the price has since been retired from the catalog
    let expired = stripe_subscription("sub_1", "price_retired", "incomplete_expired");
    let outcome = harness
        .reconciler
        .handle_webhook_event(stripe_request(&stripe_event(
            "evt_4",
            "customer.subscription.updated",
            expired,
        )))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Ignored);

    assert!(harness.store.inner.get_subscription("sub_1").await.unwrap().is_none());
    assert_eq!(harness.store.writes(), writes);
}

#[tokio::test]
async fn test_update_switches_plan_entitlements() {
    let gateway = StaticGateway::default()
        .with_subscription(stripe_subscription("sub_1", "price_starter_monthly", "active"));
    let harness = Harness::new(catalog(), gateway);

    harness
        .reconciler
        .handle_webhook_event(stripe_request(&subscription_checkout(
            "evt_1",
            "sub_1",
            Uuid::new_v4(),
        )))
        .await
        .unwrap();

    let upgraded = stripe_event(
        "evt_2",
        "customer.subscription.updated",
        stripe_subscription("sub_1", "price_enterprise_monthly", "active"),
    );
    harness
        .reconciler
        .handle_webhook_event(stripe_request(&upgraded))
        .await
        .unwrap();

    let record = harness.store.inner.get_subscription("sub_1").await.unwrap().unwrap();
    assert_eq!(record.variant_id, "price_enterprise_monthly");
    assert_eq!(record.entitlements.tokens, Some(10_000_000));
    assert_eq!(record.entitlements.messages, None);
}

#[tokio::test]
async fn test_update_for_unknown_subscription_without_account_is_rejected() {
    let harness = Harness::new(catalog(), StaticGateway::default());
    let updated = stripe_event(
        "evt_2",
        "customer.subscription.updated",
        stripe_subscription("sub_unknown", "price_starter_monthly", "active"),
    );

    let err = harness
        .reconciler
        .handle_webhook_event(stripe_request(&updated))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::InvalidPayload(_)));
    assert_eq!(harness.store.writes(), 0);
}

// ============================================================================
// Renewals
// ============================================================================

#[tokio::test]
async fn test_invoice_paid_refills_quota() {
    let gateway = StaticGateway::default()
        .with_subscription(stripe_subscription("sub_1", "price_starter_monthly", "active"));
    let harness = Harness::new(catalog(), gateway);

    harness
        .reconciler
        .handle_webhook_event(stripe_request(&subscription_checkout(
            "evt_1",
            "sub_1",
            Uuid::new_v4(),
        )))
        .await
        .unwrap();

    // Simulate consumption recorded elsewhere
    let mut record = harness.store.inner.get_subscription("sub_1").await.unwrap().unwrap();
    record.entitlements = Entitlements {
        tokens: Some(12),
        messages: Some(0),
    };
    harness.store.inner.upsert_subscription(&record).await.unwrap();

    let paid = stripe_event(
        "evt_2",
        "invoice.paid",
        json!({ "id": "in_1", "object": "invoice", "subscription": "sub_1" }),
    );
    let outcome = harness
        .reconciler
        .handle_webhook_event(stripe_request(&paid))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Processed);

    let record = harness.store.inner.get_subscription("sub_1").await.unwrap().unwrap();
    assert_eq!(
        record.entitlements,
        Entitlements {
            tokens: Some(100_000),
            messages: Some(1_000)
        }
    );
}

#[tokio::test]
async fn test_invoice_paid_for_unknown_subscription_is_ignored() {
    let harness = Harness::new(catalog(), StaticGateway::default());
    let paid = stripe_event(
        "evt_1",
        "invoice.paid",
        json!({ "id": "in_1", "object": "invoice", "subscription": "sub_ghost" }),
    );

    let outcome = harness
        .reconciler
        .handle_webhook_event(stripe_request(&paid))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Ignored);
    assert_eq!(harness.store.writes(), 0);
}

// ============================================================================
// One-time orders
// ============================================================================

#[tokio::test]
async fn test_async_payment_settles_order() {
    let gateway = StaticGateway::default().with_line_items("cs_order", &["price_starter_lifetime"]);
    let harness = Harness::new(catalog(), gateway);
    let account = Uuid::new_v4();

    let checkout = stripe_event(
        "evt_1",
        "checkout.session.completed",
        json!({
            "id": "cs_order",
            "object": "checkout.session",
            "mode": "payment",
            "customer": "cus_123",
            "client_reference_id": account.to_string(),
            "amount_total": 29900,
            "currency": "usd",
            "payment_status": "unpaid"
        }),
    );
    harness
        .reconciler
        .handle_webhook_event(stripe_request(&checkout))
        .await
        .unwrap();

    let order = harness.store.inner.get_order("cs_order").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.account_id, account);
    assert_eq!(order.total_amount.to_string(), "299.00");

    let succeeded = stripe_event(
        "evt_2",
        "checkout.session.async_payment_succeeded",
        json!({ "id": "cs_order", "object": "checkout.session" }),
    );
    let outcome = harness
        .reconciler
        .handle_webhook_event(stripe_request(&succeeded))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Processed);
    let order = harness.store.inner.get_order("cs_order").await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Succeeded);
}

#[tokio::test]
async fn test_payment_failed_for_unknown_order_is_ignored() {
    let harness = Harness::new(catalog(), StaticGateway::default());
    let failed = stripe_event(
        "evt_1",
        "checkout.session.async_payment_failed",
        json!({ "id": "cs_missing", "object": "checkout.session" }),
    );

    let outcome = harness
        .reconciler
        .handle_webhook_event(stripe_request(&failed))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Ignored);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_invalid_signature_never_writes() {
    let gateway = StaticGateway::default()
        .with_subscription(stripe_subscription("sub_1", "price_starter_monthly", "active"));
    let harness = Harness::new(catalog(), gateway);
    let event = subscription_checkout("evt_1", "sub_1", Uuid::new_v4());

    let mut forged = stripe_request(&event);
    forged.signature = Some(format!(
        "t={},v1={}",
        time::OffsetDateTime::now_utc().unix_timestamp(),
        "ab".repeat(32)
    ));
    let err = harness.reconciler.handle_webhook_event(forged).await.unwrap_err();
    assert!(matches!(err, BillingError::SignatureVerification(_)));

    let unsigned = WebhookRequest::new(None, serde_json::to_vec(&event).unwrap());
    let err = harness.reconciler.handle_webhook_event(unsigned).await.unwrap_err();
    assert!(matches!(err, BillingError::SignatureVerification(_)));

    // Signature computed over a different body
    let mut tampered = stripe_request(&event);
    tampered.payload =
        serde_json::to_vec(&subscription_checkout("evt_1", "sub_1", Uuid::new_v4())).unwrap();
    let err = harness.reconciler.handle_webhook_event(tampered).await.unwrap_err();
    assert!(!err.is_retryable());

    assert_eq!(harness.store.writes(), 0);
}

#[tokio::test]
async fn test_unknown_event_type_is_ignored() {
    let harness = Harness::new(catalog(), StaticGateway::default());
    let event = stripe_event("evt_1", "customer.tax_id.created", json!({ "id": "txi_1" }));

    let outcome = harness
        .reconciler
        .handle_webhook_event(stripe_request(&event))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Ignored);
    assert_eq!(harness.store.writes(), 0);
}

#[tokio::test]
async fn test_unknown_price_is_plan_not_found() {
    let gateway = StaticGateway::default()
        .with_subscription(stripe_subscription("sub_1", "price_ghost", "active"));
    let harness = Harness::new(catalog(), gateway);

    let err = harness
        .reconciler
        .handle_webhook_event(stripe_request(&subscription_checkout(
            "evt_1",
            "sub_1",
            Uuid::new_v4(),
        )))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::PlanNotFound(ref id) if id == "price_ghost"));
    assert!(err.is_retryable());
    assert_eq!(harness.store.writes(), 0);
}

#[tokio::test]
async fn test_persistence_failure_propagates() {
    let gateway = StaticGateway::default()
        .with_subscription(stripe_subscription("sub_1", "price_starter_monthly", "active"));
    let harness = Harness::with_parts(
        catalog(),
        gateway,
        CountingStore::failing(),
        RecordingNotifier::default(),
    );

    let err = harness
        .reconciler
        .handle_webhook_event(stripe_request(&subscription_checkout(
            "evt_1",
            "sub_1",
            Uuid::new_v4(),
        )))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Persistence(_)));
    assert!(err.is_retryable());
    // No local retry
    assert_eq!(harness.store.writes(), 1);
}

#[tokio::test]
async fn test_gateway_failure_propagates() {
    // Gateway knows nothing about the subscription
    let harness = Harness::new(catalog(), StaticGateway::default());

    let err = harness
        .reconciler
        .handle_webhook_event(stripe_request(&subscription_checkout(
            "evt_1",
            "sub_1",
            Uuid::new_v4(),
        )))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::Gateway(_)));
    assert_eq!(harness.store.writes(), 0);
}
