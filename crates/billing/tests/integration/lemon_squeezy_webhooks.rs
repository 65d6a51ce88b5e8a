use launchkit_billing::{
    parse_configuration, BillingConfig, BillingError, BillingRecordStore, WebhookOutcome,
    WebhookRequest,
};
use launchkit_shared::{BillingProvider, OrderStatus, SubscriptionStatus};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::support::{lemon_squeezy_request, Harness, StaticGateway};

fn catalog() -> BillingConfig {
    parse_configuration(&json!({
        "provider": "lemon-squeezy",
        "products": [{
            "id": "studio",
            "name": "Studio",
            "description": "Everything a small studio needs",
            "currency": "eur",
            "plans": [
                {
                    "id": "studio-monthly",
                    "name": "Studio Monthly",
                    "paymentType": "recurring",
                    "interval": "month",
                    "trialPeriod": 7,
                    "entitlements": { "tokens": 50000, "messages": 500 },
                    "lineItems": [
                        { "id": "1001", "name": "Base", "cost": "29.00", "type": "base" }
                    ]
                },
                {
                    "id": "studio-lifetime",
                    "name": "Studio Lifetime",
                    "paymentType": "one-time",
                    "entitlements": { "tokens": 50000 },
                    "lineItems": [
                        { "id": "2002", "name": "Lifetime", "cost": "349.00", "type": "base" }
                    ]
                }
            ]
        }]
    }))
    .unwrap()
}

fn subscription_event(event_name: &str, custom_data: Value, attributes: Value) -> Value {
    let mut base = json!({
        "customer_id": 42,
        "variant_id": 1001,
        "status": "active",
        "cancelled": false,
        "created_at": "2025-01-01T00:00:00.000000Z",
        "renews_at": "2025-02-01T00:00:00.000000Z",
        "trial_ends_at": null,
        "ends_at": null
    });
    if let (Some(base), Some(overrides)) = (base.as_object_mut(), attributes.as_object()) {
        for (key, value) in overrides {
            base.insert(key.clone(), value.clone());
        }
    }
    json!({
        "meta": { "event_name": event_name, "custom_data": custom_data },
        "data": { "type": "subscriptions", "id": "501", "attributes": base }
    })
}

fn order_event(account: Uuid, variant_id: u64, status: &str) -> Value {
    json!({
        "meta": {
            "event_name": "order_created",
            "custom_data": { "account_id": account.to_string() }
        },
        "data": {
            "type": "orders",
            "id": 9001,
            "attributes": {
                "customer_id": 42,
                "status": status,
                "currency": "EUR",
                "total": 34900,
                "first_order_item": { "variant_id": variant_id }
            }
        }
    })
}

#[tokio::test]
async fn test_subscription_lifecycle() {
    let harness = Harness::new(catalog(), StaticGateway::default());
    let account = Uuid::new_v4();

    let created = subscription_event(
        "subscription_created",
        json!({ "account_id": account.to_string() }),
        json!({ "status": "on_trial", "trial_ends_at": "2025-01-08T00:00:00.000000Z" }),
    );
    let outcome = harness
        .reconciler
        .handle_webhook_event(lemon_squeezy_request(&created))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Processed);

    let record = harness.store.inner.get_subscription("501").await.unwrap().unwrap();
    assert_eq!(record.account_id, account);
    assert_eq!(record.status, SubscriptionStatus::Trialing);
    assert_eq!(record.billing_provider, BillingProvider::LemonSqueezy);
    assert_eq!(record.customer_id, "42");
    assert_eq!(record.variant_id, "1001");
    // Lemon Squeezy does not report currency on subscriptions
    assert_eq!(record.currency, "EUR");
    assert_eq!(record.trial_ends_at.unwrap().unix_timestamp(), 1736294400);
    assert_eq!(record.entitlements.tokens, Some(50_000));

    // Cancellation arrives without custom data
    let cancelled = subscription_event(
        "subscription_cancelled",
        json!({}),
        json!({
            "status": "cancelled",
            "cancelled": true,
            "ends_at": "2025-02-01T00:00:00.000000Z"
        }),
    );
    harness
        .reconciler
        .handle_webhook_event(lemon_squeezy_request(&cancelled))
        .await
        .unwrap();
    let record = harness.store.inner.get_subscription("501").await.unwrap().unwrap();
    assert_eq!(record.status, SubscriptionStatus::Canceled);
    assert!(record.cancel_at_period_end);
    assert_eq!(record.account_id, account);

    let expired = subscription_event(
        "subscription_expired",
        json!({}),
        json!({ "status": "expired" }),
    );
    let outcome = harness
        .reconciler
        .handle_webhook_event(lemon_squeezy_request(&expired))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Processed);
    assert!(harness.store.inner.get_subscription("501").await.unwrap().is_none());
}

#[tokio::test]
async fn test_payment_success_refills_quota() {
    let harness = Harness::new(catalog(), StaticGateway::default());
    let created = subscription_event(
        "subscription_created",
        json!({ "account_id": Uuid::new_v4().to_string() }),
        json!({}),
    );
    harness
        .reconciler
        .handle_webhook_event(lemon_squeezy_request(&created))
        .await
        .unwrap();

    let mut record = harness.store.inner.get_subscription("501").await.unwrap().unwrap();
    assert_eq!(record.status, SubscriptionStatus::Trialing);
    record.entitlements.tokens = Some(0);
    harness.store.inner.upsert_subscription(&record).await.unwrap();

    let paid = json!({
        "meta": { "event_name": "subscription_payment_success" },
        "data": {
            "type": "subscription-invoices",
            "id": "77",
            "attributes": { "subscription_id": 501 }
        }
    });
    let outcome = harness
        .reconciler
        .handle_webhook_event(lemon_squeezy_request(&paid))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Processed);

    let record = harness.store.inner.get_subscription("501").await.unwrap().unwrap();
    assert_eq!(record.entitlements.tokens, Some(50_000));
    assert_eq!(record.entitlements.messages, Some(500));
}

#[tokio::test]
async fn test_one_time_order_is_recorded() {
    let harness = Harness::new(catalog(), StaticGateway::default());
    let account = Uuid::new_v4();

    let outcome = harness
        .reconciler
        .handle_webhook_event(lemon_squeezy_request(&order_event(account, 2002, "paid")))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Processed);

    let order = harness.store.inner.get_order("9001").await.unwrap().unwrap();
    assert_eq!(order.account_id, account);
    assert_eq!(order.status, OrderStatus::Succeeded);
    assert_eq!(order.variant_id, "2002");
    assert_eq!(order.currency, "EUR");
    assert_eq!(order.total_amount.to_string(), "349.00");
    assert_eq!(order.billing_provider, BillingProvider::LemonSqueezy);
}

#[tokio::test]
async fn test_order_for_recurring_plan_is_ignored() {
    let harness = Harness::new(catalog(), StaticGateway::default());

    let outcome = harness
        .reconciler
        .handle_webhook_event(lemon_squeezy_request(&order_event(Uuid::new_v4(), 1001, "paid")))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Ignored);
    assert_eq!(harness.store.writes(), 0);
}

#[tokio::test]
async fn test_refunded_order_is_ignored() {
    let harness = Harness::new(catalog(), StaticGateway::default());

    let outcome = harness
        .reconciler
        .handle_webhook_event(lemon_squeezy_request(&order_event(Uuid::new_v4(), 2002, "refunded")))
        .await
        .unwrap();
    assert_eq!(outcome, WebhookOutcome::Ignored);
    assert_eq!(harness.store.writes(), 0);
}

#[tokio::test]
async fn test_invited_subscription_sends_confirmation() {
    let harness = Harness::new(catalog(), StaticGateway::default());
    let account = Uuid::new_v4();
    let created = subscription_event(
        "subscription_created",
        json!({
            "account_id": account.to_string(),
            "invitation_email": "teammate@example.com",
            "invited_by": "Grace"
        }),
        json!({}),
    );

    harness
        .reconciler
        .handle_webhook_event(lemon_squeezy_request(&created))
        .await
        .unwrap();

    let notices = harness.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].recipient, "teammate@example.com");
    assert_eq!(notices[0].product_name, "Studio");
    assert_eq!(notices[0].plan_name, "Studio Monthly");
    assert_eq!(notices[0].trial_days, Some(7));
}

#[tokio::test]
async fn test_unknown_variant_is_plan_not_found() {
    let harness = Harness::new(catalog(), StaticGateway::default());
    let created = subscription_event(
        "subscription_created",
        json!({ "account_id": Uuid::new_v4().to_string() }),
        json!({ "variant_id": 9999 }),
    );

    let err = harness
        .reconciler
        .handle_webhook_event(lemon_squeezy_request(&created))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::PlanNotFound(ref id) if id == "9999"));
    assert_eq!(harness.store.writes(), 0);
}

#[tokio::test]
async fn test_wrong_secret_is_rejected() {
    let harness = Harness::new(catalog(), StaticGateway::default());
    let event = order_event(Uuid::new_v4(), 2002, "paid");
    let payload = serde_json::to_vec(&event).unwrap();
    let signature =
        launchkit_billing::signature::sign_lemon_squeezy_payload(&payload, "not-the-secret")
            .unwrap();

    let err = harness
        .reconciler
        .handle_webhook_event(WebhookRequest::new(Some(signature), payload))
        .await
        .unwrap_err();
    assert!(matches!(err, BillingError::SignatureVerification(_)));
    assert_eq!(harness.store.writes(), 0);
}
