#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! LaunchKit API Server
//!
//! Serves the billing webhook and pricing endpoints.

use std::net::SocketAddr;
use std::sync::Arc;

use launchkit_api::{create_router, AppState, Config};
use launchkit_billing::{
    BillingConfig, BillingEventReconciler, BillingRecordStore, EmailConfig, EmailNotifier,
    GatewayClient, InMemoryBillingStore, PgBillingStore, StripeGateway, UnconfiguredGateway,
};
use launchkit_shared::{create_pool, run_migrations, BillingProvider};
use sqlx::PgPool;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,launchkit_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting LaunchKit API Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    // A malformed catalog stops the boot
    let billing_config = match &config.billing_config_path {
        Some(path) => BillingConfig::from_file(path)?,
        None => BillingConfig::default_catalog()?,
    };
    tracing::info!(
        provider = %billing_config.provider,
        products = billing_config.products.len(),
        "Billing configuration loaded"
    );

    let (store, pool): (Arc<dyn BillingRecordStore>, Option<PgPool>) = match &config.database_url
    {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let pool = create_pool(url, config.database_max_connections).await?;
            run_migrations(&pool).await?;
            tracing::info!("Database connection established");
            (Arc::new(PgBillingStore::new(pool.clone())), Some(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, billing records are kept in memory");
            (Arc::new(InMemoryBillingStore::new()), None)
        }
    };

    // Lemon Squeezy payloads are self-contained
    let gateway: Arc<dyn GatewayClient> = match billing_config.provider {
        BillingProvider::Stripe => Arc::new(StripeGateway::from_env()?),
        BillingProvider::LemonSqueezy => Arc::new(UnconfiguredGateway),
    };

    let email_config = EmailConfig {
        dashboard_url: config.public_url.clone(),
        ..EmailConfig::from_env()
    };

    let reconciler = BillingEventReconciler::new(
        Arc::new(billing_config),
        store,
        gateway,
        Arc::new(EmailNotifier::new(email_config)),
        config.webhook_secret.clone(),
    );

    let state = AppState::new(config.clone(), reconciler, pool);
    let app = create_router(state).layer(TraceLayer::new_for_http());

    // Parse bind address
    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
