//! Stripe Mirror API Server
//!
//! Receives Stripe webhooks and keeps a local mirror of the objects they carry.

use std::net::SocketAddr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use stripemirror_api::{routes::create_router, AppState, Config};
use stripemirror_engine::{MemoryStore, NoopHooks, PgStore, StripeClient, WebhookHandler};
use tokio::time::Duration;
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
                .unwrap_or_else(|_| "info,stripemirror_api=debug,stripemirror_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Stripe Mirror API Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!(
        validate_events = config.stripe.validate_events,
        signature_check = config.stripe.webhook_secret.is_some(),
        prefix = %config.stripe_prefix,
        "Configuration loaded"
    );

    let stripe = StripeClient::new(config.stripe.clone());
    let hooks = Arc::new(NoopHooks);

    let webhooks = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await?;
            tracing::info!("Database connection established");

            let store = Arc::new(PgStore::new(pool));
            tracing::info!("Running database migrations...");
            store.migrate().await?;

            WebhookHandler::from_store(store, &stripe, hooks)
        }
        None => {
            tracing::warn!("DATABASE_URL not set - mirroring into process memory only");
            WebhookHandler::from_store(Arc::new(MemoryStore::new()), &stripe, hooks)
        }
    };

    // Build the router
    let app = create_router(AppState::new(config.clone(), webhooks))
        .layer(TraceLayer::new_for_http());

    // Parse bind address
    let addr: SocketAddr = config.bind_address.parse()?;
    tracing::info!("Starting server on {}", addr);

    // Start the server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
