//! Activation Key Service - Main Application Entry Point
//!
//! REST API server that stores activation keys per product variant and
//! allocates them to completed orders exactly once.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Open the store: PostgreSQL (pool + migrations) or in-memory
//! 3. Register the bootstrap API key, if configured
//! 4. Pick the notifier: signed webhook or log only
//! 5. Build HTTP router with routes and middleware
//! 6. Start server on configured port

use std::sync::Arc;

use activation_key_service::{
    config::Config,
    db,
    middleware::auth::hash_api_key,
    notify::{LogNotifier, Notifier, WebhookNotifier},
    routes,
    state::AppState,
    store::{MemoryStore, PgStore, Store},
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    let store: Arc<dyn Store> = match &config.database_url {
        Some(database_url) => {
            let pool = db::create_pool(database_url, config.database_max_connections).await?;
            tracing::info!("Database pool created");

            db::run_migrations(&pool).await?;
            tracing::info!("Database migrations complete");

            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store; keys are lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    if let Some(api_key) = &config.bootstrap_api_key {
        let record = store
            .register_api_key(&hash_api_key(api_key), &config.bootstrap_api_key_label)
            .await?;
        tracing::info!(api_key_id = %record.id, label = %record.label, "Bootstrap API key registered");
    }

    let notifier: Arc<dyn Notifier> = match (
        &config.notification_webhook_url,
        &config.notification_webhook_secret,
    ) {
        (Some(url), Some(secret)) => {
            tracing::info!("Customer notifications go to the configured webhook");
            Arc::new(WebhookNotifier::new(url, secret, config.notification_timeout())?)
        }
        _ => {
            tracing::warn!("NOTIFICATION_WEBHOOK_URL not set, notifications are logged only");
            Arc::new(LogNotifier)
        }
    };

    let state = AppState::new(store, notifier, config.retry_policy());
    let app = routes::router(state);

    // Bind to network address and start server
    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C; in-flight requests are allowed to finish.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        // Without a signal handler, keep serving until the process is killed
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
