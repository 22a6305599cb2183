use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod auth;
pub mod config;
pub mod context;
pub mod error;
pub mod message;
pub mod metrics;
pub mod routes;
pub mod service;
pub mod store;
pub mod utils;

use auth::{
    AuthGate, Ed25519Verifier, HttpKeyDirectory, KeyDirectory, RemoteVerifier, SignatureVerifier,
    StaticKeyDirectory,
};
use config::{AuthConfig, Config};
use context::AppContext;
use service::InboxService;

const STORE_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds the authorization gate from its configured capabilities
pub fn build_auth_gate(config: &AuthConfig) -> Result<AuthGate> {
    let directory: Arc<dyn KeyDirectory> = match &config.key_directory_url {
        Some(url) => {
            tracing::info!("Resolving public keys from {}", url);
            Arc::new(HttpKeyDirectory::new(
                url.clone(),
                config.timeout(),
                Duration::from_secs(config.key_cache_ttl_secs),
            )?)
        }
        None => {
            tracing::warn!(
                identities = config.static_public_keys.len(),
                "Using static public key directory"
            );
            Arc::new(StaticKeyDirectory::new(config.static_public_keys.clone()))
        }
    };

    let verifier: Arc<dyn SignatureVerifier> = match &config.verifier_url {
        Some(url) => {
            tracing::info!("Verifying signatures with remote evaluator at {}", url);
            Arc::new(RemoteVerifier::new(url.clone(), config.timeout())?)
        }
        None => Arc::new(Ed25519Verifier::new()),
    };

    Ok(AuthGate::new(directory, verifier, config.timeout()))
}

/// Connects the configured store and wires the inbox service around it
pub async fn build_inbox(config: &Config) -> Result<InboxService> {
    let gate = build_auth_gate(&config.auth)?;

    let store = tokio::time::timeout(STORE_CONNECT_TIMEOUT, store::connect(&config.store))
        .await
        .map_err(|_| {
            anyhow::anyhow!(
                "Store connection timed out after {} seconds",
                STORE_CONNECT_TIMEOUT.as_secs()
            )
        })??;

    Ok(InboxService::new(
        gate,
        store,
        config.logging.clone(),
        config.delivery_details,
    ))
}

fn redact_url(url: &str) -> String {
    match url.find('@') {
        Some(at_pos) => {
            let protocol_end = url.find("://").map(|p| p + 3).unwrap_or(0);
            format!("{}***{}", &url[..protocol_end], &url[at_pos..])
        }
        None => url.to_string(),
    }
}

pub async fn run() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.rust_log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if std::env::var("LOG_HASH_SALT").is_err() {
        tracing::warn!("LOG_HASH_SALT not set, using a random per-process salt");
    }

    let app_config = Arc::new(config);
    tracing::info!(
        backend = ?app_config.store.backend,
        redis = %redact_url(&app_config.store.redis_url),
        "Starting inbox server"
    );

    let inbox = build_inbox(&app_config).await?;
    let app_context = Arc::new(AppContext::new(inbox.clone(), app_config.clone()));
    let app = routes::create_router(app_context);

    let bind_address = app_config.bind_address();
    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_address))?;
    tracing::info!("Inbox server listening on http://{}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received. Shutting down...");
        })
        .await
        .context("Server error")?;

    inbox.close().await;
    tracing::info!("Inbox server stopped");
    Ok(())
}
