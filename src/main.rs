use axum::http::HeaderValue;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod amount;
mod api;
mod chain;
mod config;
mod constants;
mod error;
mod ledger;
mod models;
mod services;
mod ton;
mod wallet;

use chain::{ChainGateway, TonCenterClient};
use config::Config;
use constants::API_VERSION;
use ledger::HttpLedgerClient;
use services::{FlowSettings, LedgerOutbox, StakeFlow};
use wallet::{BridgeWalletSigner, DetachedSigner, WalletSigner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arix_earn_gateway=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    config.validate()?;

    tracing::info!("Starting ARIX Earn Gateway");
    tracing::info!("Environment: {}", config.environment);
    tracing::info!("API Version: {}", API_VERSION);

    // Chain client: discovered once, shared by every flow
    let chain = Arc::new(
        TonCenterClient::discover(&config.ton_rpc_endpoints, config.ton_api_key.clone()).await?,
    );
    let rpc_endpoint = chain.endpoint().to_string();
    let gateway = ChainGateway::new(chain);

    let ledger = Arc::new(HttpLedgerClient::new(
        &config.ledger_api_url,
        config.ledger_api_timeout_secs,
    )?);
    let outbox = Arc::new(LedgerOutbox::new(ledger.clone()));
    outbox
        .clone()
        .start(Duration::from_secs(config.ledger_retry_interval_secs));

    let signer: Arc<dyn WalletSigner> = match &config.wallet_bridge_url {
        Some(url) => {
            let approval_timeout = Duration::from_secs(config.tx_valid_for_secs.max(1) as u64);
            let bridge = BridgeWalletSigner::new(url, approval_timeout)?;
            tracing::info!("Wallet bridge: {}", bridge.endpoint());
            Arc::new(bridge)
        }
        None => Arc::new(DetachedSigner),
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let flow = StakeFlow::new(
        gateway,
        signer,
        ledger,
        outbox.clone(),
        FlowSettings::from_config(&config)?,
    )
    .with_shutdown(shutdown_rx);

    let app_state = api::AppState {
        flow: Arc::new(flow),
        config: config.clone(),
        rpc_endpoint,
    };

    // Build router
    let app = build_router(app_state);

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", err);
            }
            tracing::info!("Shutdown requested; cancelling confirmation polls");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let unsent = outbox.pending_references().await;
    if !unsent.is_empty() {
        tracing::error!(
            "Exiting with {} ledger updates still queued: {}",
            unsent.len(),
            unsent.join(", ")
        );
    }

    Ok(())
}

fn build_router(state: api::AppState) -> Router {
    // CORS configuration
    let cors = cors_from_config(&state.config);

    Router::new()
        // Health check
        .route("/health", get(api::health::health_check))
        .route("/health/chain", get(api::health::chain_health))
        // Balances
        .route("/api/v1/earn/balance/{owner}", get(api::earn::get_balance))
        // Client-signed flow
        .route("/api/v1/earn/stake/prepare", post(api::earn::prepare_stake))
        .route(
            "/api/v1/earn/unstake/prepare",
            post(api::earn::prepare_unstake),
        )
        .route("/api/v1/earn/confirm", post(api::earn::confirm))
        // Server-driven flow
        .route("/api/v1/earn/stake", post(api::earn::execute_stake))
        .route("/api/v1/earn/unstake", post(api::earn::execute_unstake))
        // Ledger state (proxied)
        .route("/api/v1/earn/stakes/{owner}", get(api::earn::get_stakes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

fn cors_from_config(config: &Config) -> CorsLayer {
    let raw = config.cors_allowed_origins.trim();
    if raw.is_empty() || raw == "*" {
        return CorsLayer::very_permissive();
    }

    let allowed: Vec<HeaderValue> = raw
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<HeaderValue>().ok())
        .collect();

    if allowed.is_empty() {
        tracing::warn!("No valid CORS origins parsed; falling back to permissive");
        return CorsLayer::very_permissive();
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}
