use axum::{extract::State, Json};
use serde::Serialize;

use super::AppState;
use crate::chain::TonCenterClient;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub network: String,
    pub rpc_endpoint: String,
    pub ledger_retry_queue: usize,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let network = if state.config.is_testnet() {
        "testnet"
    } else {
        "mainnet"
    };

    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        network: network.to_string(),
        rpc_endpoint: state.rpc_endpoint.clone(),
        ledger_retry_queue: state.flow.outbox().len().await,
    })
}

/// Live probe of the configured RPC endpoint.
pub async fn chain_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let probe = match TonCenterClient::new(
        state.rpc_endpoint.clone(),
        state.config.ton_api_key.clone(),
    ) {
        Ok(client) => client.get_masterchain_seqno().await,
        Err(err) => Err(err),
    };
    Json(match probe {
        Ok(seqno) => serde_json::json!({ "status": "ok", "masterchainSeqno": seqno }),
        Err(err) => serde_json::json!({ "status": "degraded", "error": err.to_string() }),
    })
}
