use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use super::AppState;
use crate::amount::{to_decimal, to_fixed_units_or_zero};
use crate::chain::ConfirmationOutcome;
use crate::constants::ARIX_SYMBOL;
use crate::error::{AppError, Result};
use crate::models::{ApiResponse, BalanceView, ConfirmationView};
use crate::services::stake_flow::{FlowReport, PreparedTransaction, StakeRequest, UnstakeRequest};
use crate::ton::Address;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmRequest {
    pub owner: String,
    pub payload_boc: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BalanceQuery {
    pub amount: Option<String>,
}

/// GET /api/v1/earn/balance/{owner}
pub async fn get_balance(
    State(state): State<AppState>,
    Path(owner): Path<String>,
    Query(query): Query<BalanceQuery>,
) -> Result<Json<ApiResponse<BalanceView>>> {
    let (jetton_wallet, balance) = state.flow.balance_of(&owner).await?;
    let decimals = state.flow.settings().decimals;
    let wanted = to_fixed_units_or_zero(query.amount.as_deref(), decimals);

    Ok(Json(ApiResponse::success(BalanceView {
        owner: owner.trim().to_string(),
        jetton_wallet: jetton_wallet.map(|w| w.to_string()),
        balance_units: balance.to_string(),
        balance: to_decimal(Some(balance), decimals),
        balance_known: balance > 0,
        covers_amount: balance > 0 && balance >= wanted,
        symbol: ARIX_SYMBOL,
        decimals,
    })))
}

/// POST /api/v1/earn/stake/prepare
pub async fn prepare_stake(
    State(state): State<AppState>,
    Json(req): Json<StakeRequest>,
) -> Result<Json<ApiResponse<PreparedTransaction>>> {
    let prepared = state.flow.prepare_stake(&req).await?;
    Ok(Json(ApiResponse::success(prepared)))
}

/// POST /api/v1/earn/unstake/prepare
pub async fn prepare_unstake(
    State(state): State<AppState>,
    Json(req): Json<UnstakeRequest>,
) -> Result<Json<ApiResponse<PreparedTransaction>>> {
    let prepared = state.flow.prepare_unstake(&req).await?;
    Ok(Json(ApiResponse::success(prepared)))
}

/// POST /api/v1/earn/confirm
pub async fn confirm(
    State(state): State<AppState>,
    Json(req): Json<ConfirmRequest>,
) -> Result<Json<ApiResponse<ConfirmationView>>> {
    let outcome = state
        .flow
        .await_confirmation(&req.owner, &req.payload_boc, req.timeout_ms)
        .await?;

    let view = match outcome {
        ConfirmationOutcome::Confirmed(tx) => ConfirmationView {
            confirmed: true,
            cancelled: false,
            tx_hash: Some(tx.hash),
            tx_lt: Some(tx.lt),
        },
        ConfirmationOutcome::TimedOut => ConfirmationView {
            confirmed: false,
            cancelled: false,
            tx_hash: None,
            tx_lt: None,
        },
        ConfirmationOutcome::Cancelled => ConfirmationView {
            confirmed: false,
            cancelled: true,
            tx_hash: None,
            tx_lt: None,
        },
    };
    Ok(Json(ApiResponse::success(view)))
}

/// POST /api/v1/earn/stake
pub async fn execute_stake(
    State(state): State<AppState>,
    Json(req): Json<StakeRequest>,
) -> Result<Json<ApiResponse<FlowReport>>> {
    let report = state.flow.execute_stake(req).await?;
    Ok(Json(ApiResponse::success(report)))
}

/// POST /api/v1/earn/unstake
pub async fn execute_unstake(
    State(state): State<AppState>,
    Json(req): Json<UnstakeRequest>,
) -> Result<Json<ApiResponse<FlowReport>>> {
    let report = state.flow.execute_unstake(req).await?;
    Ok(Json(ApiResponse::success(report)))
}

/// GET /api/v1/earn/stakes/{owner}
pub async fn get_stakes(
    State(state): State<AppState>,
    Path(owner): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>> {
    let owner: Address = owner.parse()?;
    let stakes = state
        .flow
        .ledger()
        .get_stakes(&owner.to_string())
        .await
        .map_err(|e| AppError::ExternalAPI(format!("Could not load stakes: {}", e)))?;
    Ok(Json(ApiResponse::success(stakes)))
}
