use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::amount::AmountError;
use crate::ton::{AddressError, CellError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(#[from] AmountError),

    #[error("Invalid address: {0}")]
    InvalidAddress(#[from] AddressError),

    #[error("Cell encoding error: {0}")]
    Cell(#[from] CellError),

    #[error("Blockchain RPC error: {0}")]
    BlockchainRPC(String),

    #[error("Insufficient balance")]
    InsufficientBalance,

    #[error("Wallet rejected the transaction: {0}")]
    WalletRejected(String),

    #[error("Another operation is already in progress for {0}")]
    FlowInProgress(String),

    #[error("Ledger update failed after on-chain transaction {tx_reference}: {message}")]
    LedgerDesync {
        tx_reference: String,
        message: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("External API error: {0}")]
    ExternalAPI(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut details = None;
        let (status, code, message) = match self {
            AppError::InvalidAmount(ref e) => {
                (StatusCode::BAD_REQUEST, "INVALID_AMOUNT", e.to_string())
            }
            AppError::InvalidAddress(ref e) => {
                (StatusCode::BAD_REQUEST, "INVALID_ADDRESS", e.to_string())
            }
            AppError::BadRequest(ref msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::NotFound(ref msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::InsufficientBalance => (
                StatusCode::BAD_REQUEST,
                "INSUFFICIENT_BALANCE",
                "Insufficient ARIX balance for this operation".to_string(),
            ),
            AppError::WalletRejected(ref msg) => (
                StatusCode::CONFLICT,
                "WALLET_REJECTED",
                format!("Transaction was not signed: {}", msg),
            ),
            AppError::FlowInProgress(_) => (
                StatusCode::CONFLICT,
                "FLOW_IN_PROGRESS",
                "A previous stake or unstake is still being processed. Please wait.".to_string(),
            ),
            AppError::LedgerDesync {
                ref tx_reference,
                ref message,
            } => {
                details = Some(serde_json::json!({
                    "tx_reference": tx_reference,
                    "cause": message,
                }));
                (
                    StatusCode::BAD_GATEWAY,
                    "LEDGER_DESYNC",
                    format!(
                        "Your transaction {} was sent on-chain but our records could not be updated. \
                         Keep this transaction reference and contact support.",
                        tx_reference
                    ),
                )
            }
            AppError::BlockchainRPC(ref msg) => {
                (StatusCode::BAD_GATEWAY, "BLOCKCHAIN_RPC_ERROR", msg.clone())
            }
            AppError::ExternalAPI(ref msg) => {
                (StatusCode::BAD_GATEWAY, "EXTERNAL_API_ERROR", msg.clone())
            }
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                self.to_string(),
            ),
        };

        let body = Json(ErrorResponse {
            success: false,
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details,
            },
        });

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
