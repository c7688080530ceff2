// src/models/mod.rs
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Jetton wallet and ARIX balance of an owner.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceView {
    pub owner: String,
    pub jetton_wallet: Option<String>,
    pub balance_units: String,
    pub balance: f64,
    /// False when the chain read failed; a zero balance is then not authoritative.
    pub balance_known: bool,
    /// Whether a known balance covers the `amount` query parameter (zero when absent).
    pub covers_amount: bool,
    pub symbol: &'static str,
    pub decimals: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationView {
    pub confirmed: bool,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_lt: Option<String>,
}
