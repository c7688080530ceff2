//! Wallet-signing capability: hands a TON Connect request to the owner's wallet and gets
//! the signed external message back.
pub mod bridge;

pub use bridge::BridgeWalletSigner;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::ton::{Address, Cell};

/// One internal message the wallet is asked to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub address: String,
    /// Nanotons as a decimal string.
    pub amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl OutgoingMessage {
    pub fn new(destination: &Address, amount_nano: u128, payload: Option<&Cell>) -> Result<Self> {
        let payload = match payload {
            Some(cell) => Some(cell.to_boc_base64()?),
            None => None,
        };
        Ok(Self {
            address: destination.to_string(),
            amount: amount_nano.to_string(),
            payload,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    pub valid_until: i64,
    pub messages: Vec<OutgoingMessage>,
}

impl TransactionRequest {
    pub fn single(message: OutgoingMessage, valid_for_secs: i64) -> Self {
        Self {
            valid_until: chrono::Utc::now().timestamp() + valid_for_secs,
            messages: vec![message],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    /// Base64 BOC of the signed external message.
    pub boc: String,
}

impl SignedTransaction {
    /// Hex hash of the signed external message, usable as a reference before the
    /// transaction id is known.
    pub fn message_hash(&self) -> Result<String> {
        let cell = Cell::from_boc_base64(&self.boc)?;
        Ok(cell.hash_hex())
    }
}

#[async_trait::async_trait]
pub trait WalletSigner: Send + Sync {
    async fn send_transaction(
        &self,
        owner: &Address,
        request: &TransactionRequest,
    ) -> Result<SignedTransaction>;
}

/// Used when no wallet bridge is configured: the mini-app signs prepared requests itself.
pub struct DetachedSigner;

#[async_trait::async_trait]
impl WalletSigner for DetachedSigner {
    async fn send_transaction(
        &self,
        _owner: &Address,
        _request: &TransactionRequest,
    ) -> Result<SignedTransaction> {
        Err(AppError::BadRequest(
            "No wallet bridge configured; use the prepare endpoints and sign in the wallet"
                .to_string(),
        ))
    }
}
