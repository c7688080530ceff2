use serde::Serialize;
use std::time::Duration;
use url::Url;

use super::{SignedTransaction, TransactionRequest, WalletSigner};
use crate::constants::RPC_CONNECT_TIMEOUT_SECS;
use crate::error::{AppError, Result};
use crate::ton::Address;

#[derive(Debug, Serialize)]
struct BridgeSendRequest<'a> {
    owner: String,
    transaction: &'a TransactionRequest,
}

/// Relays sign requests to a TON Connect bridge service. The bridge holds the session
/// with the user's wallet and answers once the user approved or declined.
#[derive(Debug, Clone)]
pub struct BridgeWalletSigner {
    endpoint: Url,
    client: reqwest::Client,
}

impl BridgeWalletSigner {
    pub fn new(bridge_url: &str, approval_timeout: Duration) -> Result<Self> {
        let base = Url::parse(bridge_url.trim_end_matches('/'))
            .map_err(|e| AppError::Internal(format!("Invalid wallet bridge URL: {}", e)))?;
        let endpoint = Url::parse(&format!("{}/send-transaction", base.as_str().trim_end_matches('/')))
            .map_err(|e| AppError::Internal(format!("Invalid wallet bridge URL: {}", e)))?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(RPC_CONNECT_TIMEOUT_SECS))
            .timeout(approval_timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Wallet bridge HTTP client init failed: {}", e)))?;
        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }
}

#[async_trait::async_trait]
impl WalletSigner for BridgeWalletSigner {
    async fn send_transaction(
        &self,
        owner: &Address,
        request: &TransactionRequest,
    ) -> Result<SignedTransaction> {
        let body = BridgeSendRequest {
            owner: owner.to_string(),
            transaction: request,
        };
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ExternalAPI(format!("Wallet bridge request failed: {}", e)))?;

        let status = response.status();
        if status.is_client_error() {
            let reason = response.text().await.unwrap_or_default();
            tracing::info!("Wallet of {} declined the request ({}): {}", owner, status, reason);
            return Err(AppError::WalletRejected(if reason.trim().is_empty() {
                "Transaction was declined in the wallet".to_string()
            } else {
                reason
            }));
        }
        if !status.is_success() {
            let reason = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalAPI(format!(
                "Wallet bridge returned {}: {}",
                status, reason
            )));
        }

        let signed: SignedTransaction = response
            .json()
            .await
            .map_err(|e| AppError::ExternalAPI(format!("Wallet bridge response parse failed: {}", e)))?;
        if signed.boc.trim().is_empty() {
            return Err(AppError::ExternalAPI(
                "Wallet bridge returned an empty BOC".to_string(),
            ));
        }
        Ok(signed)
    }
}
