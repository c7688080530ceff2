//! Remote ledger API: the backend that books stakes and rewards once the chain has moved.
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::constants::RPC_CONNECT_TIMEOUT_SECS;
use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnchainStatus {
    Confirmed,
    /// Submitted but not observed before the confirmation deadline.
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordStakeRequest {
    pub user_wallet_address: String,
    pub stake_identifier: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub arix_amount: Decimal,
    pub duration_days: u32,
    pub arix_lock_apr_bps: u16,
    pub arix_lock_penalty_bps: u16,
    pub transaction_boc: String,
    pub transaction_hash: String,
    pub onchain_status: OnchainStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmUnstakeRequest {
    pub user_wallet_address: String,
    pub stake_identifier: String,
    pub unstake_transaction_boc: String,
    pub unstake_transaction_hash: String,
    pub onchain_status: OnchainStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerReceipt {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A ledger write that must eventually reach the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerNotification {
    RecordStake(RecordStakeRequest),
    ConfirmUnstake(ConfirmUnstakeRequest),
}

impl LedgerNotification {
    pub fn tx_reference(&self) -> &str {
        match self {
            LedgerNotification::RecordStake(req) => &req.transaction_hash,
            LedgerNotification::ConfirmUnstake(req) => &req.unstake_transaction_hash,
        }
    }

    pub fn wallet(&self) -> &str {
        match self {
            LedgerNotification::RecordStake(req) => &req.user_wallet_address,
            LedgerNotification::ConfirmUnstake(req) => &req.user_wallet_address,
        }
    }

    pub async fn deliver(&self, ledger: &dyn LedgerApi) -> Result<LedgerReceipt> {
        match self {
            LedgerNotification::RecordStake(req) => ledger.record_stake(req).await,
            LedgerNotification::ConfirmUnstake(req) => ledger.confirm_unstake(req).await,
        }
    }
}

#[async_trait::async_trait]
pub trait LedgerApi: Send + Sync {
    async fn record_stake(&self, request: &RecordStakeRequest) -> Result<LedgerReceipt>;

    async fn confirm_unstake(&self, request: &ConfirmUnstakeRequest) -> Result<LedgerReceipt>;

    async fn get_stakes(&self, wallet: &str) -> Result<Value>;
}

#[derive(Debug, Clone)]
pub struct HttpLedgerClient {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpLedgerClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let normalized = format!("{}/", base_url.trim().trim_end_matches('/'));
        let base_url = Url::parse(&normalized)
            .map_err(|e| AppError::Internal(format!("Invalid ledger URL: {}", e)))?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(RPC_CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|e| AppError::Internal(format!("Ledger HTTP client init failed: {}", e)))?;
        Ok(Self { base_url, client })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| AppError::Internal(format!("Invalid ledger path {}: {}", path, e)))
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::ExternalAPI(format!(
                "Ledger {} failed with {}: {}",
                what, status, body
            )));
        }
        response
            .json()
            .await
            .map_err(|e| AppError::ExternalAPI(format!("Ledger {} parse failed: {}", what, e)))
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B, what: &str) -> Result<LedgerReceipt> {
        let response = self
            .client
            .post(self.url(path)?)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::ExternalAPI(format!("Ledger {} request failed: {}", what, e)))?;
        Self::read_json(response, what).await
    }
}

#[async_trait::async_trait]
impl LedgerApi for HttpLedgerClient {
    async fn record_stake(&self, request: &RecordStakeRequest) -> Result<LedgerReceipt> {
        self.post("earn/stake", request, "stake record").await
    }

    async fn confirm_unstake(&self, request: &ConfirmUnstakeRequest) -> Result<LedgerReceipt> {
        self.post("earn/confirm-arix-unstake", request, "unstake confirmation")
            .await
    }

    async fn get_stakes(&self, wallet: &str) -> Result<Value> {
        let mut url = self.url("earn/stakes/")?;
        url.path_segments_mut()
            .map_err(|_| AppError::Internal("Ledger URL cannot take path segments".to_string()))?
            .pop_if_empty()
            .push(wallet.trim());
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::ExternalAPI(format!("Ledger stakes request failed: {}", e)))?;
        Self::read_json(response, "stakes lookup").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn stake_request() -> RecordStakeRequest {
        RecordStakeRequest {
            user_wallet_address: "EQowner".to_string(),
            stake_identifier: "1700000000000".to_string(),
            arix_amount: Decimal::from_str("100.5").expect("decimal"),
            duration_days: 30,
            arix_lock_apr_bps: 0,
            arix_lock_penalty_bps: 500,
            transaction_boc: "te6cc".to_string(),
            transaction_hash: "abc".to_string(),
            onchain_status: OnchainStatus::Pending,
        }
    }

    #[test]
    fn stake_record_uses_camel_case_fields() {
        let json = serde_json::to_value(stake_request()).expect("json");
        assert_eq!(json["userWalletAddress"], "EQowner");
        assert_eq!(json["arixLockPenaltyBps"], 500);
        assert_eq!(json["onchainStatus"], "pending");
        assert_eq!(json["arixAmount"], "100.5");
    }

    #[test]
    fn stake_amount_keeps_every_digit_on_the_wire() {
        let mut request = stake_request();
        request.arix_amount = Decimal::from_str("123456789.123456789").expect("decimal");
        let body = serde_json::to_string(&request).expect("json");
        assert!(body.contains(r#""arixAmount":"123456789.123456789""#));

        let parsed: RecordStakeRequest = serde_json::from_str(&body).expect("parse");
        assert_eq!(parsed.arix_amount, request.arix_amount);
    }

    #[test]
    fn notification_exposes_reference() {
        let notification = LedgerNotification::RecordStake(stake_request());
        assert_eq!(notification.tx_reference(), "abc");
        assert_eq!(notification.wallet(), "EQowner");

        let unstake = LedgerNotification::ConfirmUnstake(ConfirmUnstakeRequest {
            user_wallet_address: "EQother".to_string(),
            stake_identifier: "7".to_string(),
            unstake_transaction_boc: String::new(),
            unstake_transaction_hash: "def".to_string(),
            onchain_status: OnchainStatus::Confirmed,
        });
        assert_eq!(unstake.tx_reference(), "def");
    }

    #[test]
    fn ledger_paths_resolve_under_base() {
        let client = HttpLedgerClient::new("https://api.example.org/api", 5).expect("client");
        assert_eq!(
            client.url("earn/stake").expect("url").as_str(),
            "https://api.example.org/api/earn/stake"
        );
        assert!(HttpLedgerClient::new("::", 5).is_err());
    }

    #[test]
    fn receipt_accepts_arbitrary_fields() {
        let receipt: LedgerReceipt =
            serde_json::from_value(serde_json::json!({"message": "ok", "stake": {"id": 1}}))
                .expect("receipt");
        assert_eq!(receipt.message.as_deref(), Some("ok"));
        assert!(receipt.extra.contains_key("stake"));
    }
}
