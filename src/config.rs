use serde::Deserialize;
use std::env;

use crate::constants::{
    ARIX_DECIMALS, DEFAULT_CONFIRM_POLL_INTERVAL_MS, DEFAULT_CONFIRM_TIMEOUT_MS,
    DEFAULT_LEDGER_RETRY_INTERVAL_SECS, DEFAULT_LEDGER_TIMEOUT_SECS,
    DEFAULT_STAKE_FORWARD_TON_NANO, DEFAULT_STAKE_GAS_TON_NANO, DEFAULT_TX_VALID_FOR_SECS,
    DEFAULT_UNSTAKE_GAS_TON_NANO,
};
use crate::ton::Address;

const DEFAULT_TON_RPC_ENDPOINT: &str = "https://toncenter.com/api/v2/jsonRPC";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Server
    pub host: String,
    pub port: u16,
    pub environment: String,

    // Chain
    pub ton_rpc_endpoints: Vec<String>,
    pub ton_api_key: Option<String>,

    // Contract Addresses
    pub arix_jetton_master_address: String,
    pub arix_staking_contract_address: String,
    pub arix_decimals: u32,

    // Ledger backend
    pub ledger_api_url: String,
    pub ledger_api_timeout_secs: u64,
    pub ledger_retry_interval_secs: u64,

    // Wallet bridge
    pub wallet_bridge_url: Option<String>,

    // Message values (nanotons)
    pub stake_forward_ton_nano: u128,
    pub stake_gas_ton_nano: u128,
    pub unstake_gas_ton_nano: u128,

    // Confirmation
    pub tx_valid_for_secs: i64,
    pub confirm_timeout_ms: u64,
    pub confirm_poll_interval_ms: u64,

    // CORS
    pub cors_allowed_origins: String,
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),

            ton_rpc_endpoints: split_list(
                &env::var("TON_RPC_ENDPOINTS")
                    .unwrap_or_else(|_| DEFAULT_TON_RPC_ENDPOINT.to_string()),
            ),
            ton_api_key: non_empty("TON_API_KEY"),

            arix_jetton_master_address: env::var("ARIX_JETTON_MASTER_ADDRESS")?,
            arix_staking_contract_address: env::var("ARIX_STAKING_CONTRACT_ADDRESS")?,
            arix_decimals: env::var("ARIX_DECIMALS")
                .unwrap_or_else(|_| ARIX_DECIMALS.to_string())
                .parse()?,

            ledger_api_url: env::var("LEDGER_API_URL")?,
            ledger_api_timeout_secs: env::var("LEDGER_API_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_LEDGER_TIMEOUT_SECS),
            ledger_retry_interval_secs: env::var("LEDGER_RETRY_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(DEFAULT_LEDGER_RETRY_INTERVAL_SECS),

            wallet_bridge_url: non_empty("WALLET_BRIDGE_URL"),

            stake_forward_ton_nano: env::var("STAKE_FORWARD_TON_NANO")
                .unwrap_or_else(|_| DEFAULT_STAKE_FORWARD_TON_NANO.to_string())
                .parse()?,
            stake_gas_ton_nano: env::var("STAKE_GAS_TON_NANO")
                .unwrap_or_else(|_| DEFAULT_STAKE_GAS_TON_NANO.to_string())
                .parse()?,
            unstake_gas_ton_nano: env::var("UNSTAKE_GAS_TON_NANO")
                .unwrap_or_else(|_| DEFAULT_UNSTAKE_GAS_TON_NANO.to_string())
                .parse()?,

            tx_valid_for_secs: env::var("TX_VALID_FOR_SECS")
                .unwrap_or_else(|_| DEFAULT_TX_VALID_FOR_SECS.to_string())
                .parse()?,
            confirm_timeout_ms: env::var("CONFIRM_TIMEOUT_MS")
                .unwrap_or_else(|_| DEFAULT_CONFIRM_TIMEOUT_MS.to_string())
                .parse()?,
            confirm_poll_interval_ms: env::var("CONFIRM_POLL_INTERVAL_MS")
                .unwrap_or_else(|_| DEFAULT_CONFIRM_POLL_INTERVAL_MS.to_string())
                .parse()?,

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "*".to_string()),
        })
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ton_rpc_endpoints.is_empty() {
            anyhow::bail!("TON_RPC_ENDPOINTS is empty");
        }
        for endpoint in &self.ton_rpc_endpoints {
            if let Err(err) = url::Url::parse(endpoint) {
                anyhow::bail!("TON_RPC_ENDPOINTS entry {} is not a URL: {}", endpoint, err);
            }
        }
        if let Err(err) = self.arix_jetton_master_address.parse::<Address>() {
            anyhow::bail!("ARIX_JETTON_MASTER_ADDRESS is invalid: {}", err);
        }
        if let Err(err) = self.arix_staking_contract_address.parse::<Address>() {
            anyhow::bail!("ARIX_STAKING_CONTRACT_ADDRESS is invalid: {}", err);
        }
        if self.arix_decimals > crate::amount::MAX_DECIMALS {
            anyhow::bail!("ARIX_DECIMALS must be at most {}", crate::amount::MAX_DECIMALS);
        }
        if let Err(err) = url::Url::parse(&self.ledger_api_url) {
            anyhow::bail!("LEDGER_API_URL is invalid: {}", err);
        }
        if self.confirm_poll_interval_ms == 0 {
            anyhow::bail!("CONFIRM_POLL_INTERVAL_MS must be > 0");
        }
        if self.tx_valid_for_secs <= 0 {
            anyhow::bail!("TX_VALID_FOR_SECS must be > 0");
        }

        if self.arix_decimals != ARIX_DECIMALS {
            tracing::warn!(
                "ARIX_DECIMALS={} differs from the token's {} decimals",
                self.arix_decimals,
                ARIX_DECIMALS
            );
        }
        if self.confirm_timeout_ms < self.confirm_poll_interval_ms {
            tracing::warn!("CONFIRM_TIMEOUT_MS is shorter than one poll interval");
        }
        if self.wallet_bridge_url.is_none() {
            tracing::warn!("WALLET_BRIDGE_URL not set; server-driven stake/unstake is disabled");
        }
        if self.ton_api_key.is_none() {
            tracing::warn!("TON_API_KEY not set; public RPC rate limits apply");
        }
        if self.cors_allowed_origins.trim().is_empty() {
            tracing::warn!("CORS_ALLOWED_ORIGINS is empty; requests may be blocked");
        }

        Ok(())
    }

    pub fn is_testnet(&self) -> bool {
        if self.environment == "development" || self.environment == "testnet" {
            return true;
        }
        self.ton_rpc_endpoints
            .iter()
            .any(|endpoint| endpoint.contains("testnet"))
    }
}
