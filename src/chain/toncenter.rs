use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::{ChainMessage, ChainQuery, ChainTransaction, StackEntry};
use crate::constants::{RPC_CONNECT_TIMEOUT_SECS, RPC_REQUEST_TIMEOUT_SECS};
use crate::error::{AppError, Result};
use crate::ton::{Address, Cell};

fn rpc_request(method: &str, params: Value) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
        "id": 1
    })
}

fn run_get_method_params(address: &str, method: &str, stack: Vec<Value>) -> Value {
    serde_json::json!({
        "address": address,
        "method": method,
        "stack": stack
    })
}

fn encode_stack_entry(entry: &StackEntry) -> Result<Value> {
    Ok(match entry {
        StackEntry::Int(value) => serde_json::json!(["num", value.to_string()]),
        StackEntry::Cell(cell) => serde_json::json!(["tvm.Cell", cell.to_boc_base64()?]),
        StackEntry::Slice(cell) => serde_json::json!(["tvm.Slice", cell.to_boc_base64()?]),
        StackEntry::Other(kind) => {
            return Err(AppError::BadRequest(format!(
                "Stack entry of type {} cannot be sent",
                kind
            )))
        }
    })
}

fn parse_tvm_int(raw: &str) -> Option<i128> {
    let (negative, digits) = match raw.trim().strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw.trim()),
    };
    let magnitude = match digits.strip_prefix("0x") {
        Some(hex) => i128::from_str_radix(hex, 16).ok()?,
        None => digits.parse::<i128>().ok()?,
    };
    Some(if negative { -magnitude } else { magnitude })
}

fn decode_stack_entry(entry: &Value) -> Result<StackEntry> {
    let kind = entry.get(0).and_then(Value::as_str).unwrap_or_default();
    let value = entry.get(1).unwrap_or(&Value::Null);
    match kind {
        "num" => {
            let raw = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
            parse_tvm_int(&raw)
                .map(StackEntry::Int)
                .ok_or_else(|| AppError::BlockchainRPC(format!("Invalid stack number: {}", raw)))
        }
        "cell" | "slice" => {
            let bytes = value
                .get("bytes")
                .and_then(Value::as_str)
                .ok_or_else(|| AppError::BlockchainRPC("Stack cell without bytes".to_string()))?;
            let cell = Cell::from_boc_base64(bytes)?;
            Ok(if kind == "cell" {
                StackEntry::Cell(cell)
            } else {
                StackEntry::Slice(cell)
            })
        }
        other => Ok(StackEntry::Other(other.to_string())),
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    #[serde(default = "default_ok")]
    ok: bool,
    result: Option<T>,
    error: Option<String>,
}

fn default_ok() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct RunGetMethodResult {
    #[serde(default)]
    stack: Vec<Value>,
    exit_code: i32,
}

#[derive(Debug, Deserialize)]
struct MasterchainInfo {
    last: BlockIdExt,
}

#[derive(Debug, Deserialize)]
struct BlockIdExt {
    seqno: u64,
}

#[derive(Debug, Deserialize)]
struct RawTransaction {
    #[serde(default)]
    utime: i64,
    transaction_id: RawTransactionId,
    in_msg: Option<RawMessage>,
    #[serde(default)]
    out_msgs: Vec<RawMessage>,
}

#[derive(Debug, Deserialize)]
struct RawTransactionId {
    lt: String,
    hash: String,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    source: String,
    #[serde(default)]
    destination: String,
    #[serde(default)]
    value: String,
    msg_data: Option<RawMessageData>,
}

#[derive(Debug, Deserialize)]
struct RawMessageData {
    body: Option<String>,
}

impl From<RawMessage> for ChainMessage {
    fn from(raw: RawMessage) -> Self {
        let body = raw
            .msg_data
            .and_then(|data| data.body)
            .filter(|b| !b.is_empty())
            .and_then(|b| match Cell::from_boc_base64(&b) {
                Ok(cell) => Some(cell),
                Err(err) => {
                    tracing::debug!("Skipping undecodable message body: {}", err);
                    None
                }
            });
        let non_empty = |s: String| Some(s).filter(|s| !s.trim().is_empty());
        ChainMessage {
            source: non_empty(raw.source),
            destination: non_empty(raw.destination),
            value: raw.value.parse().unwrap_or(0),
            body,
        }
    }
}

impl From<RawTransaction> for ChainTransaction {
    fn from(raw: RawTransaction) -> Self {
        ChainTransaction {
            hash: raw.transaction_id.hash,
            lt: raw.transaction_id.lt,
            utime: raw.utime,
            in_msg: raw.in_msg.map(ChainMessage::from),
            out_msgs: raw.out_msgs.into_iter().map(ChainMessage::from).collect(),
        }
    }
}

/// toncenter-compatible JSON-RPC client (`/api/v2/jsonRPC`).
#[derive(Debug, Clone)]
pub struct TonCenterClient {
    rpc_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl TonCenterClient {
    pub fn new(rpc_url: String, api_key: Option<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(RPC_CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(RPC_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::Internal(format!("RPC HTTP client init failed: {}", e)))?;
        Ok(Self {
            rpc_url,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client,
        })
    }

    /// Probes endpoints in order and keeps the first one that answers.
    pub async fn discover(endpoints: &[String], api_key: Option<String>) -> Result<Self> {
        let mut last_error = String::from("no endpoints configured");
        for endpoint in endpoints.iter().map(|e| e.trim()).filter(|e| !e.is_empty()) {
            let candidate = Self::new(endpoint.to_string(), api_key.clone())?;
            match candidate.get_masterchain_seqno().await {
                Ok(seqno) => {
                    tracing::info!("Using TON RPC endpoint {} (masterchain seqno {})", endpoint, seqno);
                    return Ok(candidate);
                }
                Err(err) => {
                    tracing::warn!("TON RPC endpoint {} unavailable: {}", endpoint, err);
                    last_error = err.to_string();
                }
            }
        }
        Err(AppError::BlockchainRPC(format!(
            "No TON RPC endpoint reachable: {}",
            last_error
        )))
    }

    pub fn endpoint(&self) -> &str {
        &self.rpc_url
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let request = rpc_request(method, params);

        let mut builder = self.client.post(&self.rpc_url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("X-API-Key", key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| AppError::BlockchainRPC(e.to_string()))?;

        let result: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| AppError::BlockchainRPC(e.to_string()))?;

        if !result.ok {
            return Err(AppError::BlockchainRPC(
                result.error.unwrap_or_else(|| format!("{} failed", method)),
            ));
        }
        result
            .result
            .ok_or_else(|| AppError::BlockchainRPC(format!("{} returned no result", method)))
    }

    pub async fn get_masterchain_seqno(&self) -> Result<u64> {
        let info: MasterchainInfo = self
            .call("getMasterchainInfo", serde_json::json!({}))
            .await?;
        Ok(info.last.seqno)
    }
}

#[async_trait::async_trait]
impl ChainQuery for TonCenterClient {
    async fn run_method(
        &self,
        address: &Address,
        method: &str,
        stack: Vec<StackEntry>,
    ) -> Result<Vec<StackEntry>> {
        let stack = stack
            .iter()
            .map(encode_stack_entry)
            .collect::<Result<Vec<_>>>()?;
        let result: RunGetMethodResult = self
            .call(
                "runGetMethod",
                run_get_method_params(&address.to_string(), method, stack),
            )
            .await?;

        // 0 and 1 are both successful TVM exit codes.
        if result.exit_code != 0 && result.exit_code != 1 {
            return Err(AppError::BlockchainRPC(format!(
                "{} on {} exited with code {}",
                method, address, result.exit_code
            )));
        }
        result.stack.iter().map(decode_stack_entry).collect()
    }

    async fn get_transactions(
        &self,
        address: &Address,
        limit: u32,
    ) -> Result<Vec<ChainTransaction>> {
        let raw: Vec<RawTransaction> = self
            .call(
                "getTransactions",
                serde_json::json!({
                    "address": address.to_string(),
                    "limit": limit,
                }),
            )
            .await?;
        Ok(raw.into_iter().map(ChainTransaction::from).collect())
    }
}
