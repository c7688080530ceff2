/// Application constants

// API version
pub const API_VERSION: &str = "v1";

// Token
pub const ARIX_SYMBOL: &str = "ARIX";
pub const ARIX_DECIMALS: u32 = 9;

// Contract opcodes (fixed by the on-chain ABI)
pub const OP_JETTON_TRANSFER: u32 = 0x0f8a_7ea5;
pub const OP_STAKE_INTENT: u32 = 0xf010_c513;
pub const OP_UNSTAKE_INTENT: u32 = 0x5d1b_fa02;

// Jetton get-methods
pub const GET_WALLET_ADDRESS: &str = "get_wallet_address";
pub const GET_WALLET_DATA: &str = "get_wallet_data";

// Attached TON (nanotons)
pub const DEFAULT_STAKE_FORWARD_TON_NANO: u128 = 50_000_000; // 0.05 TON
pub const DEFAULT_STAKE_GAS_TON_NANO: u128 = 100_000_000; // 0.1 TON
pub const DEFAULT_UNSTAKE_GAS_TON_NANO: u128 = 200_000_000; // 0.2 TON

// Wallet request validity
pub const DEFAULT_TX_VALID_FOR_SECS: i64 = 360;

// Confirmation polling
pub const DEFAULT_CONFIRM_TIMEOUT_MS: u64 = 120_000;
pub const DEFAULT_CONFIRM_POLL_INTERVAL_MS: u64 = 5_000;
pub const TRANSACTION_LOOKBACK_LIMIT: u32 = 15;
pub const CONFIRMATION_CLOCK_SKEW_SECS: i64 = 60;

// Background service intervals
pub const DEFAULT_LEDGER_RETRY_INTERVAL_SECS: u64 = 30;

// HTTP clients
pub const DEFAULT_LEDGER_TIMEOUT_SECS: u64 = 12;
pub const RPC_CONNECT_TIMEOUT_SECS: u64 = 4;
pub const RPC_REQUEST_TIMEOUT_SECS: u64 = 10;

// Stake plan bounds
pub const SECONDS_PER_DAY: u32 = 86_400;
pub const MAX_STAKE_DURATION_DAYS: u32 = 3_650;
pub const BPS_DENOM: u16 = 10_000;
