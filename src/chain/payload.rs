//! Message bodies understood by the jetton wallet and the ARIX staking contract.
//!
//! Field order and widths are the contracts' ABI and must not change.

use crate::constants::{OP_JETTON_TRANSFER, OP_STAKE_INTENT, OP_UNSTAKE_INTENT};
use crate::ton::{Address, Cell, CellBuilder, CellError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JettonTransfer {
    pub query_id: u64,
    pub amount: u128,
    pub destination: Address,
    pub response_destination: Address,
    pub custom_payload: Option<Cell>,
    pub forward_ton_amount: u128,
    pub forward_payload: Option<Cell>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StakeIntent {
    pub query_id: u64,
    pub stake_identifier: u64,
    pub duration_seconds: u32,
    pub arix_lock_apr_bps: u16,
    pub arix_lock_penalty_bps: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnstakeIntent {
    pub query_id: u64,
    pub stake_identifier: u64,
}

/// Query id: millisecond clock in the high bits, random low 16 bits.
pub fn new_query_id() -> u64 {
    let millis = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let salt: u16 = rand::random();
    (millis << 16) | u64::from(salt)
}

pub fn build_transfer_payload(transfer: &JettonTransfer) -> Result<Cell, CellError> {
    let mut builder = CellBuilder::new();
    builder.store_uint(u128::from(OP_JETTON_TRANSFER), 32)?;
    builder.store_uint(u128::from(transfer.query_id), 64)?;
    builder.store_coins(transfer.amount)?;
    builder.store_address(Some(&transfer.destination))?;
    builder.store_address(Some(&transfer.response_destination))?;
    builder.store_maybe_ref(transfer.custom_payload.clone())?;
    builder.store_coins(transfer.forward_ton_amount)?;
    match &transfer.forward_payload {
        Some(payload) => {
            builder.store_bit(true)?;
            builder.store_ref(payload.clone())?;
        }
        None => {
            builder.store_bit(false)?;
        }
    }
    builder.build()
}

pub fn build_stake_intent_payload(intent: &StakeIntent) -> Result<Cell, CellError> {
    let mut builder = CellBuilder::new();
    builder.store_uint(u128::from(OP_STAKE_INTENT), 32)?;
    builder.store_uint(u128::from(intent.query_id), 64)?;
    builder.store_uint(u128::from(intent.stake_identifier), 64)?;
    builder.store_uint(u128::from(intent.duration_seconds), 32)?;
    builder.store_uint(u128::from(intent.arix_lock_apr_bps), 16)?;
    builder.store_uint(u128::from(intent.arix_lock_penalty_bps), 16)?;
    builder.build()
}

pub fn build_unstake_intent_payload(intent: &UnstakeIntent) -> Result<Cell, CellError> {
    let mut builder = CellBuilder::new();
    builder.store_uint(u128::from(OP_UNSTAKE_INTENT), 32)?;
    builder.store_uint(u128::from(intent.query_id), 64)?;
    builder.store_uint(u128::from(intent.stake_identifier), 64)?;
    builder.build()
}

/// Leading `(op, query_id)` of a body, if it has at least 96 bits.
pub fn payload_header(cell: &Cell) -> Option<(u32, u64)> {
    let mut slice = cell.parse();
    let op = slice.load_u32().ok()?;
    let query_id = slice.load_u64().ok()?;
    Some((op, query_id))
}

fn expect_op(found: u32, expected: u32) -> Result<(), CellError> {
    if found != expected {
        return Err(CellError::Unsupported(format!(
            "opcode {found:#010x}, expected {expected:#010x}"
        )));
    }
    Ok(())
}

pub fn decode_transfer_payload(cell: &Cell) -> Result<JettonTransfer, CellError> {
    let mut slice = cell.parse();
    expect_op(slice.load_u32()?, OP_JETTON_TRANSFER)?;
    let query_id = slice.load_u64()?;
    let amount = slice.load_coins()?;
    let destination = slice
        .load_address()?
        .ok_or_else(|| CellError::Unsupported("empty destination".to_string()))?;
    let response_destination = slice
        .load_address()?
        .ok_or_else(|| CellError::Unsupported("empty response destination".to_string()))?;
    let custom_payload = slice.load_maybe_ref()?.map(|c| c.as_ref().clone());
    let forward_ton_amount = slice.load_coins()?;
    let forward_payload = if slice.load_bit()? {
        Some(slice.load_ref()?.as_ref().clone())
    } else {
        None
    };
    Ok(JettonTransfer {
        query_id,
        amount,
        destination,
        response_destination,
        custom_payload,
        forward_ton_amount,
        forward_payload,
    })
}

pub fn decode_stake_intent_payload(cell: &Cell) -> Result<StakeIntent, CellError> {
    let mut slice = cell.parse();
    expect_op(slice.load_u32()?, OP_STAKE_INTENT)?;
    Ok(StakeIntent {
        query_id: slice.load_u64()?,
        stake_identifier: slice.load_u64()?,
        duration_seconds: slice.load_u32()?,
        arix_lock_apr_bps: slice.load_u16()?,
        arix_lock_penalty_bps: slice.load_u16()?,
    })
}

pub fn decode_unstake_intent_payload(cell: &Cell) -> Result<UnstakeIntent, CellError> {
    let mut slice = cell.parse();
    expect_op(slice.load_u32()?, OP_UNSTAKE_INTENT)?;
    Ok(UnstakeIntent {
        query_id: slice.load_u64()?,
        stake_identifier: slice.load_u64()?,
    })
}
