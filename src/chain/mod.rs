// Chain gateway: everything that talks to TON
pub mod confirmation;
pub mod gateway;
pub mod payload;
pub mod toncenter;

pub use confirmation::{ConfirmationOutcome, PendingConfirmation, TxId};
pub use gateway::ChainGateway;
pub use toncenter::TonCenterClient;

use crate::error::Result;
use crate::ton::{Address, Cell};

/// TVM stack value passed to or returned from a get-method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackEntry {
    Int(i128),
    Cell(Cell),
    Slice(Cell),
    /// Tuples, lists and anything else this service never reads.
    Other(String),
}

impl StackEntry {
    pub fn as_int(&self) -> Option<i128> {
        match self {
            StackEntry::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_cell(&self) -> Option<&Cell> {
        match self {
            StackEntry::Cell(cell) | StackEntry::Slice(cell) => Some(cell),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainMessage {
    /// `None` for external inbound messages.
    pub source: Option<String>,
    pub destination: Option<String>,
    pub value: u128,
    pub body: Option<Cell>,
}

impl ChainMessage {
    pub fn is_external(&self) -> bool {
        self.source
            .as_deref()
            .map(|s| s.trim().is_empty())
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub hash: String,
    pub lt: String,
    pub utime: i64,
    pub in_msg: Option<ChainMessage>,
    pub out_msgs: Vec<ChainMessage>,
}

impl ChainTransaction {
    pub fn is_external_inbound(&self) -> bool {
        self.in_msg.as_ref().map(ChainMessage::is_external).unwrap_or(false)
    }
}

/// Read-only chain access the gateway is built on.
#[async_trait::async_trait]
pub trait ChainQuery: Send + Sync {
    async fn run_method(
        &self,
        address: &Address,
        method: &str,
        stack: Vec<StackEntry>,
    ) -> Result<Vec<StackEntry>>;

    async fn get_transactions(&self, address: &Address, limit: u32)
        -> Result<Vec<ChainTransaction>>;
}
