use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;

use super::confirmation::{poll_confirmation, ConfirmationOutcome, PendingConfirmation, TxId};
use super::{ChainQuery, StackEntry};
use crate::constants::{GET_WALLET_ADDRESS, GET_WALLET_DATA};
use crate::error::{AppError, Result};
use crate::ton::{Address, Cell, CellBuilder};

/// Chain-facing operations shared by every stake/unstake flow.
///
/// Read failures are absorbed here: callers get `None` or zero, which means "unknown",
/// never "confirmed empty".
#[derive(Clone)]
pub struct ChainGateway {
    chain: Arc<dyn ChainQuery>,
}

impl ChainGateway {
    pub fn new(chain: Arc<dyn ChainQuery>) -> Self {
        Self { chain }
    }

    async fn query_wallet_address(&self, owner: &Address, master: &Address) -> Result<Address> {
        let mut builder = CellBuilder::new();
        builder.store_address(Some(owner))?;
        let arg = StackEntry::Slice(builder.build()?);

        let stack = self
            .chain
            .run_method(master, GET_WALLET_ADDRESS, vec![arg])
            .await?;
        let cell = stack
            .first()
            .and_then(StackEntry::as_cell)
            .ok_or_else(|| AppError::BlockchainRPC("get_wallet_address returned no cell".to_string()))?;
        cell.parse()
            .load_address()?
            .ok_or_else(|| AppError::BlockchainRPC("get_wallet_address returned addr_none".to_string()))
    }

    /// Jetton wallet of `owner` for the token at `token_master`, or `None` if it cannot be
    /// determined right now.
    pub async fn resolve_sub_account(&self, owner: &str, token_master: &str) -> Option<Address> {
        let (owner_addr, master_addr) = match (owner.parse::<Address>(), token_master.parse::<Address>()) {
            (Ok(o), Ok(m)) => (o, m),
            (Err(err), _) | (_, Err(err)) => {
                tracing::warn!("Cannot resolve jetton wallet: {}", err);
                return None;
            }
        };

        match self.query_wallet_address(&owner_addr, &master_addr).await {
            Ok(wallet) => {
                tracing::debug!("Jetton wallet of {} is {}", owner_addr, wallet);
                Some(wallet)
            }
            Err(err) => {
                tracing::warn!("Jetton wallet lookup for {} failed: {}", owner_addr, err);
                None
            }
        }
    }

    async fn query_balance(&self, wallet: &Address) -> Result<i128> {
        let stack = self.chain.run_method(wallet, GET_WALLET_DATA, Vec::new()).await?;
        stack
            .first()
            .and_then(StackEntry::as_int)
            .ok_or_else(|| AppError::BlockchainRPC("get_wallet_data returned no balance".to_string()))
    }

    /// Balance in token units held by a jetton wallet; zero when unavailable.
    pub async fn read_balance(&self, sub_account: &str) -> i128 {
        let wallet = match sub_account.parse::<Address>() {
            Ok(wallet) => wallet,
            Err(err) => {
                tracing::warn!("Cannot read balance: {}", err);
                return 0;
            }
        };
        match self.query_balance(&wallet).await {
            Ok(balance) => balance,
            Err(err) => {
                tracing::warn!("Balance read for {} failed: {}", wallet, err);
                0
            }
        }
    }

    /// Waits for the owner's wallet to emit `payload`. `None` means the deadline passed
    /// and the outcome is unknown.
    pub async fn confirm_submission(
        &self,
        owner: &str,
        payload: &Cell,
        timeout_ms: u64,
        poll_interval_ms: u64,
    ) -> Option<TxId> {
        match self
            .confirm_submission_with_cancel(owner, payload, timeout_ms, poll_interval_ms, None)
            .await
        {
            ConfirmationOutcome::Confirmed(tx) => Some(tx),
            _ => None,
        }
    }

    pub async fn confirm_submission_with_cancel(
        &self,
        owner: &str,
        payload: &Cell,
        timeout_ms: u64,
        poll_interval_ms: u64,
        cancel: Option<watch::Receiver<bool>>,
    ) -> ConfirmationOutcome {
        let owner = match owner.parse::<Address>() {
            Ok(owner) => owner,
            Err(err) => {
                tracing::warn!("Cannot watch for confirmation: {}", err);
                return ConfirmationOutcome::TimedOut;
            }
        };
        let pending =
            PendingConfirmation::new(owner, payload, Duration::from_millis(timeout_ms));
        poll_confirmation(
            self.chain.as_ref(),
            &pending,
            Duration::from_millis(poll_interval_ms),
            cancel,
        )
        .await
    }
}
