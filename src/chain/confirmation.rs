//! Polling for the on-chain settlement of a wallet-submitted message.

use serde::Serialize;
use std::fmt;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Duration, Instant};

use super::payload::payload_header;
use super::{ChainQuery, ChainTransaction};
use crate::constants::{CONFIRMATION_CLOCK_SKEW_SECS, TRANSACTION_LOOKBACK_LIMIT};
use crate::ton::{Address, Cell};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxId {
    pub hash: String,
    pub lt: String,
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hash)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    Confirmed(TxId),
    /// Deadline passed without a matching transaction. The message may still land.
    TimedOut,
    Cancelled,
}

impl ConfirmationOutcome {
    pub fn tx_id(&self) -> Option<&TxId> {
        match self {
            ConfirmationOutcome::Confirmed(tx) => Some(tx),
            _ => None,
        }
    }
}

/// In-flight submission being watched on the owner's wallet account.
#[derive(Debug, Clone)]
pub struct PendingConfirmation {
    pub owner: Address,
    pub payload_hash: [u8; 32],
    pub header: Option<(u32, u64)>,
    pub started_at: i64,
    pub deadline: Instant,
}

impl PendingConfirmation {
    pub fn new(owner: Address, payload: &Cell, timeout: Duration) -> Self {
        Self {
            owner,
            payload_hash: payload.hash(),
            header: payload_header(payload),
            started_at: chrono::Utc::now().timestamp(),
            deadline: Instant::now() + timeout,
        }
    }

    fn body_matches(&self, body: &Cell) -> bool {
        if body.hash() == self.payload_hash {
            return true;
        }
        match (self.header, payload_header(body)) {
            (Some(expected), Some(found)) => expected == found,
            _ => false,
        }
    }

    /// External message sent by the owner's wallet that emitted our payload.
    pub fn matches(&self, tx: &ChainTransaction) -> bool {
        if !tx.is_external_inbound() {
            return false;
        }
        if tx.utime != 0 && tx.utime < self.started_at - CONFIRMATION_CLOCK_SKEW_SECS {
            return false;
        }
        tx.out_msgs
            .iter()
            .filter_map(|msg| msg.body.as_ref())
            .any(|body| self.body_matches(body))
    }
}

async fn wait_for_cancel(cancel: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = cancel {
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
    std::future::pending::<()>().await
}

/// Polls recent transactions of the owner until the payload shows up, the deadline passes
/// or `cancel` flips to `true`. Poll failures are logged and retried on the next tick.
pub async fn poll_confirmation(
    chain: &dyn ChainQuery,
    pending: &PendingConfirmation,
    poll_interval: Duration,
    mut cancel: Option<watch::Receiver<bool>>,
) -> ConfirmationOutcome {
    let poll_interval = poll_interval.max(Duration::from_millis(1));
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let poll = chain.get_transactions(&pending.owner, TRANSACTION_LOOKBACK_LIMIT);
        let polled = tokio::select! {
            res = timeout(poll_interval, poll) => res,
            _ = wait_for_cancel(&mut cancel) => return ConfirmationOutcome::Cancelled,
        };

        match polled {
            Ok(Ok(txs)) => {
                if let Some(tx) = txs.iter().find(|tx| pending.matches(tx)) {
                    tracing::info!(
                        "Submission from {} confirmed in tx {} (attempt {})",
                        pending.owner,
                        tx.hash,
                        attempt
                    );
                    return ConfirmationOutcome::Confirmed(TxId {
                        hash: tx.hash.clone(),
                        lt: tx.lt.clone(),
                    });
                }
            }
            Ok(Err(err)) => {
                tracing::warn!("Confirmation poll {} for {} failed: {}", attempt, pending.owner, err);
            }
            Err(_) => {
                tracing::warn!("Confirmation poll {} for {} timed out", attempt, pending.owner);
            }
        }

        let now = Instant::now();
        if now >= pending.deadline {
            tracing::warn!(
                "No confirmation for {} after {} polls; outcome unknown",
                pending.owner,
                attempt
            );
            return ConfirmationOutcome::TimedOut;
        }

        let pause = poll_interval.min(pending.deadline - now);
        tokio::select! {
            _ = sleep(pause) => {}
            _ = wait_for_cancel(&mut cancel) => return ConfirmationOutcome::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainMessage, StackEntry};
    use crate::error::{AppError, Result};
    use crate::ton::CellBuilder;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn owner() -> Address {
        Address::new(0, [0x33; 32])
    }

    fn body(op: u32, query_id: u64, extra: u8) -> Cell {
        let mut builder = CellBuilder::new();
        builder.store_uint(u128::from(op), 32).expect("op");
        builder.store_uint(u128::from(query_id), 64).expect("query id");
        builder.store_uint(u128::from(extra), 8).expect("extra");
        builder.build().expect("cell")
    }

    fn tx(hash: &str, external: bool, out_body: Option<Cell>) -> ChainTransaction {
        ChainTransaction {
            hash: hash.to_string(),
            lt: "1".to_string(),
            utime: chrono::Utc::now().timestamp(),
            in_msg: Some(ChainMessage {
                source: if external { None } else { Some("EQsender".to_string()) },
                destination: None,
                value: 0,
                body: None,
            }),
            out_msgs: out_body
                .into_iter()
                .map(|b| ChainMessage {
                    source: None,
                    destination: None,
                    value: 0,
                    body: Some(b),
                })
                .collect(),
        }
    }

    struct ScriptedChain {
        txs: Vec<ChainTransaction>,
        fail_first: u32,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl ChainQuery for ScriptedChain {
        async fn run_method(&self, _: &Address, _: &str, _: Vec<StackEntry>) -> Result<Vec<StackEntry>> {
            Ok(Vec::new())
        }

        async fn get_transactions(&self, _: &Address, _: u32) -> Result<Vec<ChainTransaction>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(AppError::BlockchainRPC("connection reset".to_string()));
            }
            Ok(self.txs.clone())
        }
    }

    #[test]
    fn unrelated_external_transaction_does_not_match() {
        let payload = body(0x0f8a7ea5, 42, 1);
        let pending = PendingConfirmation::new(owner(), &payload, Duration::from_secs(10));

        assert!(!pending.matches(&tx("other", true, Some(body(0x0f8a7ea5, 41, 1)))));
        assert!(!pending.matches(&tx("empty", true, None)));
        assert!(!pending.matches(&tx("internal", false, Some(payload.clone()))));
        assert!(pending.matches(&tx("ours", true, Some(payload.clone()))));
        // Same op and query id with a re-encoded tail still counts.
        assert!(pending.matches(&tx("ours-reencoded", true, Some(body(0x0f8a7ea5, 42, 9)))));
    }

    #[test]
    fn stale_transactions_are_ignored() {
        let payload = body(0xf010c513, 5, 0);
        let pending = PendingConfirmation::new(owner(), &payload, Duration::from_secs(10));
        let mut old = tx("old", true, Some(payload));
        old.utime = pending.started_at - CONFIRMATION_CLOCK_SKEW_SECS - 1;
        assert!(!pending.matches(&old));
    }

    #[tokio::test(start_paused = true)]
    async fn confirms_after_transient_failures() {
        let payload = body(0x0f8a7ea5, 7, 0);
        let chain = ScriptedChain {
            txs: vec![tx("noise", true, None), tx("match", true, Some(payload.clone()))],
            fail_first: 2,
            calls: AtomicU32::new(0),
        };
        let pending = PendingConfirmation::new(owner(), &payload, Duration::from_secs(60));
        let outcome = poll_confirmation(&chain, &pending, Duration::from_secs(5), None).await;
        assert_eq!(outcome.tx_id().map(|t| t.hash.as_str()), Some("match"));
        assert_eq!(chain.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_within_timeout_plus_interval() {
        let payload = body(0x0f8a7ea5, 8, 0);
        let chain = ScriptedChain {
            txs: vec![tx("noise", true, Some(body(0x0f8a7ea5, 1, 0)))],
            fail_first: 0,
            calls: AtomicU32::new(0),
        };
        let timeout = Duration::from_millis(10_000);
        let interval = Duration::from_millis(3_000);
        let started = Instant::now();
        let pending = PendingConfirmation::new(owner(), &payload, timeout);
        let outcome = poll_confirmation(&chain, &pending, interval, None).await;

        assert_eq!(outcome, ConfirmationOutcome::TimedOut);
        assert!(started.elapsed() <= timeout + interval);
        assert!(chain.calls.load(Ordering::SeqCst) >= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_signal_stops_polling() {
        let payload = body(0x0f8a7ea5, 9, 0);
        let chain = ScriptedChain {
            txs: Vec::new(),
            fail_first: 0,
            calls: AtomicU32::new(0),
        };
        let pending = PendingConfirmation::new(owner(), &payload, Duration::from_secs(600));
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let canceller = tokio::spawn(async move {
            sleep(Duration::from_secs(12)).await;
            let _ = cancel_tx.send(true);
        });
        let started = Instant::now();
        let outcome =
            poll_confirmation(&chain, &pending, Duration::from_secs(5), Some(cancel_rx)).await;
        canceller.await.expect("canceller");

        assert_eq!(outcome, ConfirmationOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(20));
    }
}
