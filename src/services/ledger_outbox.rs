use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::ledger::{LedgerApi, LedgerNotification};

#[derive(Debug, Clone)]
struct QueuedNotification {
    notification: LedgerNotification,
    attempts: u32,
    queued_at: chrono::DateTime<chrono::Utc>,
}

/// Ledger writes that failed after the chain already moved funds.
///
/// Entries stay queued until the ledger accepts them. Nothing is ever dropped.
pub struct LedgerOutbox {
    ledger: Arc<dyn LedgerApi>,
    queue: Mutex<VecDeque<QueuedNotification>>,
}

impl LedgerOutbox {
    pub fn new(ledger: Arc<dyn LedgerApi>) -> Self {
        Self {
            ledger,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub async fn enqueue(&self, notification: LedgerNotification) {
        tracing::error!(
            "Queued ledger retry for {} (tx {})",
            notification.wallet(),
            notification.tx_reference()
        );
        self.queue.lock().await.push_back(QueuedNotification {
            notification,
            attempts: 0,
            queued_at: chrono::Utc::now(),
        });
    }

    pub async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// References of notifications still waiting for the ledger.
    pub async fn pending_references(&self) -> Vec<String> {
        self.queue
            .lock()
            .await
            .iter()
            .map(|q| q.notification.tx_reference().to_string())
            .collect()
    }

    /// One retry pass over the current queue. Returns how many were delivered.
    pub async fn flush(&self) -> usize {
        let batch: Vec<QueuedNotification> = self.queue.lock().await.drain(..).collect();
        if batch.is_empty() {
            return 0;
        }

        let mut delivered = 0;
        let mut failed = Vec::new();
        for mut entry in batch {
            entry.attempts += 1;
            match entry.notification.deliver(self.ledger.as_ref()).await {
                Ok(_) => {
                    delivered += 1;
                    tracing::info!(
                        "Ledger caught up on tx {} after {} retries",
                        entry.notification.tx_reference(),
                        entry.attempts
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        "Ledger retry {} for tx {} (queued {}) failed: {}",
                        entry.attempts,
                        entry.notification.tx_reference(),
                        entry.queued_at.to_rfc3339(),
                        err
                    );
                    failed.push(entry);
                }
            }
        }

        if !failed.is_empty() {
            let mut queue = self.queue.lock().await;
            // Keep original order ahead of anything queued during the pass.
            for entry in failed.into_iter().rev() {
                queue.push_front(entry);
            }
        }
        delivered
    }

    /// Start the retry loop
    pub fn start(self: Arc<Self>, every: Duration) {
        tokio::spawn(async move {
            let mut ticker = interval(every.max(Duration::from_secs(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!("Ledger outbox started. interval={}s", every.as_secs());

            loop {
                ticker.tick().await;
                self.flush().await;
            }
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::{AppError, Result};
    use crate::ledger::{
        ConfirmUnstakeRequest, LedgerReceipt, OnchainStatus, RecordStakeRequest,
    };
    use serde_json::Value;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Ledger fake that fails the first `fail_first` writes and records the rest.
    #[derive(Default)]
    pub(crate) struct FakeLedger {
        pub fail_first: u32,
        pub calls: AtomicU32,
        pub stakes: std::sync::Mutex<Vec<RecordStakeRequest>>,
        pub unstakes: std::sync::Mutex<Vec<ConfirmUnstakeRequest>>,
    }

    impl FakeLedger {
        pub(crate) fn failing(fail_first: u32) -> Self {
            Self {
                fail_first,
                ..Self::default()
            }
        }

        fn should_fail(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst) < self.fail_first
        }
    }

    #[async_trait::async_trait]
    impl LedgerApi for FakeLedger {
        async fn record_stake(&self, request: &RecordStakeRequest) -> Result<LedgerReceipt> {
            if self.should_fail() {
                return Err(AppError::ExternalAPI("ledger unavailable".to_string()));
            }
            self.stakes.lock().expect("stakes lock").push(request.clone());
            Ok(LedgerReceipt::default())
        }

        async fn confirm_unstake(&self, request: &ConfirmUnstakeRequest) -> Result<LedgerReceipt> {
            if self.should_fail() {
                return Err(AppError::ExternalAPI("ledger unavailable".to_string()));
            }
            self.unstakes.lock().expect("unstakes lock").push(request.clone());
            Ok(LedgerReceipt::default())
        }

        async fn get_stakes(&self, wallet: &str) -> Result<Value> {
            Ok(serde_json::json!({ "wallet": wallet, "stakes": [] }))
        }
    }

    fn unstake(reference: &str) -> LedgerNotification {
        LedgerNotification::ConfirmUnstake(ConfirmUnstakeRequest {
            user_wallet_address: "EQowner".to_string(),
            stake_identifier: "1".to_string(),
            unstake_transaction_boc: String::new(),
            unstake_transaction_hash: reference.to_string(),
            onchain_status: OnchainStatus::Confirmed,
        })
    }

    #[tokio::test]
    async fn failed_deliveries_stay_queued_in_order() {
        let ledger = Arc::new(FakeLedger::failing(3));
        let outbox = LedgerOutbox::new(ledger.clone());
        outbox.enqueue(unstake("a")).await;
        outbox.enqueue(unstake("b")).await;

        assert_eq!(outbox.flush().await, 0);
        assert_eq!(outbox.pending_references().await, vec!["a", "b"]);

        // Third call fails, fourth succeeds.
        assert_eq!(outbox.flush().await, 1);
        assert_eq!(outbox.pending_references().await, vec!["a"]);

        assert_eq!(outbox.flush().await, 1);
        assert_eq!(outbox.len().await, 0);
        assert_eq!(ledger.unstakes.lock().expect("lock").len(), 2);
    }

    #[tokio::test]
    async fn flush_on_empty_queue_does_nothing() {
        let ledger = Arc::new(FakeLedger::default());
        let outbox = LedgerOutbox::new(ledger.clone());
        assert_eq!(outbox.flush().await, 0);
        assert_eq!(ledger.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn background_loop_drains_queue() {
        let ledger = Arc::new(FakeLedger::failing(1));
        let outbox = Arc::new(LedgerOutbox::new(ledger.clone()));
        outbox.enqueue(unstake("late")).await;
        outbox.clone().start(Duration::from_secs(30));

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_secs(31)).await;
        }
        assert_eq!(outbox.len().await, 0);
        assert_eq!(ledger.unstakes.lock().expect("lock").len(), 1);
    }
}
