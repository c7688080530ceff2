//! Stake / unstake orchestration.
//!
//! A flow walks `Idle -> BuildingPayload -> AwaitingWalletSignature -> Submitted -> Confirming
//! -> {Confirmed | TimedOut} -> NotifyingBackend -> {Done | BackendRejected}`. A ledger failure
//! after submission is queued in the outbox; every earlier failure is terminal.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use super::ledger_outbox::LedgerOutbox;
use crate::amount::{to_decimal, to_decimal_exact, AmountInput};
use crate::chain::payload::{
    build_stake_intent_payload, build_transfer_payload, build_unstake_intent_payload,
    decode_transfer_payload, decode_unstake_intent_payload, new_query_id, JettonTransfer,
    StakeIntent, UnstakeIntent,
};
use crate::chain::{ChainGateway, ConfirmationOutcome, TxId};
use crate::config::Config;
use crate::constants::{BPS_DENOM, MAX_STAKE_DURATION_DAYS, SECONDS_PER_DAY};
use crate::error::{AppError, Result};
use crate::ledger::{
    ConfirmUnstakeRequest, LedgerApi, LedgerNotification, OnchainStatus, RecordStakeRequest,
};
use crate::ton::{Address, Cell};
use crate::wallet::{OutgoingMessage, SignedTransaction, TransactionRequest, WalletSigner};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowState {
    Idle,
    BuildingPayload,
    AwaitingWalletSignature,
    Submitted,
    Confirming,
    Confirmed,
    TimedOut,
    NotifyingBackend,
    Done,
    BackendRejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowKind {
    Stake,
    Unstake,
}

/// Per-deployment values every flow needs.
#[derive(Debug, Clone)]
pub struct FlowSettings {
    pub jetton_master: Address,
    pub staking_contract: Address,
    pub decimals: u32,
    pub stake_forward_ton_nano: u128,
    pub stake_gas_ton_nano: u128,
    pub unstake_gas_ton_nano: u128,
    pub tx_valid_for_secs: i64,
    pub confirm_timeout_ms: u64,
    pub confirm_poll_interval_ms: u64,
}

impl FlowSettings {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            jetton_master: config.arix_jetton_master_address.parse()?,
            staking_contract: config.arix_staking_contract_address.parse()?,
            decimals: config.arix_decimals,
            stake_forward_ton_nano: config.stake_forward_ton_nano,
            stake_gas_ton_nano: config.stake_gas_ton_nano,
            unstake_gas_ton_nano: config.unstake_gas_ton_nano,
            tx_valid_for_secs: config.tx_valid_for_secs,
            confirm_timeout_ms: config.confirm_timeout_ms,
            confirm_poll_interval_ms: config.confirm_poll_interval_ms,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeRequest {
    pub owner: String,
    /// Human-readable ARIX amount, e.g. `"100.5"` or `100.5`.
    pub amount: AmountInput,
    pub duration_days: u32,
    #[serde(default)]
    pub arix_lock_apr_bps: u16,
    #[serde(default)]
    pub arix_lock_penalty_bps: u16,
    #[serde(default)]
    pub stake_identifier: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnstakeRequest {
    pub owner: String,
    pub stake_identifier: String,
}

/// Everything the wallet needs to sign, plus what the server needs to confirm it later.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedTransaction {
    pub kind: FlowKind,
    pub owner: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jetton_wallet: Option<String>,
    pub amount_units: String,
    pub amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance_units: Option<String>,
    pub stake_identifier: String,
    pub query_id: String,
    /// Body the owner's wallet emits; what confirmation looks for.
    pub payload_boc: String,
    pub request: TransactionRequest,
    #[serde(skip)]
    owner_address: Address,
    #[serde(skip)]
    payload: Cell,
    #[serde(skip)]
    duration_days: u32,
    #[serde(skip)]
    arix_lock_apr_bps: u16,
    #[serde(skip)]
    arix_lock_penalty_bps: u16,
    /// Exact amount the ledger records.
    #[serde(skip)]
    ledger_amount: Decimal,
}

impl PreparedTransaction {
    pub fn payload(&self) -> &Cell {
        &self.payload
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowReport {
    pub kind: FlowKind,
    pub owner: String,
    pub stake_identifier: String,
    pub query_id: String,
    pub state: FlowState,
    pub transitions: Vec<FlowState>,
    pub onchain_status: Option<OnchainStatus>,
    pub tx: Option<TxId>,
    /// Transaction hash when confirmed, otherwise the signed message hash.
    pub tx_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl FlowReport {
    fn new(kind: FlowKind, owner: &Address) -> Self {
        Self {
            kind,
            owner: owner.to_string(),
            stake_identifier: String::new(),
            query_id: String::new(),
            state: FlowState::Idle,
            transitions: vec![FlowState::Idle],
            onchain_status: None,
            tx: None,
            tx_reference: None,
            warning: None,
        }
    }

    fn enter(&mut self, state: FlowState) {
        tracing::debug!("{:?} flow for {}: {:?} -> {:?}", self.kind, self.owner, self.state, state);
        self.state = state;
        self.transitions.push(state);
    }
}

/// Owners with a flow currently running.
#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    owners: Arc<Mutex<HashSet<Address>>>,
}

impl InFlightRegistry {
    pub fn try_acquire(&self, owner: Address) -> Result<InFlightGuard> {
        let mut owners = self.owners.lock().unwrap_or_else(|p| p.into_inner());
        if !owners.insert(owner) {
            return Err(AppError::FlowInProgress(owner.to_string()));
        }
        Ok(InFlightGuard {
            owner,
            owners: self.owners.clone(),
        })
    }
}

/// Releases the owner when dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    owner: Address,
    owners: Arc<Mutex<HashSet<Address>>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.owners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.owner);
    }
}

fn parse_stake_identifier(raw: &str) -> Result<u64> {
    raw.trim()
        .parse::<u64>()
        .map_err(|_| AppError::BadRequest(format!("Invalid stake identifier: {}", raw)))
}

pub struct StakeFlow {
    gateway: ChainGateway,
    signer: Arc<dyn WalletSigner>,
    ledger: Arc<dyn LedgerApi>,
    outbox: Arc<LedgerOutbox>,
    in_flight: InFlightRegistry,
    settings: FlowSettings,
    shutdown: Option<watch::Receiver<bool>>,
}

impl StakeFlow {
    pub fn new(
        gateway: ChainGateway,
        signer: Arc<dyn WalletSigner>,
        ledger: Arc<dyn LedgerApi>,
        outbox: Arc<LedgerOutbox>,
        settings: FlowSettings,
    ) -> Self {
        Self {
            gateway,
            signer,
            ledger,
            outbox,
            in_flight: InFlightRegistry::default(),
            settings,
            shutdown: None,
        }
    }

    /// Stop confirmation polling early once `shutdown` flips to `true`.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn gateway(&self) -> &ChainGateway {
        &self.gateway
    }

    pub fn ledger(&self) -> &dyn LedgerApi {
        self.ledger.as_ref()
    }

    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    pub fn in_flight(&self) -> &InFlightRegistry {
        &self.in_flight
    }

    pub fn outbox(&self) -> &LedgerOutbox {
        &self.outbox
    }

    /// Jetton wallet and balance of an owner. `None` / zero mean unknown.
    pub async fn balance_of(&self, owner: &str) -> Result<(Option<Address>, i128)> {
        let owner: Address = owner.parse()?;
        let master = self.settings.jetton_master.to_string();
        let wallet = self
            .gateway
            .resolve_sub_account(&owner.to_string(), &master)
            .await;
        let balance = match &wallet {
            Some(wallet) => self.gateway.read_balance(&wallet.to_string()).await,
            None => 0,
        };
        Ok((wallet, balance))
    }

    pub async fn prepare_stake(&self, request: &StakeRequest) -> Result<PreparedTransaction> {
        let owner: Address = request.owner.parse()?;
        if request.duration_days == 0 || request.duration_days > MAX_STAKE_DURATION_DAYS {
            return Err(AppError::BadRequest(format!(
                "Duration must be between 1 and {} days",
                MAX_STAKE_DURATION_DAYS
            )));
        }
        if request.arix_lock_apr_bps > BPS_DENOM || request.arix_lock_penalty_bps > BPS_DENOM {
            return Err(AppError::BadRequest(
                "Basis points must not exceed 10000".to_string(),
            ));
        }
        let amount = request.amount.to_units(self.settings.decimals)?;
        if amount <= 0 {
            return Err(AppError::BadRequest("Amount must be greater than zero".to_string()));
        }
        let ledger_amount = to_decimal_exact(amount, self.settings.decimals)?;
        let stake_identifier = match &request.stake_identifier {
            Some(raw) => parse_stake_identifier(raw)?,
            None => chrono::Utc::now().timestamp_millis().max(0) as u64,
        };

        let jetton_wallet = self
            .gateway
            .resolve_sub_account(&owner.to_string(), &self.settings.jetton_master.to_string())
            .await
            .ok_or_else(|| {
                AppError::BlockchainRPC("Could not resolve the ARIX jetton wallet".to_string())
            })?;
        let balance = self.gateway.read_balance(&jetton_wallet.to_string()).await;
        if balance == 0 {
            tracing::warn!("ARIX balance of {} unknown; skipping balance check", owner);
        } else if balance < amount {
            return Err(AppError::InsufficientBalance);
        }

        let query_id = new_query_id();
        let intent = StakeIntent {
            query_id,
            stake_identifier,
            duration_seconds: request.duration_days * SECONDS_PER_DAY,
            arix_lock_apr_bps: request.arix_lock_apr_bps,
            arix_lock_penalty_bps: request.arix_lock_penalty_bps,
        };
        let transfer = JettonTransfer {
            query_id,
            amount: amount as u128,
            destination: self.settings.staking_contract,
            response_destination: owner,
            custom_payload: None,
            forward_ton_amount: self.settings.stake_forward_ton_nano,
            forward_payload: Some(build_stake_intent_payload(&intent)?),
        };
        let payload = build_transfer_payload(&transfer)?;
        let attached = self.settings.stake_forward_ton_nano + self.settings.stake_gas_ton_nano;
        let message = OutgoingMessage::new(&jetton_wallet, attached, Some(&payload))?;

        Ok(PreparedTransaction {
            kind: FlowKind::Stake,
            owner: owner.to_string(),
            jetton_wallet: Some(jetton_wallet.to_string()),
            amount_units: amount.to_string(),
            amount: to_decimal(Some(amount), self.settings.decimals),
            balance_units: (balance > 0).then(|| balance.to_string()),
            stake_identifier: stake_identifier.to_string(),
            query_id: query_id.to_string(),
            payload_boc: payload.to_boc_base64()?,
            request: TransactionRequest::single(message, self.settings.tx_valid_for_secs),
            owner_address: owner,
            payload,
            duration_days: request.duration_days,
            arix_lock_apr_bps: request.arix_lock_apr_bps,
            arix_lock_penalty_bps: request.arix_lock_penalty_bps,
            ledger_amount,
        })
    }

    pub async fn prepare_unstake(&self, request: &UnstakeRequest) -> Result<PreparedTransaction> {
        let owner: Address = request.owner.parse()?;
        let stake_identifier = parse_stake_identifier(&request.stake_identifier)?;

        let query_id = new_query_id();
        let payload = build_unstake_intent_payload(&UnstakeIntent {
            query_id,
            stake_identifier,
        })?;
        let message = OutgoingMessage::new(
            &self.settings.staking_contract,
            self.settings.unstake_gas_ton_nano,
            Some(&payload),
        )?;

        Ok(PreparedTransaction {
            kind: FlowKind::Unstake,
            owner: owner.to_string(),
            jetton_wallet: None,
            amount_units: "0".to_string(),
            amount: 0.0,
            balance_units: None,
            stake_identifier: stake_identifier.to_string(),
            query_id: query_id.to_string(),
            payload_boc: payload.to_boc_base64()?,
            request: TransactionRequest::single(message, self.settings.tx_valid_for_secs),
            owner_address: owner,
            payload,
            duration_days: 0,
            arix_lock_apr_bps: 0,
            arix_lock_penalty_bps: 0,
            ledger_amount: Decimal::ZERO,
        })
    }

    /// Waits for a payload the client submitted through its own wallet.
    pub async fn await_confirmation(
        &self,
        owner: &str,
        payload_boc: &str,
        timeout_ms: Option<u64>,
    ) -> Result<ConfirmationOutcome> {
        let owner: Address = owner.parse()?;
        let payload = Cell::from_boc_base64(payload_boc)?;
        if decode_transfer_payload(&payload).is_err()
            && decode_unstake_intent_payload(&payload).is_err()
        {
            return Err(AppError::BadRequest(
                "Payload is neither a jetton transfer nor an unstake intent".to_string(),
            ));
        }
        let timeout_ms = timeout_ms
            .unwrap_or(self.settings.confirm_timeout_ms)
            .min(self.settings.confirm_timeout_ms);
        Ok(self
            .gateway
            .confirm_submission_with_cancel(
                &owner.to_string(),
                &payload,
                timeout_ms,
                self.settings.confirm_poll_interval_ms,
                self.shutdown.clone(),
            )
            .await)
    }

    pub async fn execute_stake(&self, request: StakeRequest) -> Result<FlowReport> {
        let owner: Address = request.owner.parse()?;
        let _guard = self.in_flight.try_acquire(owner)?;
        let mut report = FlowReport::new(FlowKind::Stake, &owner);

        report.enter(FlowState::BuildingPayload);
        let prepared = self.prepare_stake(&request).await?;
        self.run(prepared, report).await
    }

    pub async fn execute_unstake(&self, request: UnstakeRequest) -> Result<FlowReport> {
        let owner: Address = request.owner.parse()?;
        let _guard = self.in_flight.try_acquire(owner)?;
        let mut report = FlowReport::new(FlowKind::Unstake, &owner);

        report.enter(FlowState::BuildingPayload);
        let prepared = self.prepare_unstake(&request).await?;
        self.run(prepared, report).await
    }

    async fn run(&self, prepared: PreparedTransaction, mut report: FlowReport) -> Result<FlowReport> {
        report.stake_identifier = prepared.stake_identifier.clone();
        report.query_id = prepared.query_id.clone();

        report.enter(FlowState::AwaitingWalletSignature);
        let signed = self
            .signer
            .send_transaction(&prepared.owner_address, &prepared.request)
            .await?;

        report.enter(FlowState::Submitted);
        let message_hash = signed.message_hash().unwrap_or_else(|err| {
            tracing::warn!("Signed BOC from {} not decodable: {}", report.owner, err);
            prepared.payload.hash_hex()
        });
        tracing::info!(
            "{:?} for {} submitted (query {}, message {})",
            prepared.kind,
            report.owner,
            prepared.query_id,
            message_hash
        );

        report.enter(FlowState::Confirming);
        let outcome = self
            .gateway
            .confirm_submission_with_cancel(
                &report.owner,
                &prepared.payload,
                self.settings.confirm_timeout_ms,
                self.settings.confirm_poll_interval_ms,
                self.shutdown.clone(),
            )
            .await;

        let status = match outcome {
            ConfirmationOutcome::Confirmed(tx) => {
                report.enter(FlowState::Confirmed);
                report.tx_reference = Some(tx.hash.clone());
                report.tx = Some(tx);
                OnchainStatus::Confirmed
            }
            ConfirmationOutcome::TimedOut | ConfirmationOutcome::Cancelled => {
                report.enter(FlowState::TimedOut);
                report.tx_reference = Some(message_hash.clone());
                report.warning = Some(format!(
                    "Transaction not confirmed yet. Funds may already have moved; check your wallet \
                     history before retrying. Reference: {}",
                    message_hash
                ));
                OnchainStatus::Pending
            }
        };
        report.onchain_status = Some(status);

        report.enter(FlowState::NotifyingBackend);
        let tx_reference = report.tx_reference.clone().unwrap_or(message_hash);
        let notification = self.ledger_notification(&prepared, &signed, &tx_reference, status);
        match notification.deliver(self.ledger.as_ref()).await {
            Ok(_) => {
                report.enter(FlowState::Done);
                tracing::info!(
                    "{:?} for {} recorded (tx {}, {:?})",
                    prepared.kind,
                    report.owner,
                    tx_reference,
                    status
                );
                Ok(report)
            }
            Err(err) => {
                report.enter(FlowState::BackendRejected);
                let seen = match status {
                    OnchainStatus::Confirmed => format!("went on-chain (tx {})", tx_reference),
                    OnchainStatus::Pending => {
                        format!("was signed but is unconfirmed (message {})", tx_reference)
                    }
                };
                tracing::error!(
                    "LEDGER DESYNC: {:?} for {} {} but ledger update failed: {}",
                    prepared.kind,
                    report.owner,
                    seen,
                    err
                );
                self.outbox.enqueue(notification).await;
                Err(AppError::LedgerDesync {
                    tx_reference,
                    message: err.to_string(),
                })
            }
        }
    }

    fn ledger_notification(
        &self,
        prepared: &PreparedTransaction,
        signed: &SignedTransaction,
        tx_reference: &str,
        status: OnchainStatus,
    ) -> LedgerNotification {
        match prepared.kind {
            FlowKind::Stake => LedgerNotification::RecordStake(RecordStakeRequest {
                user_wallet_address: prepared.owner.clone(),
                stake_identifier: prepared.stake_identifier.clone(),
                arix_amount: prepared.ledger_amount,
                duration_days: prepared.duration_days,
                arix_lock_apr_bps: prepared.arix_lock_apr_bps,
                arix_lock_penalty_bps: prepared.arix_lock_penalty_bps,
                transaction_boc: signed.boc.clone(),
                transaction_hash: tx_reference.to_string(),
                onchain_status: status,
            }),
            FlowKind::Unstake => LedgerNotification::ConfirmUnstake(ConfirmUnstakeRequest {
                user_wallet_address: prepared.owner.clone(),
                stake_identifier: prepared.stake_identifier.clone(),
                unstake_transaction_boc: signed.boc.clone(),
                unstake_transaction_hash: tx_reference.to_string(),
                onchain_status: status,
            }),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chain::gateway::tests::{jetton_wallet, master, FakeChain, OWNER};
    use crate::chain::payload::{decode_stake_intent_payload, decode_transfer_payload};
    use crate::services::ledger_outbox::tests::FakeLedger;
    use crate::ton::CellBuilder;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    pub(crate) fn staking_contract() -> Address {
        Address::new(0, [0xcc; 32])
    }

    fn settings() -> FlowSettings {
        FlowSettings {
            jetton_master: master(),
            staking_contract: staking_contract(),
            decimals: 9,
            stake_forward_ton_nano: 50_000_000,
            stake_gas_ton_nano: 100_000_000,
            unstake_gas_ton_nano: 200_000_000,
            tx_valid_for_secs: 360,
            confirm_timeout_ms: 20_000,
            confirm_poll_interval_ms: 2_000,
        }
    }

    pub(crate) enum SignerMode {
        /// Sign and let the message land on chain.
        Settle,
        /// Sign, but the message never shows up.
        Vanish,
        Reject,
    }

    struct FakeSigner {
        chain: Arc<FakeChain>,
        mode: SignerMode,
    }

    #[async_trait::async_trait]
    impl WalletSigner for FakeSigner {
        async fn send_transaction(
            &self,
            _owner: &Address,
            request: &TransactionRequest,
        ) -> Result<SignedTransaction> {
            if let SignerMode::Reject = self.mode {
                return Err(AppError::WalletRejected("user declined".to_string()));
            }
            let payload = request.messages[0]
                .payload
                .as_deref()
                .map(Cell::from_boc_base64)
                .transpose()?
                .unwrap_or_else(Cell::empty);
            if let SignerMode::Settle = self.mode {
                self.chain.settle(payload.clone());
            }
            let mut external = CellBuilder::new();
            external.store_uint(0x7369_676e, 32)?;
            external.store_ref(payload)?;
            Ok(SignedTransaction {
                boc: external.build()?.to_boc_base64()?,
            })
        }
    }

    pub(crate) struct Harness {
        pub flow: StakeFlow,
        pub chain: Arc<FakeChain>,
        pub ledger: Arc<FakeLedger>,
        pub outbox: Arc<LedgerOutbox>,
    }

    pub(crate) fn harness(chain: FakeChain, mode: SignerMode, ledger: FakeLedger) -> Harness {
        let chain = Arc::new(chain);
        let ledger = Arc::new(ledger);
        let outbox = Arc::new(LedgerOutbox::new(ledger.clone()));
        let signer = Arc::new(FakeSigner {
            chain: chain.clone(),
            mode,
        });
        let flow = StakeFlow::new(
            ChainGateway::new(chain.clone()),
            signer,
            ledger.clone(),
            outbox.clone(),
            settings(),
        );
        Harness {
            flow,
            chain,
            ledger,
            outbox,
        }
    }

    pub(crate) fn stake_request(amount: &str) -> StakeRequest {
        StakeRequest {
            owner: OWNER.to_string(),
            amount: AmountInput::from(amount),
            duration_days: 30,
            arix_lock_apr_bps: 0,
            arix_lock_penalty_bps: 500,
            stake_identifier: Some("7".to_string()),
        }
    }

    #[tokio::test]
    async fn prepared_stake_targets_jetton_wallet_with_intent() {
        let h = harness(
            FakeChain::with_balance(200_000_000_000),
            SignerMode::Settle,
            FakeLedger::default(),
        );
        let prepared = h.flow.prepare_stake(&stake_request("100.5")).await.expect("prepare");

        assert_eq!(prepared.amount_units, "100500000000");
        assert_eq!(prepared.request.messages.len(), 1);
        let message = &prepared.request.messages[0];
        assert_eq!(message.address, jetton_wallet().to_string());
        assert_eq!(message.amount, "150000000");

        let transfer = decode_transfer_payload(prepared.payload()).expect("transfer");
        assert_eq!(transfer.amount, 100_500_000_000);
        assert_eq!(transfer.destination, staking_contract());
        assert_eq!(transfer.forward_ton_amount, 50_000_000);
        let intent = decode_stake_intent_payload(&transfer.forward_payload.expect("forward"))
            .expect("intent");
        assert_eq!(intent.stake_identifier, 7);
        assert_eq!(intent.duration_seconds, 2_592_000);
        assert_eq!(intent.arix_lock_penalty_bps, 500);
        assert_eq!(intent.query_id, transfer.query_id);
    }

    #[tokio::test]
    async fn prepare_rejects_bad_input_before_io() {
        let h = harness(FakeChain::with_balance(1), SignerMode::Settle, FakeLedger::default());

        let mut bad_owner = stake_request("1");
        bad_owner.owner = "EQAbc".to_string();
        assert!(matches!(
            h.flow.prepare_stake(&bad_owner).await,
            Err(AppError::InvalidAddress(_))
        ));
        assert!(matches!(
            h.flow.prepare_stake(&stake_request("abc")).await,
            Err(AppError::InvalidAmount(_))
        ));
        assert!(matches!(
            h.flow.prepare_stake(&stake_request("0")).await,
            Err(AppError::BadRequest(_))
        ));
        let mut forever = stake_request("1");
        forever.duration_days = 0;
        assert!(h.flow.prepare_stake(&forever).await.is_err());
        assert!(h.chain.run_method_calls.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn known_low_balance_is_rejected_unknown_is_not() {
        let h = harness(FakeChain::with_balance(1), SignerMode::Settle, FakeLedger::default());
        assert!(matches!(
            h.flow.prepare_stake(&stake_request("100.5")).await,
            Err(AppError::InsufficientBalance)
        ));

        let h = harness(FakeChain::with_balance(0), SignerMode::Settle, FakeLedger::default());
        let prepared = h.flow.prepare_stake(&stake_request("100.5")).await.expect("prepare");
        assert!(prepared.balance_units.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn stake_walks_every_state_to_done() {
        let h = harness(
            FakeChain::with_balance(200_000_000_000),
            SignerMode::Settle,
            FakeLedger::default(),
        );
        let report = h.flow.execute_stake(stake_request("100.5")).await.expect("flow");

        assert_eq!(
            report.transitions,
            vec![
                FlowState::Idle,
                FlowState::BuildingPayload,
                FlowState::AwaitingWalletSignature,
                FlowState::Submitted,
                FlowState::Confirming,
                FlowState::Confirmed,
                FlowState::NotifyingBackend,
                FlowState::Done,
            ]
        );
        assert_eq!(report.onchain_status, Some(OnchainStatus::Confirmed));
        assert_eq!(report.tx_reference.as_deref(), Some("tx-0"));
        assert!(report.warning.is_none());

        let stakes = h.ledger.stakes.lock().expect("lock");
        assert_eq!(stakes.len(), 1);
        assert_eq!(stakes[0].arix_amount, Decimal::from_str("100.5").expect("decimal"));
        assert_eq!(stakes[0].stake_identifier, "7");
        assert_eq!(stakes[0].duration_days, 30);
        assert!(h.flow.in_flight().try_acquire(OWNER.parse().expect("owner")).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_stake_is_recorded_as_pending_with_warning() {
        let h = harness(
            FakeChain::with_balance(200_000_000_000),
            SignerMode::Vanish,
            FakeLedger::default(),
        );
        let report = h.flow.execute_stake(stake_request("1")).await.expect("flow");

        assert!(report.transitions.contains(&FlowState::TimedOut));
        assert_eq!(report.state, FlowState::Done);
        assert_eq!(report.onchain_status, Some(OnchainStatus::Pending));
        assert!(report.tx.is_none());
        assert!(report.warning.is_some());

        let stakes = h.ledger.stakes.lock().expect("lock");
        assert_eq!(stakes[0].onchain_status, OnchainStatus::Pending);
        assert_eq!(Some(stakes[0].transaction_hash.clone()), report.tx_reference);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_during_confirmation_is_recorded_as_pending() {
        let h = harness(
            FakeChain::with_balance(200_000_000_000),
            SignerMode::Vanish,
            FakeLedger::default(),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let flow = h.flow.with_shutdown(shutdown_rx);
        shutdown_tx.send(true).expect("receiver alive");

        let started = tokio::time::Instant::now();
        let report = flow.execute_stake(stake_request("1")).await.expect("flow");
        assert!(started.elapsed() < std::time::Duration::from_millis(20_000));

        assert!(report.transitions.contains(&FlowState::TimedOut));
        assert_eq!(report.state, FlowState::Done);
        assert_eq!(report.onchain_status, Some(OnchainStatus::Pending));
        assert!(report.warning.is_some());

        let stakes = h.ledger.stakes.lock().expect("lock");
        assert_eq!(stakes.len(), 1);
        assert_eq!(stakes[0].onchain_status, OnchainStatus::Pending);
        assert_eq!(Some(stakes[0].transaction_hash.clone()), report.tx_reference);
    }

    #[tokio::test]
    async fn unsupported_scale_fails_before_signing() {
        let mut h = harness(
            FakeChain::with_balance(200_000_000_000),
            SignerMode::Settle,
            FakeLedger::default(),
        );
        h.flow.settings.decimals = crate::amount::MAX_DECIMALS + 1;

        let err = h.flow.execute_stake(stake_request("1")).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidAmount(_)));
        assert!(h.chain.settled.lock().expect("lock").is_empty());
        assert!(h.ledger.stakes.lock().expect("lock").is_empty());
        assert_eq!(h.outbox.len().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn highest_scale_reaches_the_ledger_exactly() {
        let mut h = harness(FakeChain::with_balance(0), SignerMode::Settle, FakeLedger::default());
        h.flow.settings.decimals = crate::amount::MAX_DECIMALS;

        let report = h.flow.execute_stake(stake_request("1.5")).await.expect("flow");
        assert_eq!(report.state, FlowState::Done);
        let stakes = h.ledger.stakes.lock().expect("lock");
        assert_eq!(stakes[0].arix_amount, Decimal::from_str("1.5").expect("decimal"));
    }

    #[tokio::test]
    async fn numeric_json_amount_is_accepted() {
        let h = harness(
            FakeChain::with_balance(200_000_000_000),
            SignerMode::Settle,
            FakeLedger::default(),
        );
        let request: StakeRequest = serde_json::from_value(serde_json::json!({
            "owner": OWNER,
            "amount": 100.5,
            "durationDays": 30,
        }))
        .expect("request");
        let prepared = h.flow.prepare_stake(&request).await.expect("prepare");
        assert_eq!(prepared.amount_units, "100500000000");
    }

    #[tokio::test]
    async fn foreign_payload_is_not_watched() {
        let h = harness(FakeChain::default(), SignerMode::Settle, FakeLedger::default());
        let mut foreign = CellBuilder::new();
        foreign.store_uint(0x1234_5678, 32).expect("fits");
        let boc = foreign.build().expect("cell").to_boc_base64().expect("boc");

        let err = h.flow.await_confirmation(OWNER, &boc, None).await.unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
        assert!(h.chain.run_method_calls.lock().expect("lock").is_empty());
    }

    #[tokio::test]
    async fn wallet_rejection_is_terminal_and_releases_owner() {
        let h = harness(
            FakeChain::with_balance(200_000_000_000),
            SignerMode::Reject,
            FakeLedger::default(),
        );
        let err = h.flow.execute_stake(stake_request("1")).await.unwrap_err();
        assert!(matches!(err, AppError::WalletRejected(_)));
        assert!(h.ledger.stakes.lock().expect("lock").is_empty());

        let again = h.flow.execute_stake(stake_request("1")).await.unwrap_err();
        assert!(matches!(again, AppError::WalletRejected(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn ledger_failure_after_confirmation_is_desync_and_queued() {
        let h = harness(
            FakeChain::default(),
            SignerMode::Settle,
            FakeLedger::failing(1),
        );
        let request = UnstakeRequest {
            owner: OWNER.to_string(),
            stake_identifier: "1700000000000".to_string(),
        };
        let err = h.flow.execute_unstake(request).await.unwrap_err();

        match err {
            AppError::LedgerDesync { tx_reference, .. } => assert_eq!(tx_reference, "tx-0"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(h.outbox.pending_references().await, vec!["tx-0"]);
        assert_eq!(h.outbox.flush().await, 1);
        let unstakes = h.ledger.unstakes.lock().expect("lock");
        assert_eq!(unstakes[0].stake_identifier, "1700000000000");
    }

    #[tokio::test(start_paused = true)]
    async fn ledger_failure_while_unconfirmed_queues_message_reference() {
        let h = harness(
            FakeChain::with_balance(200_000_000_000),
            SignerMode::Vanish,
            FakeLedger::failing(1),
        );
        let err = h.flow.execute_stake(stake_request("1")).await.unwrap_err();

        let reference = match err {
            AppError::LedgerDesync { tx_reference, .. } => tx_reference,
            other => panic!("unexpected error: {other:?}"),
        };
        assert_ne!(reference, "tx-0");
        assert_eq!(h.outbox.pending_references().await, vec![reference]);
    }

    #[tokio::test]
    async fn concurrent_flow_for_same_owner_is_refused() {
        let h = harness(
            FakeChain::with_balance(200_000_000_000),
            SignerMode::Settle,
            FakeLedger::default(),
        );
        let owner: Address = OWNER.parse().expect("owner");
        let guard = h.flow.in_flight().try_acquire(owner).expect("first");

        let err = h
            .flow
            .execute_unstake(UnstakeRequest {
                owner: OWNER.to_string(),
                stake_identifier: "1".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::FlowInProgress(_)));

        drop(guard);
        assert!(h.flow.in_flight().try_acquire(owner).is_ok());
    }

    #[tokio::test]
    async fn unstake_payload_goes_to_staking_contract() {
        let h = harness(FakeChain::default(), SignerMode::Settle, FakeLedger::default());
        let prepared = h
            .flow
            .prepare_unstake(&UnstakeRequest {
                owner: OWNER.to_string(),
                stake_identifier: "42".to_string(),
            })
            .await
            .expect("prepare");
        assert_eq!(prepared.request.messages[0].address, staking_contract().to_string());
        assert_eq!(prepared.request.messages[0].amount, "200000000");
        assert!(h
            .flow
            .prepare_unstake(&UnstakeRequest {
                owner: OWNER.to_string(),
                stake_identifier: "-1".to_string(),
            })
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn client_signed_payload_can_be_confirmed() {
        let h = harness(FakeChain::default(), SignerMode::Settle, FakeLedger::default());
        let prepared = h
            .flow
            .prepare_unstake(&UnstakeRequest {
                owner: OWNER.to_string(),
                stake_identifier: "42".to_string(),
            })
            .await
            .expect("prepare");
        h.chain.settle(prepared.payload().clone());

        let outcome = h
            .flow
            .await_confirmation(OWNER, &prepared.payload_boc, Some(10_000))
            .await
            .expect("confirm");
        assert!(outcome.tx_id().is_some());
    }
}
