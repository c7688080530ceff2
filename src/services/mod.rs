// All service modules
pub mod ledger_outbox;
pub mod stake_flow;

// Re-export for convenience
pub use ledger_outbox::LedgerOutbox;
pub use stake_flow::{FlowSettings, StakeFlow};
