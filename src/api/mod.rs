// src/api/mod.rs
pub mod earn;
pub mod health;

use std::sync::Arc;

use crate::config::Config;
use crate::services::StakeFlow;

#[derive(Clone)]
pub struct AppState {
    pub flow: Arc<StakeFlow>,
    pub config: Config,
    pub rpc_endpoint: String,
}
