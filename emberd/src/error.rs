//! The node-level error taxonomy.

use thiserror::Error;

use crate::components::mempool::MempoolError;
use crate::config::ConfigError;
use ember_consensus::ChainError;
use ember_state::StoreError;
use ember_wallet::WalletError;

/// An error surfaced by a node command or the runtime.
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    #[error("mempool error: {0}")]
    Mempool(#[from] MempoolError),

    #[error("wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("the node is not running")]
    NotRunning,

    #[error("the node is already running")]
    AlreadyRunning,
}

impl NodeError {
    /// Whether the error is a user-facing command failure (exit code 1)
    /// rather than an internal fault (exit code 2).
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            NodeError::InvalidArgument(_)
                | NodeError::Config(_)
                | NodeError::Wallet(_)
                | NodeError::Mempool(_)
                | NodeError::NotRunning
                | NodeError::AlreadyRunning
        )
    }
}
