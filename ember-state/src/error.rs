use std::io;

use thiserror::Error;

/// An error from the block store or state store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] ember_chain::SerializationError),

    /// The store contents failed an internal consistency check.
    #[error("store corruption: {0}")]
    Corruption(String),

    #[error("unknown snapshot id {0}")]
    MissingSnapshot(u64),

    /// `commit` or `rollback` was called with no transaction in progress.
    #[error("no state transaction in progress")]
    NoTransaction,

    /// `begin` was called while a transaction was already in progress.
    #[error("a state transaction is already in progress")]
    TransactionInProgress,
}
