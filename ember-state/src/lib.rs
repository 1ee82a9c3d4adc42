//! Persistent storage for Ember: the block store and the account/UTXO state
//! store, each behind a backend-agnostic trait.
//!
//! Two durable backends are provided: an embedded ordered key-value backend
//! built on sled for production, and a JSON-on-disk backend for development
//! where inspecting state with a text editor matters more than throughput.
//! An in-memory backend backs tests and diagnostic chain replays.

pub mod block_store;
pub mod config;
pub mod error;
pub mod json_store;
pub mod memory_store;
pub mod sled_store;
pub mod state_store;

pub use block_store::BlockStore;
pub use config::Config;
pub use error::StoreError;
pub use json_store::{JsonBlockStore, JsonStateStore};
pub use memory_store::{MemoryBlockStore, MemoryStateStore};
pub use sled_store::{SledBlockStore, SledStateStore};
pub use state_store::{AccountState, StateStore};

use ember_chain::block;

/// A block query argument: by hash or by height on the active chain.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HashOrHeight {
    Hash(block::Hash),
    Height(u64),
}

impl From<block::Hash> for HashOrHeight {
    fn from(hash: block::Hash) -> Self {
        HashOrHeight::Hash(hash)
    }
}

impl From<u64> for HashOrHeight {
    fn from(height: u64) -> Self {
        HashOrHeight::Height(height)
    }
}
