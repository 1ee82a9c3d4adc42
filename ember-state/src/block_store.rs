//! The block store interface.

use std::path::Path;

use ember_chain::block::{self, Block};

use crate::StoreError;

/// Durable storage for blocks, indexed by hash and by active-chain height.
///
/// Implementations keep two indices: `blk` (hash → canonical block bytes)
/// and `hgt` (height → hash). `put` writes the body before the indices and
/// is idempotent on equal blocks; after it returns, both indices observe
/// the block. Side-chain blocks appear only in the hash index until a
/// reorganization promotes them, at which point the chain manager re-`put`s
/// them to claim their heights.
pub trait BlockStore: Send + Sync {
    /// Store a block under both indices.
    fn put(&self, block: &Block) -> Result<(), StoreError>;

    /// Store a block body under the hash index only, without claiming its
    /// height. Used for side-chain blocks.
    fn put_body(&self, block: &Block) -> Result<(), StoreError>;

    fn get_by_hash(&self, hash: &block::Hash) -> Result<Option<Block>, StoreError>;

    fn get_by_height(&self, height: u64) -> Result<Option<Block>, StoreError>;

    /// The highest indexed height and its hash, if any block is stored.
    fn tip(&self) -> Result<Option<(u64, block::Hash)>, StoreError>;

    fn height(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.tip()?.map(|(height, _)| height))
    }

    /// All indexed blocks with heights in `start..=end`, in height order.
    fn range(&self, start: u64, end: u64) -> Result<Vec<Block>, StoreError>;

    /// Remove a block from both indices. Returns whether it was present.
    fn delete(&self, hash: &block::Hash) -> Result<bool, StoreError>;

    /// Drop the height index entry for `height` without deleting the body.
    /// Used when a reorganization shortens the active chain.
    fn unindex_height(&self, height: u64) -> Result<(), StoreError>;

    /// Reclaim space; a no-op for backends without compaction.
    fn compact(&self) -> Result<(), StoreError>;

    /// Write a copy of the store to `path`.
    fn backup(&self, path: &Path) -> Result<(), StoreError>;

    /// Replace the store contents from a backup at `path`.
    fn restore(&self, path: &Path) -> Result<(), StoreError>;
}
