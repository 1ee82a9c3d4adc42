use crate::cached::Cached;
use serde::{Deserialize, Serialize};

use super::{merkle, Hash};

/// A block header, containing metadata about a block.
///
/// How are blocks chained together? They are chained together via the
/// backwards reference (previous header hash) present in the block header.
/// Each block points backwards to its parent, all the way back to the
/// genesis block (the first block in the blockchain).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Header {
    /// The block's version field.
    pub version: u32,

    /// The hash of the previous block, used to create a chain of blocks back
    /// to the genesis block.
    ///
    /// This ensures no previous block can be changed without also changing
    /// this block's header.
    pub previous_block_hash: Hash,

    /// The root of the transaction Merkle tree, binding the block header to
    /// the transactions in the block.
    pub merkle_root: merkle::Root,

    /// The block timestamp, as Unix epoch seconds (UTC), recorded by the
    /// miner when it started hashing the header.
    pub time: u64,

    /// An arbitrary field that miners change to produce a header hash below
    /// the target threshold.
    pub nonce: u64,

    /// The difficulty this block was mined at. The proof-of-work target is
    /// derived from it; see [`crate::work`].
    pub difficulty: u32,

    /// The height of this block: the number of blocks between it and the
    /// genesis block (which has height 0).
    pub height: u64,

    /// The number of transactions in the block body.
    pub transaction_count: u32,

    /// For efficiency, we cache the hash of this header after computing it
    /// the first time. This field is not part of the consensus
    /// serialization.
    hash: Cached<Hash>,
}

impl Header {
    /// Returns length of the serialized header in bytes.
    pub const fn len() -> usize {
        // version + previous + merkle root + time + nonce + difficulty
        // + height + transaction count
        4 + 32 + 32 + 8 + 8 + 4 + 8 + 4
    }

    #[allow(clippy::too_many_arguments)]
    pub fn new(
        version: u32,
        previous_block_hash: Hash,
        merkle_root: merkle::Root,
        time: u64,
        nonce: u64,
        difficulty: u32,
        height: u64,
        transaction_count: u32,
    ) -> Header {
        Header {
            version,
            previous_block_hash,
            merkle_root,
            time,
            nonce,
            difficulty,
            height,
            transaction_count,
            hash: Cached::new(),
        }
    }

    /// Compute (or return the cached) hash of this header.
    pub fn hash(&self) -> Hash {
        if let Some(hash) = self.hash.value() {
            return hash;
        }
        self.into()
    }

    pub(super) fn cache_hash(&mut self, hash: Hash) {
        self.hash = Cached::from(hash);
    }
}
