//! Blocks and block-related structures (headers, hashes, Merkle roots).
#![allow(clippy::unit_arg)]

mod hash;
mod header;
mod serialize;

pub mod merkle;


use std::{fmt, sync::Arc};

pub use hash::Hash;
pub use header::Header;
pub use serialize::MAX_BLOCK_BYTES;

use serde::{Deserialize, Serialize};

use crate::{fmt::DisplayToDebug, transaction::Transaction};

/// An Ember block, containing a header and a list of transactions.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// The block header, containing block metadata.
    pub header: Header,
    /// The block transactions.
    pub transactions: Vec<Arc<Transaction>>,
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("height", &self.header.height)
            .field("hash", &DisplayToDebug(self.hash()))
            .finish()
    }
}

impl Block {
    pub fn new(header: Header, transactions: Vec<Arc<Transaction>>) -> Block {
        Block {
            header,
            transactions,
        }
    }

    /// Compute the hash of this block.
    pub fn hash(&self) -> Hash {
        Hash::from(self)
    }

    /// The height this block claims in its header.
    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// The coinbase transaction, if the block has one in first position.
    pub fn coinbase(&self) -> Option<&Arc<Transaction>> {
        self.transactions.get(0).filter(|tx| tx.is_coinbase())
    }

    /// Returns the serialized length (in bytes) of this block.
    pub fn len(&self) -> usize {
        Header::len()
            + 4
            + self
                .transactions
                .iter()
                .map(|tx| tx.len())
                .sum::<usize>()
    }
}

impl<'a> From<&'a Block> for Hash {
    fn from(block: &'a Block) -> Hash {
        (&block.header).into()
    }
}
