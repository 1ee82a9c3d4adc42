//! Errors that can occur when checking or applying consensus rules.

use displaydoc::Display;
use thiserror::Error;

use ember_chain::block::{self, merkle};
use ember_chain::crypto::CryptoError;
use ember_chain::transparent::OutPoint;
use ember_state::StoreError;

/// A rule violation in one transaction.
#[derive(Error, Display, Debug)]
pub enum TransactionError {
    /// coinbase transaction found outside the first position
    CoinbasePosition,

    /// coinbase-style input found in a non-coinbase transaction
    CoinbaseInputFound,

    /// coinbase transaction has a malformed input
    BadCoinbaseInput,

    /// transaction version is zero
    BadVersion,

    /// non-coinbase transaction has no inputs
    NoInputs,

    /// transaction has no outputs
    NoOutputs,

    /// output {index} has zero value
    ZeroValueOutput { index: u32 },

    /// output index {found} does not match its position {expected}
    BadOutputIndex { expected: u32, found: u32 },

    /// missing signature or public key on input {index}
    MissingSignature { index: usize },

    /// signature on input {index} does not verify
    InvalidSignature { index: usize },

    /// output {0:?} is spent more than once
    DuplicateSpend(OutPoint),

    /// input references unknown or already spent output {0:?}
    MissingUtxo(OutPoint),

    /// input public key does not own the referenced output {0:?}
    WrongOwner(OutPoint),

    /// input value {inputs} is less than output value {outputs}
    InsufficientInputValue { inputs: u64, outputs: u64 },

    /// a value sum overflowed
    ValueOverflow,

    /// lock time {lock_time} is after the containing block time {block_time}
    Premature { lock_time: u32, block_time: u64 },

    /// cryptographic primitive failed: {0}
    Crypto(#[from] CryptoError),
}

/// A rule violation in one block.
#[derive(Error, Display, Debug)]
pub enum BlockError {
    /// block has no transactions
    NoTransactions,

    /// block version is zero
    BadVersion,

    /// header difficulty is zero
    ZeroDifficulty,

    /// header transaction count {header} does not match the body count {body}
    TransactionCountMismatch { header: u32, body: u32 },

    /// merkle root {actual} does not match the header root {expected}
    BadMerkleRoot {
        actual: merkle::Root,
        expected: merkle::Root,
    },

    /// block contains duplicate transaction ids
    DuplicateTransaction,

    /// serialized block size {size} exceeds the limit {limit}
    OversizedBlock { size: u64, limit: u64 },

    /// block hash {hash} does not meet the target for difficulty {difficulty}
    DifficultyFilter {
        hash: block::Hash,
        difficulty: u32,
    },

    /// block difficulty {found} does not match the expected value {expected}
    UnexpectedDifficulty { expected: u32, found: u32 },

    /// block height {found} does not follow its parent height {parent}
    UnexpectedHeight { parent: u64, found: u64 },

    /// block time {time} is not after the median {median} of its ancestors
    TimeTooEarly { time: u64, median: u64 },

    /// coinbase claims {claimed} but subsidy plus fees allow only {allowed}
    ExcessCoinbaseValue { claimed: u64, allowed: u64 },

    /// invalid transaction: {0}
    Transaction(#[from] TransactionError),
}

/// A failure while updating the chain.
#[derive(Error, Display, Debug)]
pub enum ChainError {
    /// invalid block: {0}
    Block(#[from] BlockError),

    /// storage failure: {0}
    Store(#[from] StoreError),

    /// block {0} conflicts with the configured genesis block
    ConflictingGenesis(block::Hash),

    /// reorganization failed and state was restored: {0}
    ReorgFailed(String),

    /// unknown block {0}
    UnknownBlock(block::Hash),

    /// contract execution failed: {0}
    Contract(String),

    /// chain replay diverged at height {height}: {reason}
    ReplayMismatch { height: u64, reason: String },
}

impl ChainError {
    /// Whether this error indicates a fault in the submitted block rather
    /// than in the local node. Faults are attributed to the delivering
    /// peer.
    pub fn is_block_fault(&self) -> bool {
        matches!(
            self,
            ChainError::Block(_) | ChainError::ConflictingGenesis(_)
        )
    }
}
