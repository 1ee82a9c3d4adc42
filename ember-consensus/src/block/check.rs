//! Consensus check functions for blocks.

use std::collections::HashSet;

use ember_chain::{
    block::{Block, Header},
    transaction, work,
};

use crate::error::*;
use crate::transaction::check as tx_check;

/// Returns `Ok(())` if there is exactly one coinbase transaction in `block`,
/// and that coinbase transaction is the first transaction in the block.
pub fn coinbase_is_first(block: &Block) -> Result<(), BlockError> {
    let first = block.transactions.get(0).ok_or(BlockError::NoTransactions)?;
    let mut rest = block.transactions.iter().skip(1);
    if !first.is_coinbase() {
        return Err(TransactionError::CoinbasePosition)?;
    }
    if rest.any(|tx| tx.contains_coinbase_input()) {
        return Err(TransactionError::CoinbaseInputFound)?;
    }

    Ok(())
}

/// Returns `Ok(())` if the header's version and difficulty fields are
/// structurally valid.
pub fn header_is_valid(header: &Header) -> Result<(), BlockError> {
    if header.version == 0 {
        return Err(BlockError::BadVersion);
    }
    if header.difficulty == 0 {
        return Err(BlockError::ZeroDifficulty);
    }
    Ok(())
}

/// Returns `Ok(())` if the header's transaction count matches the body.
pub fn transaction_count_matches(block: &Block) -> Result<(), BlockError> {
    let body = block.transactions.len() as u32;
    if block.header.transaction_count != body {
        return Err(BlockError::TransactionCountMismatch {
            header: block.header.transaction_count,
            body,
        });
    }
    Ok(())
}

/// Returns `Ok(())` if the serialized size of `block` is within `limit`.
pub fn size_is_valid(block: &Block, limit: u64) -> Result<(), BlockError> {
    let size = block.len() as u64;
    if size > limit {
        return Err(BlockError::OversizedBlock { size, limit });
    }
    Ok(())
}

/// Check Merkle root validity.
///
/// `transaction_hashes` is a precomputed list of transaction hashes.
pub fn merkle_root_validity(
    block: &Block,
    transaction_hashes: &[transaction::Hash],
) -> Result<(), BlockError> {
    let merkle_root = transaction_hashes.iter().cloned().collect();

    if block.header.merkle_root != merkle_root {
        return Err(BlockError::BadMerkleRoot {
            actual: merkle_root,
            expected: block.header.merkle_root,
        });
    }

    // Duplicate transactions would imply a double-spend, and pairwise
    // Merkle trees are malleable under duplication of the tail. Reject
    // duplicates outright.
    if transaction_hashes.len() != transaction_hashes.iter().collect::<HashSet<_>>().len() {
        return Err(BlockError::DuplicateTransaction);
    }

    Ok(())
}

/// Returns `Ok(())` if the block hash meets the proof-of-work target for
/// the difficulty declared in its header.
///
/// The genesis block is exempt from this filter, but not from structural
/// validation; callers skip it at height zero.
pub fn difficulty_filter(block: &Block) -> Result<(), BlockError> {
    let hash = block.hash();
    if !work::hash_meets_target(&hash, block.header.difficulty) {
        return Err(BlockError::DifficultyFilter {
            hash,
            difficulty: block.header.difficulty,
        });
    }
    Ok(())
}

/// The median of the given ancestor timestamps.
///
/// The slice covers up to the last 11 ancestors, newest or oldest first;
/// ordering does not matter. An empty slice yields zero, so the rule
/// degenerates to "after the epoch" for blocks right above genesis.
pub fn median_time(ancestor_times: &[u64]) -> u64 {
    if ancestor_times.is_empty() {
        return 0;
    }
    let mut times = ancestor_times.to_vec();
    times.sort_unstable();
    times[times.len() / 2]
}

/// Returns `Ok(())` if `header.time` is strictly greater than the median of
/// its recent ancestors' timestamps.
pub fn time_is_after_median(header: &Header, ancestor_times: &[u64]) -> Result<(), BlockError> {
    let median = median_time(ancestor_times);
    if header.time <= median {
        return Err(BlockError::TimeTooEarly {
            time: header.time,
            median,
        });
    }
    Ok(())
}

/// All context-free checks: header structure, coinbase position, Merkle
/// root, transaction count, size, and per-transaction stateless rules.
pub fn block_is_structurally_valid(block: &Block, size_limit: u64) -> Result<(), BlockError> {
    header_is_valid(&block.header)?;
    coinbase_is_first(block)?;
    transaction_count_matches(block)?;
    size_is_valid(block, size_limit)?;

    let transaction_hashes: Vec<_> = block.transactions.iter().map(|tx| tx.hash()).collect();
    merkle_root_validity(block, &transaction_hashes)?;

    for tx in block.transactions.iter() {
        tx_check::stateless_checks(tx)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_chain::parameters::{genesis, NetworkParameters};

    #[test]
    fn genesis_is_structurally_valid() {
        ember_test::init();

        let params = NetworkParameters::default();
        let block = genesis::genesis_block(&params);
        block_is_structurally_valid(&block, params.max_block_bytes).unwrap();
    }

    #[test]
    fn tampered_merkle_root_rejected() {
        ember_test::init();

        let params = NetworkParameters::default();
        let mut block = genesis::genesis_block(&params);
        block.header.merkle_root = ember_chain::block::merkle::Root([0xee; 32]);
        assert!(matches!(
            block_is_structurally_valid(&block, params.max_block_bytes),
            Err(BlockError::BadMerkleRoot { .. })
        ));
    }

    #[test]
    fn wrong_transaction_count_rejected() {
        ember_test::init();

        let params = NetworkParameters::default();
        let mut block = genesis::genesis_block(&params);
        block.header.transaction_count = 9;
        assert!(matches!(
            block_is_structurally_valid(&block, params.max_block_bytes),
            Err(BlockError::TransactionCountMismatch { header: 9, body: 1 })
        ));
    }

    #[test]
    fn duplicate_transactions_rejected() {
        ember_test::init();

        let params = NetworkParameters::default();
        let mut block = genesis::genesis_block(&params);
        let coinbase = block.transactions[0].clone();
        block.transactions.push(coinbase);
        block.header.transaction_count = 2;
        block.header.merkle_root = block.transactions.iter().map(|tx| tx.hash()).collect();
        // The duplicated coinbase trips the coinbase-position rule first.
        assert!(block_is_structurally_valid(&block, params.max_block_bytes).is_err());
    }

    #[test]
    fn median_time_of_window() {
        ember_test::init();

        assert_eq!(median_time(&[]), 0);
        assert_eq!(median_time(&[5]), 5);
        assert_eq!(median_time(&[3, 1, 2]), 2);
        assert_eq!(median_time(&[10, 20, 30, 40, 50, 60, 70, 80, 90, 100, 110]), 60);
    }

    #[test]
    fn time_must_exceed_median() {
        ember_test::init();

        let params = NetworkParameters::default();
        let mut block = genesis::genesis_block(&params);
        block.header.time = 100;
        assert!(time_is_after_median(&block.header, &[99, 100, 101]).is_err());
        block.header.time = 101;
        time_is_after_median(&block.header, &[99, 100, 101]).unwrap();
    }
}
