//! Genesis block construction.

use std::sync::Arc;

use super::{Network, NetworkParameters};
use crate::block::{self, Block, Header};
use crate::transaction::Transaction;
use crate::transparent::Address;

/// The previous-block hash of the genesis block: all zeroes.
pub const GENESIS_PREVIOUS_BLOCK_HASH: block::Hash = block::Hash::ZERO;

/// The fixed timestamp of every genesis block (2023-11-14T22:13:20Z).
pub const GENESIS_TIME: u64 = 1_700_000_000;

/// The burn address receiving the unspendable genesis subsidy.
fn genesis_recipient(network: Network) -> Address {
    Address::new(network, [0u8; 20])
}

/// Build the deterministic genesis block for `params`.
///
/// Genesis is exempt from the proof-of-work check (its nonce is zero), but
/// not from structural validation: it carries a well-formed coinbase and a
/// matching Merkle root.
pub fn genesis_block(params: &NetworkParameters) -> Block {
    let coinbase = Transaction::coinbase(0, params.block_reward, genesis_recipient(params.network));
    let merkle_root = std::iter::once(coinbase.hash()).collect();

    let header = Header::new(
        1,
        GENESIS_PREVIOUS_BLOCK_HASH,
        merkle_root,
        GENESIS_TIME,
        0,
        params.initial_difficulty,
        0,
        1,
    );

    Block::new(header, vec![Arc::new(coinbase)])
}
