//! The block producer: template assembly and the bounded nonce search.
//!
//! The search loop checks its cancellation flag every few thousand nonces
//! so a new tip, a material mempool change, or shutdown stops it promptly.
//! Solved candidates go back through the chain manager; nothing is
//! announced to peers before the chain manager accepts it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use ember_chain::block::{Block, Header};
use ember_chain::transaction::Transaction;
use ember_chain::transparent::Address;
use ember_chain::work;
use ember_consensus::{ChainError, ChainManager};

use super::mempool::Mempool;

/// How many nonces are tried between cancellation checks.
const CANCEL_CHECK_INTERVAL: u64 = 4096;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MinerConfig {
    /// Whether the producer loop starts with the node.
    pub enabled: bool,
    /// The address coinbase outputs pay; defaults to the wallet's default
    /// account.
    pub reward_address: Option<String>,
    /// Upper bound on non-coinbase transactions per template.
    pub max_transactions: usize,
}

impl Default for MinerConfig {
    fn default() -> Self {
        MinerConfig {
            enabled: false,
            reward_address: None,
            max_transactions: 500,
        }
    }
}

/// The template assembler.
pub struct Miner {
    chain: Arc<ChainManager>,
    mempool: Arc<Mempool>,
    reward_address: Address,
    max_transactions: usize,
}

impl Miner {
    pub fn new(
        chain: Arc<ChainManager>,
        mempool: Arc<Mempool>,
        reward_address: Address,
        max_transactions: usize,
    ) -> Miner {
        Miner {
            chain,
            mempool,
            reward_address,
            max_transactions,
        }
    }

    /// Assemble an unsolved candidate on the current tip.
    pub fn assemble_template(&self) -> Result<Block, ChainError> {
        let (tip_height, tip_hash) = self.chain.tip();
        let height = tip_height + 1;
        let difficulty = self.chain.next_difficulty();

        let selected = self.mempool.select(self.max_transactions);
        let fees: u64 = selected.iter().map(|(_, fee)| fee).sum();
        let reward = self.chain.parameters().block_reward.saturating_add(fees);

        let coinbase = Arc::new(Transaction::coinbase(height, reward, self.reward_address));
        let mut transactions = vec![coinbase];
        transactions.extend(selected.into_iter().map(|(tx, _)| tx));

        // The header time must beat the median of recent ancestors even if
        // the wall clock lags them.
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock set before the unix epoch")
            .as_secs();
        let time = now.max(self.chain.median_time_past() + 1);

        let merkle_root = transactions.iter().map(|tx| tx.hash()).collect();
        let header = Header::new(
            1,
            tip_hash,
            merkle_root,
            time,
            0,
            difficulty,
            height,
            transactions.len() as u32,
        );
        debug!(height, difficulty, txs = header.transaction_count, "assembled block template");
        Ok(Block::new(header, transactions))
    }

    /// Search the nonce space until the template solves or `cancel` flips.
    pub fn solve(mut block: Block, cancel: &AtomicBool) -> Option<Block> {
        let difficulty = block.header.difficulty;
        loop {
            if work::hash_meets_target(&block.hash(), difficulty) {
                return Some(block);
            }
            block.header.nonce = block.header.nonce.wrapping_add(1);
            if block.header.nonce % CANCEL_CHECK_INTERVAL == 0 {
                if cancel.load(Ordering::Relaxed) {
                    return None;
                }
                // The nonce space wrapped without a solution: refresh the
                // timestamp and keep going.
                if block.header.nonce == 0 {
                    block.header.time += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_chain::parameters::{Network, NetworkParameters};
    use ember_consensus::{BlockOutcome, NullRuntime};
    use ember_state::{MemoryBlockStore, MemoryStateStore};

    use crate::components::mempool::MempoolConfig;

    fn setup() -> (Arc<ChainManager>, Miner) {
        let chain = Arc::new(
            ChainManager::init(
                NetworkParameters::test(),
                Arc::new(MemoryBlockStore::new()),
                Arc::new(MemoryStateStore::new()),
                Arc::new(NullRuntime),
            )
            .unwrap(),
        );
        let mempool = Arc::new(Mempool::new(MempoolConfig::default()));
        let miner = Miner::new(
            chain.clone(),
            mempool,
            Address::new(Network::Testnet, [0x44; 20]),
            500,
        );
        (chain, miner)
    }

    #[test]
    fn template_extends_tip_with_coinbase() {
        ember_test::init();

        let (chain, miner) = setup();
        let template = miner.assemble_template().unwrap();
        assert_eq!(template.height(), 1);
        assert!(template.coinbase().is_some());
        assert_eq!(template.header.previous_block_hash, chain.tip().1);
        assert!(template.header.time > chain.median_time_past());
    }

    #[test]
    fn solved_template_is_accepted() {
        ember_test::init();

        let (chain, miner) = setup();
        let template = miner.assemble_template().unwrap();
        let cancel = AtomicBool::new(false);
        let solved = Miner::solve(template, &cancel).expect("difficulty one solves");
        assert_eq!(
            chain.commit_block(solved).unwrap(),
            BlockOutcome::Accepted { height: 1 }
        );
    }

    #[test]
    fn cancellation_stops_the_search() {
        ember_test::init();

        let (_chain, miner) = setup();
        let mut template = miner.assemble_template().unwrap();
        // A hopeless target: only a cancellation ends the loop.
        template.header.difficulty = u32::MAX;
        let cancel = AtomicBool::new(true);
        assert!(Miner::solve(template, &cancel).is_none());
    }
}
