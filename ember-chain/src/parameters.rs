//! Network definitions and consensus parameters.

pub mod genesis;

use serde::{Deserialize, Serialize};

#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;

/// An Ember network.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub enum Network {
    /// The production network.
    Mainnet,
    /// The testing network.
    Testnet,
}

impl Default for Network {
    fn default() -> Self {
        Network::Mainnet
    }
}

impl Network {
    /// The four magic bytes identifying this network's wire frames.
    pub fn magic(&self) -> [u8; 4] {
        match self {
            Network::Mainnet => [0x45, 0x4d, 0x42, 0x52],
            Network::Testnet => [0x45, 0x4d, 0x54, 0x53],
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }
}

/// The consensus parameters of a network.
///
/// The retarget rule: every `retarget_interval` blocks, the ratio of actual
/// elapsed time over the interval to `retarget_interval × target_block_time`
/// is clamped to `[¼, 4]`, and the new difficulty is the old difficulty
/// times the inverse of the clamped ratio.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParameters {
    pub network: Network,
    /// The difficulty of the genesis block and the first retarget interval.
    pub initial_difficulty: u32,
    /// Target seconds between blocks.
    pub target_block_time: u64,
    /// Blocks between difficulty retargets.
    pub retarget_interval: u64,
    /// The subsidy paid by each block's coinbase, in base units.
    pub block_reward: u64,
    /// Upper bound on a serialized block, in bytes.
    pub max_block_bytes: u64,
}

impl Default for NetworkParameters {
    fn default() -> Self {
        NetworkParameters {
            network: Network::Mainnet,
            initial_difficulty: 1,
            target_block_time: 600,
            retarget_interval: 2016,
            block_reward: 50_0000_0000,
            max_block_bytes: crate::block::MAX_BLOCK_BYTES,
        }
    }
}

impl NetworkParameters {
    /// Parameters suitable for fast local testing: ten-second blocks and a
    /// short retarget window.
    pub fn test() -> Self {
        NetworkParameters {
            network: Network::Testnet,
            initial_difficulty: 1,
            target_block_time: 10,
            retarget_interval: 8,
            block_reward: 50_0000_0000,
            max_block_bytes: crate::block::MAX_BLOCK_BYTES,
        }
    }
}
