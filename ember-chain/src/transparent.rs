//! Transparent value transfer: outpoints, inputs, outputs, addresses.
#![allow(clippy::unit_arg)]

mod address;
mod script;

pub use address::Address;
pub use script::Script;

use crate::{transaction, EmberDeserialize, EmberSerialize, SerializationError};
use ember_serde_derive::{EmberDeserialize, EmberSerialize};
use serde::{Deserialize, Serialize};

#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;

/// OutPoint
///
/// A particular transaction output reference.
#[derive(
    Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Hash, EmberSerialize,
    EmberDeserialize,
)]
pub struct OutPoint {
    /// References the transaction that contains the UTXO being spent.
    pub hash: transaction::Hash,

    /// Identifies which UTXO from that transaction is referenced; the
    /// first output is 0, etc.
    pub index: u32,
}

impl OutPoint {
    #[inline]
    pub const fn len() -> usize {
        36
    }
}

/// A transparent input to a transaction.
///
/// A coinbase input is the distinguished form whose `previous_output.hash`
/// is the all-zero hash; it creates new coins instead of spending an
/// existing output, and its `signature` field carries the block height the
/// coinbase belongs to (keeping coinbase transaction ids unique per block).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, EmberSerialize, EmberDeserialize)]
pub struct Input {
    /// The previous output being spent.
    pub previous_output: OutPoint,
    /// DER-encoded ECDSA signature over the transaction's signing digest.
    pub signature: Vec<u8>,
    /// The compressed public key whose address owns `previous_output`.
    pub public_key: Vec<u8>,
    /// The sequence number for the input.
    pub sequence: u64,
}

impl Input {
    pub fn new(previous_output: OutPoint, public_key: Vec<u8>) -> Input {
        Input {
            previous_output,
            signature: Vec::new(),
            public_key,
            sequence: 0,
        }
    }

    /// The coinbase input form for a block at `height`.
    pub fn coinbase(height: u64) -> Input {
        Input {
            previous_output: OutPoint {
                hash: transaction::Hash::ZERO,
                index: 0,
            },
            signature: height.to_le_bytes().to_vec(),
            public_key: Vec::new(),
            sequence: u64::MAX,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.previous_output.hash == transaction::Hash::ZERO
    }

    /// The block height encoded in a coinbase input's data field, if any.
    pub fn coinbase_height(&self) -> Option<u64> {
        if !self.is_coinbase() || self.signature.len() < 8 {
            return None;
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&self.signature[0..8]);
        Some(u64::from_le_bytes(bytes))
    }

    /// Returns the serialized length (in bytes) of this input.
    pub fn len(&self) -> usize {
        OutPoint::len() + 4 + self.signature.len() + 4 + self.public_key.len() + 8
    }
}

/// A transparent output from a transaction.
///
/// The value you own in your "wallet" is in fact a subset of unspent
/// transaction outputs of the global UTXO set. UTXOs are indivisible,
/// discrete units of value which can only be consumed in their entirety, so
/// a transfer that spends a larger output returns the change to the sender
/// in a second output.
#[derive(
    Clone, Debug, Eq, PartialEq, Serialize, Deserialize, Hash, EmberSerialize, EmberDeserialize,
)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Output {
    /// Transaction value.
    pub value: u64,

    /// The address entitled to spend this output.
    pub recipient: Address,

    /// Attached script bytes; non-empty only for contract outputs, where
    /// they carry the contract call payload.
    pub script_pubkey: Script,

    /// The position of this output within its transaction.
    pub index: u32,
}

impl Output {
    pub fn new(value: u64, recipient: Address, index: u32) -> Output {
        Output {
            value,
            recipient,
            script_pubkey: Script(Vec::new()),
            index,
        }
    }

    /// Returns the serialized length (in bytes) of this output.
    pub fn len(&self) -> usize {
        8 + 4 + Address::serialized_len() + 4 + self.script_pubkey.0.len() + 4
    }
}
