//! Transactions and transaction-related structures.

use crate::cached::Cached;
use crate::crypto::{self, CryptoError, KeyPair};
use serde::{Deserialize, Serialize};

mod hash;
mod serialize;

#[cfg(test)]
mod tests;

pub use hash::Hash;

use crate::transparent;

/// The derived classification of a transaction.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Kind {
    /// An ordinary value transfer.
    Regular,
    /// The first transaction of a block, creating new coins and collecting
    /// fees.
    Coinbase,
    /// A transfer whose outputs carry contract call payloads, executed by
    /// the contract runtime during block application.
    Contract,
}

/// An Ember transaction.
///
/// A transaction is an encoded data structure that facilitates the transfer
/// of value between public key addresses. Its id is the SHA-256 of the
/// canonical serialization, so the id is stable across signing: signatures
/// enter the id only through the canonical byte form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// The transaction version.
    pub version: u32,
    /// The transaction inputs.
    pub inputs: Vec<transparent::Input>,
    /// The transaction outputs.
    pub outputs: Vec<transparent::Output>,
    /// Earliest time (unix seconds) this transaction may be included; zero
    /// disables the lock.
    pub lock_time: u32,
    hash: Cached<Hash>,
}

impl Transaction {
    pub fn new(
        version: u32,
        inputs: Vec<transparent::Input>,
        outputs: Vec<transparent::Output>,
        lock_time: u32,
    ) -> Transaction {
        Transaction {
            version,
            inputs,
            outputs,
            lock_time,
            hash: Cached::new(),
        }
    }

    /// Build the coinbase transaction for a block at `height`, paying
    /// `value` (subsidy plus fees) to `recipient`.
    pub fn coinbase(height: u64, value: u64, recipient: transparent::Address) -> Transaction {
        Transaction::new(
            1,
            vec![transparent::Input::coinbase(height)],
            vec![transparent::Output::new(value, recipient, 0)],
            0,
        )
    }

    /// Get the hash (id) of this transaction.
    pub fn hash(&self) -> Hash {
        // If we have a cached version, just return that
        if let Some(hash) = self.hash.value() {
            return hash;
        }
        // Otherwise, serialize the tx to calculate and return the hash
        Hash::from(self)
    }

    pub fn contains_coinbase_input(&self) -> bool {
        self.inputs.iter().any(|input| input.is_coinbase())
    }

    /// Returns `true` if this transaction is a coinbase transaction.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// The derived transaction kind.
    pub fn kind(&self) -> Kind {
        if self.is_coinbase() {
            Kind::Coinbase
        } else if self.outputs.iter().any(|o| !o.script_pubkey.is_empty()) {
            Kind::Contract
        } else {
            Kind::Regular
        }
    }

    /// The digest every input signature commits to: the canonical bytes
    /// with all signature fields cleared to length zero.
    pub fn signing_digest(&self) -> [u8; 32] {
        crypto::sha256(&serialize::signing_bytes(self))
    }

    /// Fill the signature of every unsigned input whose public key belongs
    /// to `keys`.
    pub fn sign(&mut self, keys: &KeyPair) -> Result<(), CryptoError> {
        let digest = self.signing_digest();
        let public_key = keys.public_key_bytes();
        for input in self
            .inputs
            .iter_mut()
            .filter(|input| input.signature.is_empty() && input.public_key == public_key)
        {
            input.signature = keys.sign(&digest);
        }
        // Signatures changed the canonical bytes.
        self.hash = Cached::new();
        Ok(())
    }

    /// Sum of output values, or `None` on overflow.
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, output| acc.checked_add(output.value))
    }

    /// Returns the serialized length (in bytes) of this transaction.
    pub fn len(&self) -> usize {
        let mut size = 4 + 4;
        for input in self.inputs.iter() {
            size += input.len();
        }
        size += 4;
        for output in self.outputs.iter() {
            size += output.len();
        }
        size + 4
    }
}
