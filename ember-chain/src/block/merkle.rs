//! The Merkle tree over a block's transaction ids.
//!
//! Interior nodes hash the concatenation of their children with SHA-256; an
//! odd tail is paired with itself. The empty transaction list maps to the
//! all-zero root.

use std::fmt;
use std::iter::FromIterator;

use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::serialization::{EmberDeserialize, EmberSerialize, SerializationError};
use crate::transaction;

#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;

/// The root of a transaction Merkle tree.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Root(pub [u8; 32]);

impl Root {
    pub const ZERO: Root = Root([0u8; 32]);
}

impl fmt::Display for Root {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl fmt::Debug for Root {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("merkle::Root")
            .field(&hex::encode(&self.0))
            .finish()
    }
}

impl FromIterator<transaction::Hash> for Root {
    fn from_iter<I>(hashes: I) -> Self
    where
        I: IntoIterator<Item = transaction::Hash>,
    {
        let mut level: Vec<[u8; 32]> = hashes.into_iter().map(|hash| hash.0).collect();
        if level.is_empty() {
            return Root::ZERO;
        }
        while level.len() > 1 {
            let mut next = Vec::with_capacity((level.len() + 1) / 2);
            for pair in level.chunks(2) {
                let mut data = [0u8; 64];
                data[0..32].copy_from_slice(&pair[0]);
                // An odd tail is paired with itself.
                data[32..64].copy_from_slice(if pair.len() == 2 { &pair[1] } else { &pair[0] });
                next.push(crypto::sha256(&data));
            }
            level = next;
        }
        Root(level[0])
    }
}

impl EmberSerialize for Root {
    fn ember_serialize<W: std::io::Write>(&self, writer: W) -> Result<(), std::io::Error> {
        self.0.ember_serialize(writer)
    }
}

impl EmberDeserialize for Root {
    fn ember_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Root(<[u8; 32]>::ember_deserialize(&mut reader)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx_hash(byte: u8) -> transaction::Hash {
        transaction::Hash([byte; 32])
    }

    #[test]
    fn empty_list_maps_to_zero_root() {
        let root: Root = std::iter::empty::<transaction::Hash>().collect();
        assert_eq!(root, Root::ZERO);
    }

    #[test]
    fn single_transaction_root_is_its_id() {
        let root: Root = vec![tx_hash(1)].into_iter().collect();
        assert_eq!(root.0, [1u8; 32]);
    }

    #[test]
    fn order_matters() {
        let a: Root = vec![tx_hash(1), tx_hash(2)].into_iter().collect();
        let b: Root = vec![tx_hash(2), tx_hash(1)].into_iter().collect();
        assert_ne!(a, b);
    }

    #[test]
    fn odd_tail_is_duplicated() {
        let three: Root = vec![tx_hash(1), tx_hash(2), tx_hash(3)].into_iter().collect();
        let padded: Root = vec![tx_hash(1), tx_hash(2), tx_hash(3), tx_hash(3)]
            .into_iter()
            .collect();
        assert_eq!(three, padded);
    }

    #[test]
    fn deterministic() {
        let a: Root = (0..7u8).map(tx_hash).collect();
        let b: Root = (0..7u8).map(tx_hash).collect();
        assert_eq!(a, b);
    }
}
