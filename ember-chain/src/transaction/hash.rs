use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::serialization::{EmberDeserialize, EmberSerialize, SerializationError};

#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;

use super::Transaction;

/// A transaction hash, the canonical identifier of a transaction.
///
/// This is the SHA-256 hash of the transaction's canonical serialization,
/// rendered as 64 lowercase hex characters.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// The all-zero hash, reserved for coinbase input references.
    pub const ZERO: Hash = Hash([0u8; 32]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("transaction::Hash")
            .field(&hex::encode(&self.0))
            .finish()
    }
}

impl<'a> From<&'a Transaction> for Hash {
    fn from(transaction: &'a Transaction) -> Self {
        let bytes = transaction
            .ember_serialize_to_vec()
            .expect("serialization into a vec is infallible");
        Hash(crypto::sha256(&bytes))
    }
}

impl EmberSerialize for Hash {
    fn ember_serialize<W: std::io::Write>(&self, writer: W) -> Result<(), std::io::Error> {
        self.0.ember_serialize(writer)
    }
}

impl EmberDeserialize for Hash {
    fn ember_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Hash(<[u8; 32]>::ember_deserialize(&mut reader)?))
    }
}

impl std::str::FromStr for Hash {
    type Err = SerializationError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0; 32];
        if hex::decode_to_slice(s, &mut bytes[..]).is_err() {
            Err(SerializationError::Parse("hex decoding error"))
        } else {
            Ok(Hash(bytes))
        }
    }
}
