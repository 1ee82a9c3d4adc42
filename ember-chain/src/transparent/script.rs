use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{EmberDeserialize, EmberSerialize, SerializationError};

#[cfg(any(test, feature = "proptest-impl"))]
use proptest_derive::Arbitrary;

/// An encoded script payload attached to an output.
///
/// Regular transfer outputs carry an empty script; contract outputs carry
/// the call payload handed to the contract runtime.
#[derive(Clone, Eq, PartialEq, Serialize, Deserialize, Hash, Default)]
#[cfg_attr(any(test, feature = "proptest-impl"), derive(Arbitrary))]
pub struct Script(pub Vec<u8>);

impl Script {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length-prefixed serialized size in bytes.
    pub fn serialized_size(&self) -> usize {
        4 + self.0.len()
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Script").field(&hex::encode(&self.0)).finish()
    }
}

impl EmberSerialize for Script {
    fn ember_serialize<W: std::io::Write>(&self, writer: W) -> Result<(), std::io::Error> {
        self.0.ember_serialize(writer)
    }
}

impl EmberDeserialize for Script {
    fn ember_deserialize<R: std::io::Read>(reader: R) -> Result<Self, SerializationError> {
        Ok(Script(Vec::<u8>::ember_deserialize(reader)?))
    }
}
