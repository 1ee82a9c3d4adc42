//! Inventory items for the Ember protocol.

use std::io::{Read, Write};

use ember_chain::{
    block,
    serialization::{EmberDeserialize, EmberSerialize, SerializationError},
    transaction,
};

/// An inventory hash which refers to some advertised or requested data.
///
/// This is a typed hash, not a container: `INV` and `GETDATA` carry lists
/// of these.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum InventoryHash {
    /// A hash of a transaction.
    Tx(transaction::Hash),
    /// A hash of a block.
    Block(block::Hash),
}

impl From<transaction::Hash> for InventoryHash {
    fn from(tx: transaction::Hash) -> InventoryHash {
        InventoryHash::Tx(tx)
    }
}

impl From<block::Hash> for InventoryHash {
    fn from(hash: block::Hash) -> InventoryHash {
        InventoryHash::Block(hash)
    }
}

impl EmberSerialize for InventoryHash {
    fn ember_serialize<W: Write>(&self, mut writer: W) -> Result<(), std::io::Error> {
        let (code, bytes) = match *self {
            InventoryHash::Tx(hash) => (1u8, hash.0),
            InventoryHash::Block(hash) => (2u8, hash.0),
        };
        writer.write_all(&[code])?;
        bytes.ember_serialize(&mut writer)?;
        Ok(())
    }
}

impl EmberDeserialize for InventoryHash {
    fn ember_deserialize<R: Read>(mut reader: R) -> Result<Self, SerializationError> {
        let code = u8::ember_deserialize(&mut reader)?;
        let bytes = <[u8; 32]>::ember_deserialize(&mut reader)?;
        match code {
            1 => Ok(InventoryHash::Tx(transaction::Hash(bytes))),
            2 => Ok(InventoryHash::Block(block::Hash(bytes))),
            _ => Err(SerializationError::Parse("invalid inventory code")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_chain::EmberDeserializeInto;

    #[test]
    fn round_trip() {
        let items = vec![
            InventoryHash::Tx(transaction::Hash([1; 32])),
            InventoryHash::Block(block::Hash([2; 32])),
        ];
        let bytes = items.ember_serialize_to_vec().unwrap();
        let parsed: Vec<InventoryHash> = bytes.as_slice().ember_deserialize_into().unwrap();
        assert_eq!(items, parsed);
    }

    #[test]
    fn invalid_kind_rejected() {
        let mut bytes = vec![9u8];
        bytes.extend_from_slice(&[0u8; 32]);
        assert!(bytes.as_slice().ember_deserialize_into::<InventoryHash>().is_err());
    }
}
