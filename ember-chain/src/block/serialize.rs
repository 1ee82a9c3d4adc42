//! Canonical serialization for blocks and block headers.
//!
//! A block serializes as its header's canonical bytes followed by a `u32`
//! transaction count and each transaction's canonical bytes. The header's
//! canonical bytes are the sole input to the block hash.

use std::convert::TryInto;
use std::sync::Arc;

use byteorder::{LittleEndian, WriteBytesExt};

use super::{merkle, Block, Hash, Header};
use crate::transaction::Transaction;
use crate::{EmberDeserialize, EmberSerialize, SerializationError};

/// The maximum serialized size of a block, in bytes.
pub const MAX_BLOCK_BYTES: u64 = 2_000_000;

impl EmberSerialize for Header {
    fn ember_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.version.ember_serialize(&mut target)?;
        self.previous_block_hash.ember_serialize(&mut target)?;
        self.merkle_root.ember_serialize(&mut target)?;
        self.time.ember_serialize(&mut target)?;
        self.nonce.ember_serialize(&mut target)?;
        self.difficulty.ember_serialize(&mut target)?;
        self.height.ember_serialize(&mut target)?;
        self.transaction_count.ember_serialize(&mut target)?;
        Ok(())
    }
}

impl EmberDeserialize for Header {
    fn ember_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        // Read the exact header bytes once so the hash can be computed
        // without reserializing.
        let mut bytes = vec![0u8; Header::len()];
        reader
            .read_exact(&mut bytes)
            .map_err(|_| SerializationError::Parse("Not enough bytes in block header"))?;
        let own_hash = Hash(crate::crypto::sha256(&bytes));

        let mut src = std::io::Cursor::new(bytes);
        let mut header = Header::new(
            u32::ember_deserialize(&mut src)?,
            Hash::ember_deserialize(&mut src)?,
            merkle::Root::ember_deserialize(&mut src)?,
            u64::ember_deserialize(&mut src)?,
            u64::ember_deserialize(&mut src)?,
            u32::ember_deserialize(&mut src)?,
            u64::ember_deserialize(&mut src)?,
            u32::ember_deserialize(&mut src)?,
        );
        header.cache_hash(own_hash);
        Ok(header)
    }
}

impl EmberSerialize for Block {
    fn ember_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.header.ember_serialize(&mut target)?;
        target.write_u32::<LittleEndian>(self.transactions.len() as u32)?;
        for transaction in self.transactions.iter() {
            transaction.ember_serialize(&mut target)?;
        }
        Ok(())
    }
}

impl EmberDeserialize for Block {
    fn ember_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        let header = Header::ember_deserialize(&mut reader)?;

        let mut reader = reader.take(MAX_BLOCK_BYTES - Header::len() as u64);
        let tx_count = u32::ember_deserialize(&mut reader)? as u64;

        // Sanity check the claimed count to prevent DOS by preallocation:
        // every transaction needs at least an empty input and output list.
        if tx_count > MAX_BLOCK_BYTES / 16 {
            return Err(SerializationError::Parse(
                "Block transaction count too large for its size bound",
            ));
        }
        let mut transactions = Vec::with_capacity(
            tx_count
                .try_into()
                .expect("transaction count bounded by MAX_BLOCK_BYTES"),
        );
        for _ in 0..tx_count {
            transactions.push(<Arc<Transaction>>::ember_deserialize(&mut reader)?);
        }

        Ok(Block {
            header,
            transactions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameters::{genesis, NetworkParameters};
    use crate::EmberDeserializeInto;

    #[test]
    fn header_roundtrip_preserves_hash() {
        ember_test::init();

        let params = NetworkParameters::default();
        let block = genesis::genesis_block(&params);

        let bytes = block.header.ember_serialize_to_vec().unwrap();
        assert_eq!(bytes.len(), Header::len());

        let parsed: Header = bytes.as_slice().ember_deserialize_into().unwrap();
        assert_eq!(parsed, block.header);
        // Deserialization caches the hash of the exact wire bytes.
        assert_eq!(parsed.hash(), block.header.hash());
    }

    #[test]
    fn block_roundtrip() {
        ember_test::init();

        let params = NetworkParameters::default();
        let block = genesis::genesis_block(&params);

        let bytes = block.ember_serialize_to_vec().unwrap();
        assert_eq!(bytes.len(), block.len());

        let parsed: Block = bytes.as_slice().ember_deserialize_into().unwrap();
        assert_eq!(parsed, block);
        assert_eq!(parsed.hash(), block.hash());
    }

    #[test]
    fn truncated_block_rejected() {
        ember_test::init();

        let params = NetworkParameters::default();
        let block = genesis::genesis_block(&params);

        let bytes = block.ember_serialize_to_vec().unwrap();
        let truncated = &bytes[..bytes.len() - 3];
        assert!(truncated.ember_deserialize_into::<Block>().is_err());
    }

    #[test]
    fn absurd_transaction_count_rejected() {
        ember_test::init();

        let params = NetworkParameters::default();
        let block = genesis::genesis_block(&params);

        let mut bytes = block.header.ember_serialize_to_vec().unwrap();
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(bytes.as_slice().ember_deserialize_into::<Block>().is_err());
    }
}
