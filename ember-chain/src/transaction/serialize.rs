//! Canonical serialization for transactions.
//!
//! Layout: `version:u32 ∥ input_count:u32 ∥ inputs ∥ output_count:u32 ∥
//! outputs ∥ lock_time:u32`, all integers little-endian, byte strings
//! `u32`-length-prefixed. These bytes are the sole input to the transaction
//! hash.

use byteorder::{LittleEndian, WriteBytesExt};

use super::Transaction;
use crate::cached::Cached;
use crate::transparent;
use crate::{EmberDeserialize, EmberSerialize, SerializationError};

impl EmberSerialize for Transaction {
    fn ember_serialize<W: std::io::Write>(&self, mut target: W) -> Result<(), std::io::Error> {
        self.version.ember_serialize(&mut target)?;
        self.inputs.ember_serialize(&mut target)?;
        self.outputs.ember_serialize(&mut target)?;
        self.lock_time.ember_serialize(&mut target)?;
        Ok(())
    }
}

impl EmberDeserialize for Transaction {
    fn ember_deserialize<R: std::io::Read>(mut reader: R) -> Result<Self, SerializationError> {
        Ok(Transaction {
            version: u32::ember_deserialize(&mut reader)?,
            inputs: Vec::<transparent::Input>::ember_deserialize(&mut reader)?,
            outputs: Vec::<transparent::Output>::ember_deserialize(&mut reader)?,
            lock_time: u32::ember_deserialize(&mut reader)?,
            hash: Cached::new(),
        })
    }
}

/// The canonical bytes with every input's signature field encoded as length
/// zero: the preimage of the shared signing digest.
pub(super) fn signing_bytes(transaction: &Transaction) -> Vec<u8> {
    let mut data = Vec::with_capacity(transaction.len());
    transaction
        .version
        .ember_serialize(&mut data)
        .expect("writes into a vec are infallible");
    data.write_u32::<LittleEndian>(transaction.inputs.len() as u32)
        .expect("writes into a vec are infallible");
    for input in transaction.inputs.iter() {
        input
            .previous_output
            .ember_serialize(&mut data)
            .expect("writes into a vec are infallible");
        // Cleared signature: a zero length and no bytes.
        data.write_u32::<LittleEndian>(0)
            .expect("writes into a vec are infallible");
        input
            .public_key
            .ember_serialize(&mut data)
            .expect("writes into a vec are infallible");
        input
            .sequence
            .ember_serialize(&mut data)
            .expect("writes into a vec are infallible");
    }
    transaction
        .outputs
        .ember_serialize(&mut data)
        .expect("writes into a vec are infallible");
    transaction
        .lock_time
        .ember_serialize(&mut data)
        .expect("writes into a vec are infallible");
    data
}
