//! Consensus-critical serialization.
//!
//! This module contains the `EmberSerialize` and `EmberDeserialize` traits,
//! analogs of the Serde `Serialize` and `Deserialize` traits but intended
//! for the canonical Ember wire format: all integers little-endian, byte
//! strings and lists prefixed by a `u32` count. The canonical bytes of a
//! transaction or block header are the sole input to its hash, so every
//! implementation here is consensus-critical.

mod deserialize;
mod error;

pub mod sha256d;

pub use deserialize::{EmberDeserialize, EmberDeserializeInto};
pub use error::SerializationError;

use byteorder::{LittleEndian, WriteBytesExt};
use std::sync::Arc;

pub trait EmberSerialize {
    fn ember_serialize<W: std::io::Write>(&self, target: W) -> Result<(), std::io::Error>;

    fn ember_serialize_to_vec(&self) -> Result<Vec<u8>, std::io::Error> {
        let mut data = Vec::new();
        self.ember_serialize(&mut data)?;
        Ok(data)
    }
}

impl EmberSerialize for bool {
    fn ember_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(&[*self as u8])
    }
}

impl EmberSerialize for u16 {
    fn ember_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_u16::<LittleEndian>(*self)
    }
}

impl EmberSerialize for u32 {
    fn ember_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_u32::<LittleEndian>(*self)
    }
}

impl EmberSerialize for u64 {
    fn ember_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_u64::<LittleEndian>(*self)
    }
}

impl EmberSerialize for i32 {
    fn ember_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_i32::<LittleEndian>(*self)
    }
}

impl EmberSerialize for i64 {
    fn ember_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_i64::<LittleEndian>(*self)
    }
}

impl EmberSerialize for [u8; 4] {
    fn ember_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(self)
    }
}

impl EmberSerialize for [u8; 16] {
    fn ember_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(self)
    }
}

impl EmberSerialize for [u8; 20] {
    fn ember_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(self)
    }
}

impl EmberSerialize for [u8; 32] {
    fn ember_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(self)
    }
}

impl EmberSerialize for &[u8] {
    fn ember_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_all(self)
    }
}

/// Byte strings carry a `u32` length prefix.
///
/// Note that `u8` deliberately does not implement `EmberSerialize`: this
/// impl would otherwise conflict with the generic `Vec<T>` one below.
impl EmberSerialize for Vec<u8> {
    fn ember_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_u32::<LittleEndian>(self.len() as u32)?;
        target.write_all(self)?;
        Ok(())
    }
}

impl<T> EmberSerialize for Vec<T>
where
    T: EmberSerialize,
{
    fn ember_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_u32::<LittleEndian>(self.len() as u32)?;
        for item in self.iter() {
            item.ember_serialize(&mut target)?
        }
        Ok(())
    }
}

impl EmberSerialize for String {
    fn ember_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        target.write_u32::<LittleEndian>(self.len() as u32)?;
        self.as_bytes().ember_serialize(&mut target)?;
        Ok(())
    }
}

impl<T: EmberSerialize> EmberSerialize for Option<T> {
    fn ember_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        match self {
            Some(contents) => contents.ember_serialize(&mut target),
            None => Ok(()),
        }
    }
}

impl<T: EmberSerialize> EmberSerialize for Arc<T> {
    fn ember_serialize<W>(&self, target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        self.as_ref().ember_serialize(target)
    }
}

impl<T, U> EmberSerialize for (T, U)
where
    T: EmberSerialize,
    U: EmberSerialize,
{
    fn ember_serialize<W>(&self, mut target: W) -> Result<(), std::io::Error>
    where
        W: std::io::Write,
    {
        self.0.ember_serialize(&mut target)?;
        self.1.ember_serialize(&mut target)?;
        Ok(())
    }
}
