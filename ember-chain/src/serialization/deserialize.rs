use byteorder::{LittleEndian, ReadBytesExt};
use std::io;
use std::sync::Arc;

use super::SerializationError;

type Result<R> = std::result::Result<R, SerializationError>;

pub trait EmberDeserialize {
    fn ember_deserialize<R: io::Read>(reader: R) -> Result<Self>
    where
        Self: Sized;
}

/// Helper for deserializing more succinctly via type inference
pub trait EmberDeserializeInto {
    /// Deserialize based on type inference
    fn ember_deserialize_into<T>(self) -> Result<T>
    where
        T: EmberDeserialize;
}

impl<R: io::Read> EmberDeserializeInto for R {
    fn ember_deserialize_into<T>(self) -> Result<T>
    where
        T: EmberDeserialize,
    {
        T::ember_deserialize(self)
    }
}

impl EmberDeserialize for bool {
    fn ember_deserialize<R: io::Read>(mut reader: R) -> Result<bool> {
        let value = reader.read_u8()?;
        match value {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(SerializationError::Parse("Invalid bool")),
        }
    }
}

impl EmberDeserialize for u8 {
    fn ember_deserialize<R: io::Read>(mut reader: R) -> Result<u8> {
        Ok(reader.read_u8()?)
    }
}

impl EmberDeserialize for u16 {
    fn ember_deserialize<R: io::Read>(mut reader: R) -> Result<u16> {
        Ok(reader.read_u16::<LittleEndian>()?)
    }
}

impl EmberDeserialize for u32 {
    fn ember_deserialize<R: io::Read>(mut reader: R) -> Result<u32> {
        Ok(reader.read_u32::<LittleEndian>()?)
    }
}

impl EmberDeserialize for u64 {
    fn ember_deserialize<R: io::Read>(mut reader: R) -> Result<u64> {
        Ok(reader.read_u64::<LittleEndian>()?)
    }
}

impl EmberDeserialize for i32 {
    fn ember_deserialize<R: io::Read>(mut reader: R) -> Result<i32> {
        Ok(reader.read_i32::<LittleEndian>()?)
    }
}

impl EmberDeserialize for i64 {
    fn ember_deserialize<R: io::Read>(mut reader: R) -> Result<i64> {
        Ok(reader.read_i64::<LittleEndian>()?)
    }
}

impl<T> EmberDeserialize for Vec<T>
where
    T: EmberDeserialize,
{
    fn ember_deserialize<R: io::Read>(mut reader: R) -> Result<Vec<T>> {
        let len = reader.read_u32::<LittleEndian>()? as usize;
        // Limit preallocation since blind preallocation is a DOS vulnerability
        let blind_alloc_limit = 1024;
        let mut result: Vec<T> = Vec::with_capacity(std::cmp::min(len, blind_alloc_limit));
        for _ in 0..len {
            result.push(T::ember_deserialize(&mut reader)?);
        }
        Ok(result)
    }
}

impl EmberDeserialize for String {
    fn ember_deserialize<R: io::Read>(mut reader: R) -> Result<String> {
        let buf = Vec::<u8>::ember_deserialize(&mut reader)?;
        String::from_utf8(buf).map_err(|_| SerializationError::Parse("invalid utf-8"))
    }
}

impl<T: EmberDeserialize> EmberDeserialize for Arc<T> {
    fn ember_deserialize<R: io::Read>(reader: R) -> Result<Arc<T>> {
        Ok(Arc::new(T::ember_deserialize(reader)?))
    }
}

impl<T, U> EmberDeserialize for (T, U)
where
    T: EmberDeserialize,
    U: EmberDeserialize,
{
    fn ember_deserialize<R: io::Read>(mut reader: R) -> Result<(T, U)> {
        Ok((
            T::ember_deserialize(&mut reader)?,
            U::ember_deserialize(&mut reader)?,
        ))
    }
}

// TODO: Replace when const generics stabilize
macro_rules! impl_deserializable_byte_array {
    ($size:expr) => {
        impl EmberDeserialize for [u8; $size] {
            fn ember_deserialize<R: io::Read>(mut reader: R) -> Result<[u8; $size]> {
                let mut result = [0u8; $size];
                reader.read_exact(&mut result)?;
                Ok(result)
            }
        }
    };
}

impl_deserializable_byte_array!(4);
impl_deserializable_byte_array!(16);
impl_deserializable_byte_array!(20);
impl_deserializable_byte_array!(32);
