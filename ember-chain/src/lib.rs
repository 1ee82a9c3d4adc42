//! Core chain data structures for Ember: hashes, keys, addresses,
//! transactions, blocks, Merkle trees, difficulty arithmetic, and the
//! canonical consensus serialization they all share.

#![allow(clippy::unit_arg)]

pub mod block;
pub mod cached;
pub mod crypto;
pub mod fmt;
pub mod parameters;
pub mod serialization;
pub mod transaction;
pub mod transparent;
pub mod work;

pub use cached::Cached;
pub use serialization::{
    EmberDeserialize, EmberDeserializeInto, EmberSerialize, SerializationError,
};
