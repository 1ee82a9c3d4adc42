//! The typed wire protocol: message definitions and the framing codec.

pub mod codec;
pub mod command;
pub mod inv;
pub mod message;
pub mod types;
