//! Per-peer session handling.

pub mod connection;
pub mod error;

pub use connection::{Connection, PeerEvent, PeerEventKind, SessionState};
pub use error::PeerError;
