//! The Ember peer-to-peer layer: the framed wire protocol, per-peer
//! sessions, and the address book with reputation, backoff, and bans.

pub mod address_book;
pub mod auth;
pub mod config;
pub mod constants;
pub mod meta_addr;
pub mod peer;
pub mod protocol;

pub use address_book::AddressBook;
pub use config::Config;
pub use meta_addr::{MetaAddr, PeerBehavior, PeerConnectionState};
pub use peer::{Connection, PeerError, PeerEvent, PeerEventKind, SessionState};
pub use protocol::{codec::Codec, inv::InventoryHash, message::Message};
