//! Definitions of network messages.

use std::sync::Arc;

use ember_chain::block::Block;
use ember_chain::transaction::Transaction;
use ember_chain::{EmberDeserialize, EmberSerialize, SerializationError};
use ember_serde_derive::{EmberDeserialize, EmberSerialize};

use super::command::Command;
use super::inv::InventoryHash;
use super::types::*;

/// An Ember network message.
///
/// The wire format of every message is a fixed frame header (`magic`, a
/// one-byte type, the payload length, and a truncated double-SHA256
/// checksum) followed by the payload bytes described per variant. The
/// internal representation is unlinked from the wire format; translation
/// happens only in the [`super::codec`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Message {
    /// A `HELLO` message: the first message in each direction of a new
    /// connection, identifying the peer and its capabilities.
    Hello(Hello),

    /// A `PING` message: liveness and round-trip measurement.
    Ping(Nonce),

    /// A `PONG` message, echoing the nonce of the `PING` it answers.
    Pong(Nonce),

    /// An `INV` message announcing the availability of items.
    Inv(Vec<InventoryHash>),

    /// A `GETDATA` message requesting specific items.
    GetData(Vec<InventoryHash>),

    /// A `TX` message delivering one transaction.
    Tx(Arc<Transaction>),

    /// A `BLOCK` message delivering one block.
    Block(Arc<Block>),

    /// An `AUTH_CHALLENGE` message asking a peer to prove its identity.
    AuthChallenge(AuthChallenge),

    /// An `AUTH_RESPONSE` message answering a challenge with a signature.
    AuthResponse(AuthResponse),
}

/// The `HELLO` payload.
#[derive(Clone, Debug, Eq, PartialEq, EmberSerialize, EmberDeserialize)]
pub struct Hello {
    pub version: ProtocolVersion,
    pub user_agent: String,
    pub services: NodeServices,
    /// A random nonce, used to detect connections to self.
    pub nonce: Nonce,
}

/// The `AUTH_CHALLENGE` payload.
#[derive(Clone, Debug, Eq, PartialEq, EmberSerialize, EmberDeserialize)]
pub struct AuthChallenge {
    pub challenge_id: u64,
    pub challenge: [u8; 32],
    /// Unix seconds at issue time.
    pub timestamp: u64,
}

/// The `AUTH_RESPONSE` payload.
#[derive(Clone, Debug, Eq, PartialEq, EmberSerialize, EmberDeserialize)]
pub struct AuthResponse {
    pub challenge_id: u64,
    /// DER-encoded signature over the challenge digest.
    pub signature: Vec<u8>,
    /// The compressed public key of the long-term node identity.
    pub public_key: Vec<u8>,
    /// The claimed node id: the first 16 hex characters of
    /// `SHA256(public_key)`.
    pub node_id: String,
}

impl Message {
    /// The frame type byte for this message.
    pub fn command(&self) -> Command {
        match self {
            Message::Hello(_) => Command::Hello,
            Message::Ping(_) => Command::Ping,
            Message::Pong(_) => Command::Pong,
            Message::Inv(_) => Command::Inv,
            Message::GetData(_) => Command::GetData,
            Message::Tx(_) => Command::Tx,
            Message::Block(_) => Command::Block,
            Message::AuthChallenge(_) => Command::AuthChallenge,
            Message::AuthResponse(_) => Command::AuthResponse,
        }
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            Message::Hello(_) => "hello",
            Message::Ping(_) => "ping",
            Message::Pong(_) => "pong",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::Tx(_) => "tx",
            Message::Block(_) => "block",
            Message::AuthChallenge(_) => "auth_challenge",
            Message::AuthResponse(_) => "auth_response",
        })
    }
}
