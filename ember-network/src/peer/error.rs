use thiserror::Error;

use ember_chain::SerializationError;

use crate::auth::AuthError;
use crate::protocol::types::Nonce;

/// An error that ends a peer session.
#[derive(Error, Debug)]
pub enum PeerError {
    /// A framing or payload serialization error; the frame checksum or
    /// magic did not match, or the payload was malformed.
    #[error("wire error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("remote peer closed the connection")]
    ConnectionClosed,

    #[error("connect attempt timed out")]
    ConnectTimeout,

    #[error("handshake did not complete in time")]
    HandshakeTimeout,

    #[error("the remote nonce matches ours: connected to self")]
    ConnectionToSelf,

    /// The peer sent a message its session state does not allow.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    #[error("ping {0:?} went unanswered")]
    PingTimeout(Nonce),

    #[error("peer authentication failed: {0}")]
    Auth(#[from] AuthError),
}
