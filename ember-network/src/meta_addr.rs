//! An address book entry: everything the peer manager remembers about one
//! endpoint.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    AUTO_BAN_SCORE, BACKOFF_BASE, BACKOFF_CAP, REPUTATION_CEILING, REPUTATION_FLOOR,
};

/// The lifecycle state of a peer endpoint.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum PeerConnectionState {
    /// We know the endpoint but have never dialed it.
    NeverAttempted,
    /// A dial is in flight.
    Connecting,
    /// The `HELLO` exchange (and optional authentication) is in progress.
    Handshaking,
    /// The session is live and may exchange data messages.
    Ready,
    /// The last connection ended; the endpoint is eligible for
    /// reconnection once its backoff elapses.
    Disconnected,
    /// The endpoint is banned until its ban expiry.
    Banned,
}

/// An observed peer behavior, scored into the reputation system.
///
/// Negative behaviors carry a severity in `[1, 10]` that scales the
/// penalty.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PeerBehavior {
    /// Delivered a block that was accepted.
    GoodBlock,
    /// Delivered a transaction that was admitted.
    GoodTransaction,
    /// Answered a request usefully.
    HelpfulResponse,
    /// Maintained a healthy connection over time.
    Stable,
    /// Delivered a block that failed validation.
    InvalidBlock { severity: u8 },
    /// Delivered a transaction that failed validation.
    InvalidTransaction { severity: u8 },
    /// Flooded us with duplicate or unsolicited data.
    Spam { severity: u8 },
    /// Abused the connection lifecycle (rapid reconnects, handshake games).
    ConnectionAbuse { severity: u8 },
    /// Timed out on a request or ping.
    Timeout { severity: u8 },
}

impl PeerBehavior {
    /// The reputation delta for this behavior.
    pub fn score_delta(&self) -> i32 {
        fn s(severity: u8) -> i32 {
            severity.clamp(1, 10) as i32
        }
        match *self {
            PeerBehavior::GoodBlock => 10,
            PeerBehavior::GoodTransaction => 5,
            PeerBehavior::HelpfulResponse => 3,
            PeerBehavior::Stable => 2,
            PeerBehavior::InvalidBlock { severity } => -50 * s(severity),
            PeerBehavior::InvalidTransaction { severity } => -20 * s(severity),
            PeerBehavior::Spam { severity } => -15 * s(severity),
            PeerBehavior::ConnectionAbuse { severity } => -10 * s(severity),
            PeerBehavior::Timeout { severity } => -5 * s(severity),
        }
    }

    /// A stable label for the behavior histogram.
    pub fn label(&self) -> &'static str {
        match self {
            PeerBehavior::GoodBlock => "good_block",
            PeerBehavior::GoodTransaction => "good_tx",
            PeerBehavior::HelpfulResponse => "helpful_response",
            PeerBehavior::Stable => "stable",
            PeerBehavior::InvalidBlock { .. } => "invalid_block",
            PeerBehavior::InvalidTransaction { .. } => "invalid_tx",
            PeerBehavior::Spam { .. } => "spam",
            PeerBehavior::ConnectionAbuse { .. } => "connection_abuse",
            PeerBehavior::Timeout { .. } => "timeout",
        }
    }
}

/// An entry in the address book.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetaAddr {
    pub addr: SocketAddr,

    /// The authenticated node id, once verified.
    pub node_id: Option<String>,

    pub state: PeerConnectionState,

    /// Whether the endpoint came from the persistent peer list (and is
    /// therefore kept alive by the reconnection worker).
    pub persistent: bool,

    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,

    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub last_latency_ms: Option<u64>,

    /// Reputation score, clamped to `[-1000, 1000]`.
    pub reputation: i32,

    /// Unix seconds the current ban lapses, if banned.
    pub ban_expiry: Option<u64>,
    pub ban_count: u32,

    /// Unix seconds of the last dial attempt.
    pub last_attempt: Option<u64>,
    /// Unix seconds of the last observed activity.
    pub last_seen: Option<u64>,

    /// Counts of observed behaviors, by label.
    pub behavior: HashMap<String, u32>,
}

impl MetaAddr {
    pub fn new(addr: SocketAddr) -> MetaAddr {
        MetaAddr {
            addr,
            node_id: None,
            state: PeerConnectionState::NeverAttempted,
            persistent: false,
            attempts: 0,
            successes: 0,
            failures: 0,
            consecutive_failures: 0,
            bytes_sent: 0,
            bytes_received: 0,
            messages_sent: 0,
            messages_received: 0,
            last_latency_ms: None,
            reputation: 0,
            ban_expiry: None,
            ban_count: 0,
            last_attempt: None,
            last_seen: None,
            behavior: HashMap::new(),
        }
    }

    /// Apply a reputation delta, clamped to the legal range. Returns the
    /// new score.
    pub fn adjust_reputation(&mut self, delta: i32) -> i32 {
        self.reputation = (self.reputation + delta).clamp(REPUTATION_FLOOR, REPUTATION_CEILING);
        self.reputation
    }

    /// Whether the score alone warrants an automatic ban.
    pub fn should_auto_ban(&self) -> bool {
        self.reputation <= AUTO_BAN_SCORE
    }

    /// The current reconnection backoff:
    /// `min(base × 2^consecutive_failures + jitter, cap)`.
    pub fn backoff(&self) -> Duration {
        use rand::Rng;
        let base = BACKOFF_BASE
            .checked_mul(1u32 << self.consecutive_failures.min(16))
            .unwrap_or(BACKOFF_CAP);
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..1000));
        (base + jitter).min(BACKOFF_CAP)
    }

    /// Whether enough time has passed since the last attempt to dial again.
    pub fn backoff_elapsed(&self, now: u64) -> bool {
        match self.last_attempt {
            Some(last) => now.saturating_sub(last) >= self.backoff().as_secs(),
            None => true,
        }
    }

    /// Whether a ban is currently in force.
    pub fn is_banned(&self, now: u64) -> bool {
        matches!(self.ban_expiry, Some(expiry) if expiry > now)
    }
}
