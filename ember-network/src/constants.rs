//! Definitions of constants used in the networking layer.

use std::time::Duration;

/// The version of the wire protocol this node speaks.
pub const CURRENT_VERSION: u32 = 1;

/// The user agent advertised in `HELLO` messages.
pub const USER_AGENT: &str = "/emberd:0.1.0/";

/// The length of a frame header: magic, type byte, length, checksum.
pub const HEADER_LEN: usize = 13;

/// Maximum size of a protocol message body.
pub const MAX_PROTOCOL_MESSAGE_LEN: usize = 2 * 1024 * 1024;

/// How long a connect attempt may take before it is abandoned.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the `HELLO` exchange (and optional authentication) may take.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// How often a ready session pings its peer.
pub const PING_INTERVAL: Duration = Duration::from_secs(60);

/// How long an answered ping may stay outstanding.
pub const PONG_TIMEOUT: Duration = Duration::from_secs(20);

/// How long a sent or received inventory hash suppresses re-sending.
pub const SEEN_DEBOUNCE: Duration = Duration::from_secs(300);

/// Reconnection backoff: `min(base × 2^failures + jitter, cap)`.
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);
pub const BACKOFF_CAP: Duration = Duration::from_secs(300);

/// Ban durations: the base doubles with each successive ban up to the cap.
pub const BAN_BASE: Duration = Duration::from_secs(60);
pub const BAN_CAP: Duration = Duration::from_secs(24 * 60 * 60);

/// Reputation bounds and thresholds.
pub const REPUTATION_FLOOR: i32 = -1000;
pub const REPUTATION_CEILING: i32 = 1000;
/// At or below this score a peer is banned automatically.
pub const AUTO_BAN_SCORE: i32 = -500;
/// At or below this score at ban time, the ban duration doubles again.
pub const SEVERE_SCORE: i32 = -800;

/// Negative scores decay toward zero by one point per day of inactivity.
pub const REPUTATION_DECAY_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// How long a verified peer identity stays cached.
pub const AUTH_SESSION_LIFETIME: Duration = Duration::from_secs(60 * 60);
