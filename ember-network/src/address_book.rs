//! The address book: the set of known endpoints, their reputation, bans,
//! and the persistent peer list file.
//!
//! The peer list file is UTF-8 text, one peer per line as
//! `address port node_id`, with `#` starting a comment and blank lines
//! ignored. Bans are persisted next to it (`<name>.bans`) as
//! `address port expiry_unix` lines so they survive restarts.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::constants::{BAN_BASE, BAN_CAP, REPUTATION_DECAY_INTERVAL, SEVERE_SCORE};
use crate::meta_addr::{MetaAddr, PeerBehavior, PeerConnectionState};

/// The address book. See the module docs.
#[derive(Default)]
pub struct AddressBook {
    peers: HashMap<SocketAddr, MetaAddr>,
    trusted: HashSet<SocketAddr>,
    blacklist: HashSet<SocketAddr>,
    path: Option<PathBuf>,
}

impl AddressBook {
    pub fn new() -> AddressBook {
        AddressBook::default()
    }

    /// Load the persistent peer list (and its ban file) from `path`. A
    /// missing file yields an empty book that will be created on save.
    pub fn load(path: impl AsRef<Path>) -> std::io::Result<AddressBook> {
        let path = path.as_ref().to_path_buf();
        let mut book = AddressBook {
            path: Some(path.clone()),
            ..Default::default()
        };

        if path.exists() {
            for (number, line) in fs::read_to_string(&path)?.lines().enumerate() {
                match parse_peer_line(line) {
                    Ok(Some((addr, node_id))) => {
                        let entry = book.upsert(addr);
                        entry.persistent = true;
                        entry.node_id = node_id;
                    }
                    Ok(None) => {}
                    Err(reason) => {
                        warn!(line = number + 1, %reason, "skipping bad peer list line")
                    }
                }
            }
        }

        let ban_path = ban_file_path(&path);
        if ban_path.exists() {
            for line in fs::read_to_string(&ban_path)?.lines() {
                if let Ok(Some((addr, expiry))) = parse_ban_line(line) {
                    let entry = book.upsert(addr);
                    entry.ban_expiry = Some(expiry);
                    entry.state = PeerConnectionState::Banned;
                }
            }
        }

        info!(peers = book.peers.len(), path = ?path, "loaded peer list");
        Ok(book)
    }

    /// Write the persistent peer list and ban file back to disk.
    pub fn save(&self) -> std::io::Result<()> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut lines = String::from("# address port node_id\n");
        for peer in self.peers.values().filter(|peer| peer.persistent) {
            lines.push_str(&format_peer_line(peer));
            lines.push('\n');
        }
        fs::write(path, lines)?;

        let mut bans = String::new();
        for peer in self.peers.values() {
            if let Some(expiry) = peer.ban_expiry {
                bans.push_str(&format!(
                    "{} {} {}\n",
                    peer.addr.ip(),
                    peer.addr.port(),
                    expiry
                ));
            }
        }
        fs::write(ban_file_path(path), bans)?;
        Ok(())
    }

    /// The entry for `addr`, created if unknown.
    pub fn upsert(&mut self, addr: SocketAddr) -> &mut MetaAddr {
        self.peers.entry(addr).or_insert_with(|| MetaAddr::new(addr))
    }

    pub fn get(&self, addr: &SocketAddr) -> Option<&MetaAddr> {
        self.peers.get(addr)
    }

    pub fn get_mut(&mut self, addr: &SocketAddr) -> Option<&mut MetaAddr> {
        self.peers.get_mut(addr)
    }

    pub fn peers(&self) -> impl Iterator<Item = &MetaAddr> {
        self.peers.values()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn add_trusted(&mut self, addr: SocketAddr) {
        self.trusted.insert(addr);
    }

    pub fn add_blacklisted(&mut self, addr: SocketAddr) {
        self.blacklist.insert(addr);
    }

    /// Whether a connection to or from `addr` may proceed. Trusted peers
    /// bypass bans; blacklisted peers never connect.
    pub fn is_admissible(&self, addr: &SocketAddr, now: u64) -> bool {
        if self.blacklist.contains(addr) {
            return false;
        }
        if self.trusted.contains(addr) {
            return true;
        }
        !matches!(self.peers.get(addr), Some(peer) if peer.is_banned(now))
    }

    pub fn record_attempt(&mut self, addr: SocketAddr, now: u64) {
        let entry = self.upsert(addr);
        entry.attempts += 1;
        entry.last_attempt = Some(now);
        entry.state = PeerConnectionState::Connecting;
    }

    pub fn record_success(&mut self, addr: SocketAddr, now: u64) {
        let entry = self.upsert(addr);
        entry.successes += 1;
        entry.consecutive_failures = 0;
        entry.last_seen = Some(now);
        entry.state = PeerConnectionState::Ready;
    }

    pub fn record_failure(&mut self, addr: SocketAddr, now: u64) {
        let entry = self.upsert(addr);
        entry.failures += 1;
        entry.consecutive_failures += 1;
        entry.last_seen = Some(now);
        // Backoff counts from the failure.
        entry.last_attempt = Some(now);
        entry.state = PeerConnectionState::Disconnected;
    }

    pub fn record_disconnect(&mut self, addr: SocketAddr, now: u64) {
        let entry = self.upsert(addr);
        entry.last_seen = Some(now);
        if entry.state != PeerConnectionState::Banned {
            entry.state = PeerConnectionState::Disconnected;
        }
    }

    /// Score a behavior observation. Returns the ban expiry if the score
    /// crossed the automatic ban threshold.
    pub fn record_behavior(
        &mut self,
        addr: SocketAddr,
        behavior: PeerBehavior,
        now: u64,
    ) -> Option<u64> {
        let should_ban = {
            let entry = self.upsert(addr);
            *entry
                .behavior
                .entry(behavior.label().to_string())
                .or_insert(0) += 1;
            entry.last_seen = Some(now);
            let score = entry.adjust_reputation(behavior.score_delta());
            debug!(%addr, behavior = behavior.label(), score, "peer behavior recorded");
            entry.should_auto_ban() && !entry.is_banned(now)
        };

        if should_ban {
            return Some(self.ban(addr, now));
        }
        None
    }

    /// Ban `addr`, returning the expiry (unix seconds).
    ///
    /// The base duration doubles with each successive ban up to the cap,
    /// and doubles once more if the peer's reputation is at or below the
    /// severe threshold.
    pub fn ban(&mut self, addr: SocketAddr, now: u64) -> u64 {
        let entry = self.upsert(addr);
        let mut duration = BAN_BASE
            .checked_mul(1u32 << entry.ban_count.min(16))
            .unwrap_or(BAN_CAP)
            .min(BAN_CAP);
        if entry.reputation <= SEVERE_SCORE {
            duration = duration.checked_mul(2).unwrap_or(BAN_CAP).min(BAN_CAP);
        }
        let expiry = now + duration.as_secs();
        entry.ban_expiry = Some(expiry);
        entry.ban_count += 1;
        entry.state = PeerConnectionState::Banned;
        warn!(%addr, until = expiry, count = entry.ban_count, "peer banned");
        metrics::counter!("peers.banned.count", 1);
        expiry
    }

    pub fn unban(&mut self, addr: SocketAddr) {
        if let Some(entry) = self.peers.get_mut(&addr) {
            entry.ban_expiry = None;
            entry.reputation = entry.reputation.max(0);
            entry.state = PeerConnectionState::Disconnected;
            info!(%addr, "peer unbanned");
        }
    }

    /// Persistent peers that are disconnected, past their backoff, and not
    /// banned: the reconnection worker's work list.
    pub fn reconnect_candidates(&self, now: u64) -> Vec<SocketAddr> {
        self.peers
            .values()
            .filter(|peer| {
                peer.persistent
                    && matches!(
                        peer.state,
                        PeerConnectionState::NeverAttempted | PeerConnectionState::Disconnected
                    )
                    && peer.backoff_elapsed(now)
                    && self.is_admissible(&peer.addr, now)
            })
            .map(|peer| peer.addr)
            .collect()
    }

    /// Daily reputation decay: negative scores of inactive peers drift
    /// toward zero by one point per day, and lapsed bans are lifted.
    pub fn decay_tick(&mut self, now: u64) {
        for peer in self.peers.values_mut() {
            let inactive = peer
                .last_seen
                .map(|seen| now.saturating_sub(seen) >= REPUTATION_DECAY_INTERVAL.as_secs())
                .unwrap_or(true);
            if peer.reputation < 0 && inactive {
                peer.reputation += 1;
            }
            if matches!(peer.ban_expiry, Some(expiry) if expiry <= now) {
                peer.ban_expiry = None;
                if peer.state == PeerConnectionState::Banned {
                    peer.state = PeerConnectionState::Disconnected;
                }
            }
        }
    }
}

fn ban_file_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "peers".to_string());
    name.push_str(".bans");
    path.with_file_name(name)
}

/// Parse one peer list line: `address port node_id`, where `node_id` may
/// be `-` for unknown. Returns `Ok(None)` for blanks and comments.
fn parse_peer_line(line: &str) -> Result<Option<(SocketAddr, Option<String>)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut fields = line.split_whitespace();
    let ip: IpAddr = fields
        .next()
        .ok_or("missing address")?
        .parse()
        .map_err(|_| "bad address".to_string())?;
    let port: u16 = fields
        .next()
        .ok_or("missing port")?
        .parse()
        .map_err(|_| "bad port".to_string())?;
    let node_id = match fields.next() {
        None | Some("-") => None,
        Some(id) => Some(id.to_string()),
    };
    Ok(Some((SocketAddr::new(ip, port), node_id)))
}

fn format_peer_line(peer: &MetaAddr) -> String {
    format!(
        "{} {} {}",
        peer.addr.ip(),
        peer.addr.port(),
        peer.node_id.as_deref().unwrap_or("-")
    )
}

fn parse_ban_line(line: &str) -> Result<Option<(SocketAddr, u64)>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let mut fields = line.split_whitespace();
    let ip: IpAddr = fields
        .next()
        .ok_or("missing address")?
        .parse()
        .map_err(|_| "bad address".to_string())?;
    let port: u16 = fields
        .next()
        .ok_or("missing port")?
        .parse()
        .map_err(|_| "bad port".to_string())?;
    let expiry: u64 = fields
        .next()
        .ok_or("missing expiry")?
        .parse()
        .map_err(|_| "bad expiry".to_string())?;
    Ok(Some((SocketAddr::new(ip, port), expiry)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new("127.0.0.1".parse().unwrap(), port)
    }

    #[test]
    fn peer_line_parsing() {
        ember_test::init();

        assert_eq!(parse_peer_line("").unwrap(), None);
        assert_eq!(parse_peer_line("# comment").unwrap(), None);

        let (parsed, node_id) = parse_peer_line("10.0.0.1 8645 0123456789abcdef")
            .unwrap()
            .unwrap();
        assert_eq!(parsed, "10.0.0.1:8645".parse().unwrap());
        assert_eq!(node_id.as_deref(), Some("0123456789abcdef"));

        let (_, no_id) = parse_peer_line("10.0.0.2 8645 -").unwrap().unwrap();
        assert_eq!(no_id, None);

        assert!(parse_peer_line("not-an-address 8645 -").is_err());
        assert!(parse_peer_line("10.0.0.1 not-a-port -").is_err());
    }

    #[test]
    fn peer_list_round_trips_through_disk() {
        ember_test::init();

        let dir = TempDir::new("ember-peers").unwrap();
        let path = dir.path().join("peers.txt");

        {
            let mut book = AddressBook::load(&path).unwrap();
            let entry = book.upsert(addr(1000));
            entry.persistent = true;
            entry.node_id = Some("00aa11bb22cc33dd".into());
            book.upsert(addr(2000)).persistent = true;
            // Non-persistent peers are not written out.
            book.upsert(addr(3000));
            book.save().unwrap();
        }

        let book = AddressBook::load(&path).unwrap();
        assert_eq!(book.len(), 2);
        assert_eq!(
            book.get(&addr(1000)).unwrap().node_id.as_deref(),
            Some("00aa11bb22cc33dd")
        );
        assert!(book.get(&addr(1000)).unwrap().persistent);
    }

    #[test]
    fn bans_survive_reload() {
        ember_test::init();

        let dir = TempDir::new("ember-peers").unwrap();
        let path = dir.path().join("peers.txt");

        {
            let mut book = AddressBook::load(&path).unwrap();
            book.upsert(addr(1000)).persistent = true;
            let expiry = book.ban(addr(1000), 1_000_000);
            assert!(expiry > 1_000_000);
            book.save().unwrap();
        }

        let book = AddressBook::load(&path).unwrap();
        assert!(book.get(&addr(1000)).unwrap().is_banned(1_000_000));
        assert!(!book.is_admissible(&addr(1000), 1_000_000));
    }

    #[test]
    fn repeated_bans_escalate_and_cap() {
        ember_test::init();

        let mut book = AddressBook::new();
        let now = 1_000_000;

        let first = book.ban(addr(1), now) - now;
        book.unban(addr(1));
        let second = book.ban(addr(1), now) - now;
        book.unban(addr(1));
        let third = book.ban(addr(1), now) - now;

        assert_eq!(first, BAN_BASE.as_secs());
        assert_eq!(second, BAN_BASE.as_secs() * 2);
        assert_eq!(third, BAN_BASE.as_secs() * 4);

        // Many repeated bans stop at the cap.
        for _ in 0..30 {
            book.unban(addr(1));
            book.ban(addr(1), now);
        }
        book.unban(addr(1));
        let capped = book.ban(addr(1), now) - now;
        assert_eq!(capped, BAN_CAP.as_secs());
    }

    #[test]
    fn severe_reputation_doubles_ban() {
        ember_test::init();

        let mut book = AddressBook::new();
        let now = 1_000_000;
        book.upsert(addr(2)).reputation = SEVERE_SCORE;
        let expiry = book.ban(addr(2), now) - now;
        assert_eq!(expiry, BAN_BASE.as_secs() * 2);
    }

    #[test]
    fn repeated_invalid_blocks_trigger_auto_ban() {
        ember_test::init();

        let mut book = AddressBook::new();
        let now = 1_000_000;

        // One invalid block is -50; the tenth crosses -500.
        for round in 0..9 {
            let banned =
                book.record_behavior(addr(3), PeerBehavior::InvalidBlock { severity: 1 }, now);
            assert!(banned.is_none(), "not yet banned at round {}", round);
        }
        let expiry = book
            .record_behavior(addr(3), PeerBehavior::InvalidBlock { severity: 1 }, now)
            .expect("tenth invalid block crosses the auto-ban threshold");
        assert!(expiry > now);
        assert_eq!(book.get(&addr(3)).unwrap().state, PeerConnectionState::Banned);
    }

    #[test]
    fn reconnect_candidates_respect_backoff_and_bans() {
        ember_test::init();

        let mut book = AddressBook::new();
        let now = 1_000_000;

        book.upsert(addr(1)).persistent = true;
        book.upsert(addr(2)).persistent = true;
        book.upsert(addr(3)); // not persistent

        // A fresh failure puts addr(2) inside its backoff window.
        book.record_failure(addr(2), now);

        let candidates = book.reconnect_candidates(now);
        assert!(candidates.contains(&addr(1)));
        assert!(!candidates.contains(&addr(2)));
        assert!(!candidates.contains(&addr(3)));

        // After the backoff has elapsed it becomes a candidate again.
        let candidates = book.reconnect_candidates(now + 60);
        assert!(candidates.contains(&addr(2)));

        book.ban(addr(1), now);
        assert!(!book.reconnect_candidates(now).contains(&addr(1)));
    }

    #[test]
    fn decay_pulls_negative_scores_toward_zero() {
        ember_test::init();

        let mut book = AddressBook::new();
        let day = REPUTATION_DECAY_INTERVAL.as_secs();
        let entry = book.upsert(addr(4));
        entry.reputation = -3;
        entry.last_seen = Some(0);

        book.decay_tick(day);
        assert_eq!(book.get(&addr(4)).unwrap().reputation, -2);
        // Recent activity pauses decay.
        book.get_mut(&addr(4)).unwrap().last_seen = Some(2 * day - 10);
        book.decay_tick(2 * day - 5);
        assert_eq!(book.get(&addr(4)).unwrap().reputation, -2);
    }

    #[test]
    fn trusted_peers_bypass_bans_and_blacklist_wins() {
        ember_test::init();

        let mut book = AddressBook::new();
        let now = 1_000_000;

        book.add_trusted(addr(5));
        book.ban(addr(5), now);
        assert!(book.is_admissible(&addr(5), now));

        book.add_blacklisted(addr(6));
        assert!(!book.is_admissible(&addr(6), now));
    }
}
