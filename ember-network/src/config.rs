//! Networking configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

use ember_chain::parameters::Network;
use serde::{Deserialize, Serialize};

/// Configuration for the peer-to-peer layer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// The network whose magic this node speaks.
    pub network: Network,

    /// The address to accept inbound connections on.
    pub listen_addr: SocketAddr,

    /// Peers dialed at startup, in addition to the persistent peer list.
    pub initial_peers: Vec<SocketAddr>,

    /// The persistent peer list file (`address port node_id` lines).
    pub peers_file: Option<PathBuf>,

    /// Upper bound on concurrent connections.
    pub max_connections: usize,

    /// Whether to demand an authenticated identity from every peer.
    pub challenge_peers: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            network: Network::Mainnet,
            listen_addr: "0.0.0.0:8645".parse().expect("hardcoded address parses"),
            initial_peers: Vec::new(),
            peers_file: None,
            max_connections: 32,
            challenge_peers: false,
        }
    }
}
