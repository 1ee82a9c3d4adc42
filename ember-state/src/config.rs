//! Storage configuration.

use std::path::{Path, PathBuf};

use ember_chain::parameters::Network;
use serde::{Deserialize, Serialize};

/// Which storage backend to open.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// The embedded key-value backend (production).
    Sled,
    /// The JSON-on-disk backend (development).
    Json,
}

/// Configuration for the block and state stores.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// The root directory for all persistent data. Network name and store
    /// kind are appended as subdirectories.
    pub data_dir: PathBuf,
    pub backend: Backend,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("ember"),
            backend: Backend::Sled,
        }
    }
}

impl Config {
    pub fn with_dir(data_dir: impl AsRef<Path>) -> Config {
        Config {
            data_dir: data_dir.as_ref().to_path_buf(),
            backend: Backend::Sled,
        }
    }

    /// The directory holding a given store for a given network.
    pub fn store_dir(&self, network: Network, kind: &str) -> PathBuf {
        self.data_dir.join(network.name()).join(kind)
    }

    /// The sled configuration for a given store.
    pub fn sled_config(&self, network: Network, kind: &str) -> sled::Config {
        sled::Config::default().path(self.store_dir(network, kind))
    }
}
