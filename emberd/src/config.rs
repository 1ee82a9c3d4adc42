//! The node configuration record.
//!
//! Every field is an explicit, enumerated setting; loading from TOML and
//! the `EMBER_` environment override prefix are concerns of this loader,
//! not of the subsystems the sections configure. An environment variable
//! overrides the key obtained by lowercasing and walking the name into the
//! nested sections: `EMBER_MINING_ENABLED=true` sets `mining.enabled`.

use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::components::mempool::MempoolConfig;
use crate::components::miner::MinerConfig;
use ember_chain::parameters::NetworkParameters;

/// The environment prefix reserved for configuration overrides.
pub const ENV_PREFIX: &str = "EMBER_";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("io error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("config serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("environment override {variable} does not match any config key")]
    UnknownEnvKey { variable: String },
}

/// The complete node configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EmberdConfig {
    /// Where the wallet file lives; `None` keeps keys in memory only.
    pub wallet_file: Option<PathBuf>,
    /// Where the node's long-term identity key lives; `None` generates an
    /// ephemeral identity per run.
    pub identity_file: Option<PathBuf>,
    /// Per-worker shutdown grace, in milliseconds.
    pub shutdown_grace_ms: u64,
    /// Consensus parameters of the chain this node follows.
    pub chain: NetworkParameters,
    /// Peer-to-peer settings.
    pub network: ember_network::Config,
    /// Storage backend and location.
    pub state: ember_state::Config,
    /// Block producer settings.
    pub mining: MinerConfig,
    /// Mempool limits.
    pub mempool: MempoolConfig,
}

impl Default for EmberdConfig {
    fn default() -> Self {
        EmberdConfig::base()
    }
}

impl EmberdConfig {
    /// A usable default: mainnet parameters, sled storage, mining off.
    pub fn base() -> EmberdConfig {
        EmberdConfig {
            chain: NetworkParameters::default(),
            network: ember_network::Config::default(),
            state: ember_state::Config::default(),
            mining: MinerConfig::default(),
            mempool: MempoolConfig::default(),
            wallet_file: None,
            identity_file: None,
            shutdown_grace_ms: 500,
        }
    }

    /// Load configuration: the TOML file if given, otherwise the base
    /// defaults, then `EMBER_` environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<EmberdConfig, ConfigError> {
        let mut value: toml::Value = match path {
            Some(path) => toml::from_str(&std::fs::read_to_string(path)?)?,
            None => toml::Value::try_from(EmberdConfig::base())?,
        };

        for (variable, raw) in env::vars() {
            if let Some(rest) = variable.strip_prefix(ENV_PREFIX) {
                apply_env_override(&mut value, &variable, rest, &raw)?;
            }
        }

        Ok(EmberdConfig::deserialize(value)?)
    }
}

/// Write one environment override into the config tree.
///
/// The variable's suffix is lowercased and matched against nested keys;
/// key names may themselves contain underscores, so at each level the
/// longest matching joined prefix wins (`MINING_REWARD_ADDRESS` finds
/// `mining` then `reward_address`).
fn apply_env_override(
    value: &mut toml::Value,
    variable: &str,
    suffix: &str,
    raw: &str,
) -> Result<(), ConfigError> {
    let segments: Vec<String> = suffix.to_lowercase().split('_').map(String::from).collect();

    fn descend(
        value: &mut toml::Value,
        segments: &[String],
        raw: &str,
    ) -> bool {
        let table = match value.as_table_mut() {
            Some(table) => table,
            None => return false,
        };
        // Longest joined prefix first.
        for split in (1..=segments.len()).rev() {
            let key = segments[..split].join("_");
            if let Some(child) = table.get_mut(&key) {
                if split == segments.len() {
                    *child = parse_env_value(raw);
                    return true;
                }
                if descend(child, &segments[split..], raw) {
                    return true;
                }
            }
        }
        false
    }

    if descend(value, &segments, raw) {
        Ok(())
    } else {
        Err(ConfigError::UnknownEnvKey {
            variable: variable.to_string(),
        })
    }
}

/// Interpret an override string with the most specific type that fits.
fn parse_env_value(raw: &str) -> toml::Value {
    if let Ok(boolean) = raw.parse::<bool>() {
        return toml::Value::Boolean(boolean);
    }
    if let Ok(integer) = raw.parse::<i64>() {
        return toml::Value::Integer(integer);
    }
    toml::Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_round_trips_through_toml() {
        ember_test::init();

        let base = EmberdConfig::base();
        let text = toml::to_string(&base).unwrap();
        let parsed: EmberdConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.shutdown_grace_ms, base.shutdown_grace_ms);
        assert_eq!(parsed.chain, base.chain);
    }

    #[test]
    fn env_override_walks_nested_keys() {
        ember_test::init();

        let mut value = toml::Value::try_from(EmberdConfig::base()).unwrap();
        apply_env_override(&mut value, "EMBER_MINING_ENABLED", "MINING_ENABLED", "true")
            .unwrap();
        apply_env_override(
            &mut value,
            "EMBER_MEMPOOL_MAX_AGE_SECS",
            "MEMPOOL_MAX_AGE_SECS",
            "120",
        )
        .unwrap();
        apply_env_override(
            &mut value,
            "EMBER_SHUTDOWN_GRACE_MS",
            "SHUTDOWN_GRACE_MS",
            "900",
        )
        .unwrap();

        let config = EmberdConfig::deserialize(value).unwrap();
        assert!(config.mining.enabled);
        assert_eq!(config.mempool.max_age_secs, 120);
        assert_eq!(config.shutdown_grace_ms, 900);
    }

    #[test]
    fn unknown_env_key_is_reported() {
        ember_test::init();

        let mut value = toml::Value::try_from(EmberdConfig::base()).unwrap();
        assert!(matches!(
            apply_env_override(&mut value, "EMBER_NO_SUCH_KEY", "NO_SUCH_KEY", "1"),
            Err(ConfigError::UnknownEnvKey { .. })
        ));
    }
}
