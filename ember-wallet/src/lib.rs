//! Key management for Ember accounts.
//!
//! A wallet is a JSON file of labeled accounts. Secret keys appear on disk
//! only as password-encrypted export blobs; unlocking an account requires
//! the password and yields a live [`KeyPair`]. Balances are not stored
//! here: they are a chain query.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use ember_chain::crypto::keys::EncryptedKey;
use ember_chain::crypto::{CryptoError, KeyPair};
use ember_chain::parameters::Network;
use ember_chain::transparent::Address;

/// The wallet file format version this crate writes.
const WALLET_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum WalletError {
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wallet file error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("no account with address {0}")]
    UnknownAccount(String),

    #[error("an account with address {0} already exists")]
    DuplicateAccount(String),

    #[error("the wallet has no accounts")]
    Empty,
}

/// One wallet account: an address, a label, and the encrypted key blob.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct WalletAccount {
    pub address: String,
    pub label: String,
    pub keys: EncryptedKey,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct WalletFile {
    version: u32,
    /// All key material in this file is password-encrypted.
    encrypted: bool,
    default_account: Option<String>,
    accounts: Vec<WalletAccount>,
}

impl Default for WalletFile {
    fn default() -> Self {
        WalletFile {
            version: WALLET_VERSION,
            encrypted: true,
            default_account: None,
            accounts: Vec::new(),
        }
    }
}

/// A wallet bound to an on-disk JSON file (or held purely in memory).
pub struct Wallet {
    path: Option<PathBuf>,
    file: WalletFile,
    network: Network,
}

impl Wallet {
    /// Open (or create) the wallet file at `path`.
    pub fn open(path: impl AsRef<Path>, network: Network) -> Result<Wallet, WalletError> {
        let path = path.as_ref().to_path_buf();
        let file = if path.exists() {
            serde_json::from_slice(&fs::read(&path)?)?
        } else {
            WalletFile::default()
        };
        Ok(Wallet {
            path: Some(path),
            file,
            network,
        })
    }

    /// A wallet with no backing file, for tests and ephemeral nodes.
    pub fn in_memory(network: Network) -> Wallet {
        Wallet {
            path: None,
            file: WalletFile::default(),
            network,
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    fn save(&self) -> Result<(), WalletError> {
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let tmp = path.with_extension("tmp");
            fs::write(&tmp, serde_json::to_vec_pretty(&self.file)?)?;
            fs::rename(&tmp, path)?;
        }
        Ok(())
    }

    /// Generate a fresh account protected by `password`.
    pub fn create_account(
        &mut self,
        label: &str,
        password: &str,
    ) -> Result<WalletAccount, WalletError> {
        let keys = KeyPair::generate();
        self.insert_account(label, &keys, password)
    }

    /// Import an account from a raw secret scalar.
    pub fn import_account(
        &mut self,
        label: &str,
        secret_hex: &str,
        password: &str,
    ) -> Result<WalletAccount, WalletError> {
        let keys = KeyPair::from_secret_hex(secret_hex)?;
        self.insert_account(label, &keys, password)
    }

    fn insert_account(
        &mut self,
        label: &str,
        keys: &KeyPair,
        password: &str,
    ) -> Result<WalletAccount, WalletError> {
        let address = keys.address(self.network).to_string();
        if self.file.accounts.iter().any(|a| a.address == address) {
            return Err(WalletError::DuplicateAccount(address));
        }
        let account = WalletAccount {
            address: address.clone(),
            label: label.to_string(),
            keys: keys.export_encrypted(password)?,
        };
        self.file.accounts.push(account.clone());
        if self.file.default_account.is_none() {
            self.file.default_account = Some(address.clone());
        }
        self.save()?;
        info!(%address, label, "account added to wallet");
        Ok(account)
    }

    pub fn list_accounts(&self) -> &[WalletAccount] {
        &self.file.accounts
    }

    pub fn get_account(&self, address: &str) -> Result<&WalletAccount, WalletError> {
        self.file
            .accounts
            .iter()
            .find(|a| a.address == address)
            .ok_or_else(|| WalletError::UnknownAccount(address.to_string()))
    }

    /// The default account, if any.
    pub fn default_account(&self) -> Option<&WalletAccount> {
        let address = self.file.default_account.as_ref()?;
        self.file.accounts.iter().find(|a| &a.address == address)
    }

    pub fn set_default_account(&mut self, address: &str) -> Result<(), WalletError> {
        self.get_account(address)?;
        self.file.default_account = Some(address.to_string());
        self.save()
    }

    pub fn remove_account(&mut self, address: &str) -> Result<(), WalletError> {
        let before = self.file.accounts.len();
        self.file.accounts.retain(|a| a.address != address);
        if self.file.accounts.len() == before {
            return Err(WalletError::UnknownAccount(address.to_string()));
        }
        if self.file.default_account.as_deref() == Some(address) {
            self.file.default_account =
                self.file.accounts.first().map(|a| a.address.clone());
        }
        self.save()
    }

    /// The encrypted export blob for an account; requires the password so
    /// a stolen wallet handle cannot exfiltrate blobs without it.
    pub fn export_account(
        &self,
        address: &str,
        password: &str,
    ) -> Result<EncryptedKey, WalletError> {
        let account = self.get_account(address)?;
        // Proves the password fits before handing out the blob.
        KeyPair::import_encrypted(&account.keys, password)?;
        Ok(account.keys.clone())
    }

    /// Decrypt an account's key pair for signing.
    pub fn unlock(&self, address: &str, password: &str) -> Result<KeyPair, WalletError> {
        let account = self.get_account(address)?;
        Ok(KeyPair::import_encrypted(&account.keys, password)?)
    }

    /// The typed address of an account entry.
    pub fn address_of(&self, account: &WalletAccount) -> Result<Address, WalletError> {
        account
            .address
            .parse()
            .map_err(|_| WalletError::UnknownAccount(account.address.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn create_unlock_round_trip() {
        ember_test::init();

        let mut wallet = Wallet::in_memory(Network::Testnet);
        let account = wallet.create_account("primary", "pw").unwrap();

        let keys = wallet.unlock(&account.address, "pw").unwrap();
        assert_eq!(
            keys.address(Network::Testnet).to_string(),
            account.address
        );
        assert!(wallet.unlock(&account.address, "wrong").is_err());
    }

    #[test]
    fn first_account_becomes_default() {
        ember_test::init();

        let mut wallet = Wallet::in_memory(Network::Testnet);
        let first = wallet.create_account("a", "pw").unwrap();
        wallet.create_account("b", "pw").unwrap();
        assert_eq!(wallet.default_account().unwrap().address, first.address);
    }

    #[test]
    fn wallet_survives_reopen() {
        ember_test::init();

        let dir = TempDir::new("ember-wallet").unwrap();
        let path = dir.path().join("wallet.json");

        let created = {
            let mut wallet = Wallet::open(&path, Network::Testnet).unwrap();
            wallet.create_account("primary", "pw").unwrap()
        };

        let wallet = Wallet::open(&path, Network::Testnet).unwrap();
        assert_eq!(wallet.list_accounts().len(), 1);
        assert_eq!(wallet.list_accounts()[0], created);
        assert!(wallet.unlock(&created.address, "pw").is_ok());
    }

    #[test]
    fn import_is_deterministic() {
        ember_test::init();

        let mut wallet = Wallet::in_memory(Network::Testnet);
        let account = wallet
            .import_account("seeded", ember_test::vectors::KEY_SEED_1, "pw")
            .unwrap();

        let mut other = Wallet::in_memory(Network::Testnet);
        let same = other
            .import_account("seeded", ember_test::vectors::KEY_SEED_1, "pw")
            .unwrap();
        assert_eq!(account.address, same.address);

        // Importing the same key twice is rejected.
        assert!(matches!(
            wallet.import_account("again", ember_test::vectors::KEY_SEED_1, "pw"),
            Err(WalletError::DuplicateAccount(_))
        ));
    }

    #[test]
    fn remove_account_moves_default() {
        ember_test::init();

        let mut wallet = Wallet::in_memory(Network::Testnet);
        let a = wallet.create_account("a", "pw").unwrap();
        let b = wallet.create_account("b", "pw").unwrap();

        wallet.remove_account(&a.address).unwrap();
        assert_eq!(wallet.default_account().unwrap().address, b.address);
        assert!(matches!(
            wallet.remove_account(&a.address),
            Err(WalletError::UnknownAccount(_))
        ));
    }
}
