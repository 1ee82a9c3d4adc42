//! The account/UTXO state store interface and the staged-write machinery
//! shared by its backends.

use std::collections::HashMap;
use std::path::Path;

use ember_chain::transparent::{Address, OutPoint, Output};
use serde::{Deserialize, Serialize};

use crate::StoreError;

/// The stored state of one account.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub balance: u64,
    pub nonce: u64,
    /// Set only for contract accounts.
    pub code_hash: Option<String>,
    /// Unix seconds of the last state transition touching this account.
    pub last_updated: u64,
}

/// Durable storage for accounts, contract storage, and the UTXO set.
///
/// All reads and writes may run inside a staged transaction: after `begin`,
/// writes collect in an overlay that reads observe, and `commit` applies
/// the overlay to the backing store atomically while `rollback` discards
/// it. The chain manager wraps every block application in one transaction.
/// Snapshots are full named copies of the committed state, used for
/// reorganization rollback.
pub trait StateStore: Send + Sync {
    fn get_account(&self, address: &Address) -> Result<Option<AccountState>, StoreError>;
    fn set_account(&self, address: &Address, account: AccountState) -> Result<(), StoreError>;
    fn delete_account(&self, address: &Address) -> Result<(), StoreError>;

    fn get_balance(&self, address: &Address) -> Result<u64, StoreError> {
        Ok(self
            .get_account(address)?
            .map(|account| account.balance)
            .unwrap_or(0))
    }

    fn set_balance(&self, address: &Address, balance: u64) -> Result<(), StoreError> {
        let mut account = self.get_account(address)?.unwrap_or_default();
        account.balance = balance;
        self.set_account(address, account)
    }

    fn get_nonce(&self, address: &Address) -> Result<u64, StoreError> {
        Ok(self
            .get_account(address)?
            .map(|account| account.nonce)
            .unwrap_or(0))
    }

    fn set_nonce(&self, address: &Address, nonce: u64) -> Result<(), StoreError> {
        let mut account = self.get_account(address)?.unwrap_or_default();
        account.nonce = nonce;
        self.set_account(address, account)
    }

    /// Bump and return the new nonce.
    fn increment_nonce(&self, address: &Address) -> Result<u64, StoreError> {
        let mut account = self.get_account(address)?.unwrap_or_default();
        account.nonce += 1;
        let nonce = account.nonce;
        self.set_account(address, account)?;
        Ok(nonce)
    }

    fn get_storage_value(
        &self,
        address: &Address,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, StoreError>;
    fn set_storage_value(
        &self,
        address: &Address,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), StoreError>;

    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<Output>, StoreError>;
    fn add_utxo(&self, outpoint: OutPoint, output: Output) -> Result<(), StoreError>;
    /// Remove and return a UTXO entry, if present.
    fn remove_utxo(&self, outpoint: &OutPoint) -> Result<Option<Output>, StoreError>;
    fn utxos_for_address(&self, address: &Address) -> Result<Vec<(OutPoint, Output)>, StoreError>;

    /// Chain-level metadata, outside the transaction discipline.
    fn get_metadata(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set_metadata(&self, key: &str, value: &str) -> Result<(), StoreError>;

    fn begin(&self) -> Result<(), StoreError>;
    fn commit(&self) -> Result<(), StoreError>;
    fn rollback(&self) -> Result<(), StoreError>;

    fn snapshot(&self, id: u64) -> Result<(), StoreError>;
    fn restore_snapshot(&self, id: u64) -> Result<(), StoreError>;
    fn delete_snapshot(&self, id: u64) -> Result<(), StoreError>;

    fn backup(&self, path: &Path) -> Result<(), StoreError>;
    fn restore(&self, path: &Path) -> Result<(), StoreError>;

    /// Drop all accounts, storage, and UTXOs. Metadata and snapshots stay.
    fn clear(&self) -> Result<(), StoreError>;
}

/// A whole-state value: the serde-friendly representation shared by the
/// memory and JSON backends, snapshot blobs, and backups.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StateData {
    pub accounts: HashMap<Address, AccountState>,
    /// Contract storage, keyed by account then hex key.
    pub storage: HashMap<Address, HashMap<String, String>>,
    /// The UTXO set, keyed by `txid:index`.
    pub utxos: HashMap<String, Output>,
    pub metadata: HashMap<String, String>,
}

impl StateData {
    /// Addresses that carry contract code.
    pub fn contracts(&self) -> Vec<Address> {
        self.accounts
            .iter()
            .filter(|(_, account)| account.code_hash.is_some())
            .map(|(address, _)| *address)
            .collect()
    }
}

/// Encode an outpoint as a `txid:index` map key.
pub fn outpoint_key(outpoint: &OutPoint) -> String {
    format!("{}:{}", outpoint.hash, outpoint.index)
}

/// Decode a `txid:index` map key.
pub fn parse_outpoint_key(key: &str) -> Result<OutPoint, StoreError> {
    let (hash, index) = key
        .split_once(':')
        .ok_or_else(|| StoreError::Corruption(format!("bad outpoint key {:?}", key)))?;
    Ok(OutPoint {
        hash: hash
            .parse()
            .map_err(|_| StoreError::Corruption(format!("bad outpoint txid {:?}", key)))?,
        index: index
            .parse()
            .map_err(|_| StoreError::Corruption(format!("bad outpoint index {:?}", key)))?,
    })
}

/// Staged writes collected between `begin` and `commit`.
///
/// `None` values are tombstones: the entry is deleted in the overlay even
/// if the base still has it.
#[derive(Clone, Debug, Default)]
pub(crate) struct Staged {
    pub accounts: HashMap<Address, Option<AccountState>>,
    pub storage: HashMap<(Address, Vec<u8>), Option<Vec<u8>>>,
    pub utxos: HashMap<OutPoint, Option<Output>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_chain::parameters::Network;
    use ember_chain::transaction;

    #[test]
    fn outpoint_key_round_trip() {
        ember_test::init();

        let outpoint = OutPoint {
            hash: transaction::Hash([0xab; 32]),
            index: 7,
        };
        let key = outpoint_key(&outpoint);
        assert_eq!(parse_outpoint_key(&key).unwrap(), outpoint);
    }

    #[test]
    fn malformed_outpoint_key_rejected() {
        ember_test::init();

        assert!(parse_outpoint_key("not a key").is_err());
        assert!(parse_outpoint_key("abcd:xyz").is_err());
    }

    #[test]
    fn contracts_are_accounts_with_code() {
        ember_test::init();

        let mut data = StateData::default();
        let plain = Address::new(Network::Mainnet, [1; 20]);
        let contract = Address::new(Network::Mainnet, [2; 20]);
        data.accounts.insert(plain, AccountState::default());
        data.accounts.insert(
            contract,
            AccountState {
                code_hash: Some("00".repeat(32)),
                ..Default::default()
            },
        );
        assert_eq!(data.contracts(), vec![contract]);
    }
}
