//! In-memory store backends.
//!
//! These back unit tests and diagnostic chain replays. They share the
//! staged-overlay machinery with the JSON backend through [`StateTable`].

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;

use ember_chain::block::{self, Block};
use ember_chain::transparent::{Address, OutPoint, Output};
use serde::{Deserialize, Serialize};

use crate::state_store::{outpoint_key, parse_outpoint_key, AccountState, Staged, StateData};
use crate::{BlockStore, StateStore, StoreError};

// ---- state data primitives ----

impl StateData {
    pub(crate) fn account(&self, address: &Address) -> Option<AccountState> {
        self.accounts.get(address).cloned()
    }

    pub(crate) fn set_account(&mut self, address: Address, account: AccountState) {
        self.accounts.insert(address, account);
    }

    pub(crate) fn delete_account(&mut self, address: &Address) {
        self.accounts.remove(address);
        self.storage.remove(address);
    }

    pub(crate) fn storage_value(&self, address: &Address, key: &[u8]) -> Option<Vec<u8>> {
        self.storage
            .get(address)
            .and_then(|entries| entries.get(&hex::encode(key)))
            .and_then(|value| hex::decode(value).ok())
    }

    pub(crate) fn set_storage_value(&mut self, address: Address, key: &[u8], value: &[u8]) {
        self.storage
            .entry(address)
            .or_default()
            .insert(hex::encode(key), hex::encode(value));
    }

    pub(crate) fn utxo(&self, outpoint: &OutPoint) -> Option<Output> {
        self.utxos.get(&outpoint_key(outpoint)).cloned()
    }

    pub(crate) fn add_utxo(&mut self, outpoint: OutPoint, output: Output) {
        self.utxos.insert(outpoint_key(&outpoint), output);
    }

    pub(crate) fn remove_utxo(&mut self, outpoint: &OutPoint) -> Option<Output> {
        self.utxos.remove(&outpoint_key(outpoint))
    }
}

/// A whole-state table with a staged-transaction overlay and named
/// snapshots. The memory backend holds one directly; the JSON backend adds
/// persistence around it.
#[derive(Default)]
pub(crate) struct StateTable {
    pub base: StateData,
    pub staged: Option<Staged>,
    pub snapshots: HashMap<u64, StateData>,
}

impl StateTable {
    pub fn get_account(&self, address: &Address) -> Option<AccountState> {
        if let Some(staged) = &self.staged {
            if let Some(entry) = staged.accounts.get(address) {
                return entry.clone();
            }
        }
        self.base.account(address)
    }

    pub fn set_account(&mut self, address: Address, account: AccountState) {
        match &mut self.staged {
            Some(staged) => {
                staged.accounts.insert(address, Some(account));
            }
            None => self.base.set_account(address, account),
        }
    }

    pub fn delete_account(&mut self, address: &Address) {
        match &mut self.staged {
            Some(staged) => {
                staged.accounts.insert(*address, None);
            }
            None => self.base.delete_account(address),
        }
    }

    pub fn get_storage_value(&self, address: &Address, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(staged) = &self.staged {
            if let Some(entry) = staged.storage.get(&(*address, key.to_vec())) {
                return entry.clone();
            }
        }
        self.base.storage_value(address, key)
    }

    pub fn set_storage_value(&mut self, address: Address, key: &[u8], value: &[u8]) {
        match &mut self.staged {
            Some(staged) => {
                staged
                    .storage
                    .insert((address, key.to_vec()), Some(value.to_vec()));
            }
            None => self.base.set_storage_value(address, key, value),
        }
    }

    pub fn get_utxo(&self, outpoint: &OutPoint) -> Option<Output> {
        if let Some(staged) = &self.staged {
            if let Some(entry) = staged.utxos.get(outpoint) {
                return entry.clone();
            }
        }
        self.base.utxo(outpoint)
    }

    pub fn add_utxo(&mut self, outpoint: OutPoint, output: Output) {
        match &mut self.staged {
            Some(staged) => {
                staged.utxos.insert(outpoint, Some(output));
            }
            None => self.base.add_utxo(outpoint, output),
        }
    }

    pub fn remove_utxo(&mut self, outpoint: &OutPoint) -> Option<Output> {
        let previous = self.get_utxo(outpoint);
        match &mut self.staged {
            Some(staged) => {
                staged.utxos.insert(*outpoint, None);
            }
            None => {
                self.base.remove_utxo(outpoint);
            }
        }
        previous
    }

    pub fn utxos_for_address(
        &self,
        address: &Address,
    ) -> Result<Vec<(OutPoint, Output)>, StoreError> {
        let mut found = BTreeMap::new();
        for (key, output) in self.base.utxos.iter() {
            if output.recipient == *address {
                found.insert(key.clone(), (parse_outpoint_key(key)?, output.clone()));
            }
        }
        if let Some(staged) = &self.staged {
            for (outpoint, entry) in staged.utxos.iter() {
                let key = outpoint_key(outpoint);
                match entry {
                    Some(output) if output.recipient == *address => {
                        found.insert(key, (*outpoint, output.clone()));
                    }
                    _ => {
                        found.remove(&key);
                    }
                }
            }
        }
        Ok(found.into_iter().map(|(_, entry)| entry).collect())
    }

    pub fn begin(&mut self) -> Result<(), StoreError> {
        if self.staged.is_some() {
            return Err(StoreError::TransactionInProgress);
        }
        self.staged = Some(Staged::default());
        Ok(())
    }

    pub fn commit(&mut self) -> Result<(), StoreError> {
        let staged = self.staged.take().ok_or(StoreError::NoTransaction)?;
        apply_staged(&mut self.base, staged);
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<(), StoreError> {
        self.staged.take().ok_or(StoreError::NoTransaction)?;
        Ok(())
    }

    pub fn snapshot(&mut self, id: u64) {
        self.snapshots.insert(id, self.base.clone());
    }

    pub fn restore_snapshot(&mut self, id: u64) -> Result<(), StoreError> {
        let data = self
            .snapshots
            .get(&id)
            .cloned()
            .ok_or(StoreError::MissingSnapshot(id))?;
        self.staged = None;
        self.base = data;
        Ok(())
    }

    pub fn delete_snapshot(&mut self, id: u64) -> Result<(), StoreError> {
        self.snapshots
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::MissingSnapshot(id))
    }

    pub fn clear(&mut self) {
        let metadata = std::mem::take(&mut self.base.metadata);
        self.base = StateData {
            metadata,
            ..Default::default()
        };
        self.staged = None;
    }
}

/// Apply a staged overlay to a base state.
pub(crate) fn apply_staged(base: &mut StateData, staged: Staged) {
    for (address, entry) in staged.accounts {
        match entry {
            Some(account) => base.set_account(address, account),
            None => base.delete_account(&address),
        }
    }
    for ((address, key), entry) in staged.storage {
        match entry {
            Some(value) => base.set_storage_value(address, &key, &value),
            None => {
                if let Some(entries) = base.storage.get_mut(&address) {
                    entries.remove(&hex::encode(&key));
                }
            }
        }
    }
    for (outpoint, entry) in staged.utxos {
        match entry {
            Some(output) => base.add_utxo(outpoint, output),
            None => {
                base.remove_utxo(&outpoint);
            }
        }
    }
}

// ---- memory state store ----

/// A [`StateStore`] kept entirely in memory.
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<StateTable>,
}

impl MemoryStateStore {
    pub fn new() -> MemoryStateStore {
        MemoryStateStore::default()
    }
}

impl StateStore for MemoryStateStore {
    fn get_account(&self, address: &Address) -> Result<Option<AccountState>, StoreError> {
        Ok(self.inner.lock().unwrap().get_account(address))
    }

    fn set_account(&self, address: &Address, account: AccountState) -> Result<(), StoreError> {
        self.inner.lock().unwrap().set_account(*address, account);
        Ok(())
    }

    fn delete_account(&self, address: &Address) -> Result<(), StoreError> {
        self.inner.lock().unwrap().delete_account(address);
        Ok(())
    }

    fn get_storage_value(
        &self,
        address: &Address,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.lock().unwrap().get_storage_value(address, key))
    }

    fn set_storage_value(
        &self,
        address: &Address,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap()
            .set_storage_value(*address, key, value);
        Ok(())
    }

    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<Output>, StoreError> {
        Ok(self.inner.lock().unwrap().get_utxo(outpoint))
    }

    fn add_utxo(&self, outpoint: OutPoint, output: Output) -> Result<(), StoreError> {
        self.inner.lock().unwrap().add_utxo(outpoint, output);
        Ok(())
    }

    fn remove_utxo(&self, outpoint: &OutPoint) -> Result<Option<Output>, StoreError> {
        Ok(self.inner.lock().unwrap().remove_utxo(outpoint))
    }

    fn utxos_for_address(&self, address: &Address) -> Result<Vec<(OutPoint, Output)>, StoreError> {
        self.inner.lock().unwrap().utxos_for_address(address)
    }

    fn get_metadata(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.lock().unwrap().base.metadata.get(key).cloned())
    }

    fn set_metadata(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap()
            .base
            .metadata
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn begin(&self) -> Result<(), StoreError> {
        self.inner.lock().unwrap().begin()
    }

    fn commit(&self) -> Result<(), StoreError> {
        self.inner.lock().unwrap().commit()
    }

    fn rollback(&self) -> Result<(), StoreError> {
        self.inner.lock().unwrap().rollback()
    }

    fn snapshot(&self, id: u64) -> Result<(), StoreError> {
        self.inner.lock().unwrap().snapshot(id);
        Ok(())
    }

    fn restore_snapshot(&self, id: u64) -> Result<(), StoreError> {
        self.inner.lock().unwrap().restore_snapshot(id)
    }

    fn delete_snapshot(&self, id: u64) -> Result<(), StoreError> {
        self.inner.lock().unwrap().delete_snapshot(id)
    }

    fn backup(&self, path: &Path) -> Result<(), StoreError> {
        let inner = self.inner.lock().unwrap();
        let json = serde_json::to_vec_pretty(&inner.base)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn restore(&self, path: &Path) -> Result<(), StoreError> {
        let json = std::fs::read(path)?;
        let data: StateData = serde_json::from_slice(&json)?;
        let mut inner = self.inner.lock().unwrap();
        inner.staged = None;
        inner.base = data;
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.inner.lock().unwrap().clear();
        Ok(())
    }
}

// ---- memory block store ----

#[derive(Clone, Debug, Default)]
pub(crate) struct BlockTable {
    pub blocks: HashMap<block::Hash, Block>,
    pub heights: BTreeMap<u64, block::Hash>,
}

/// The on-disk form of a block table backup: block hashes make poor JSON
/// object keys, so bodies are stored as a list.
#[derive(Serialize, Deserialize)]
pub(crate) struct BlockBackup {
    pub blocks: Vec<Block>,
    pub heights: BTreeMap<u64, block::Hash>,
}

impl From<&BlockTable> for BlockBackup {
    fn from(table: &BlockTable) -> Self {
        BlockBackup {
            blocks: table.blocks.values().cloned().collect(),
            heights: table.heights.clone(),
        }
    }
}

impl From<BlockBackup> for BlockTable {
    fn from(backup: BlockBackup) -> Self {
        BlockTable {
            blocks: backup
                .blocks
                .into_iter()
                .map(|block| (block.hash(), block))
                .collect(),
            heights: backup.heights,
        }
    }
}

impl BlockTable {
    pub fn put(&mut self, block: &Block) {
        let hash = block.hash();
        self.blocks.insert(hash, block.clone());
        self.heights.insert(block.height(), hash);
    }

    pub fn tip(&self) -> Option<(u64, block::Hash)> {
        self.heights
            .iter()
            .next_back()
            .map(|(height, hash)| (*height, *hash))
    }

    pub fn range(&self, start: u64, end: u64) -> Vec<Block> {
        self.heights
            .range(start..=end)
            .filter_map(|(_, hash)| self.blocks.get(hash).cloned())
            .collect()
    }

    pub fn delete(&mut self, hash: &block::Hash) -> bool {
        if let Some(block) = self.blocks.remove(hash) {
            if self.heights.get(&block.height()) == Some(hash) {
                self.heights.remove(&block.height());
            }
            true
        } else {
            false
        }
    }
}

/// A [`BlockStore`] kept entirely in memory.
#[derive(Default)]
pub struct MemoryBlockStore {
    inner: Mutex<BlockTable>,
}

impl MemoryBlockStore {
    pub fn new() -> MemoryBlockStore {
        MemoryBlockStore::default()
    }
}

impl BlockStore for MemoryBlockStore {
    fn put(&self, block: &Block) -> Result<(), StoreError> {
        self.inner.lock().unwrap().put(block);
        Ok(())
    }

    fn put_body(&self, block: &Block) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.blocks.insert(block.hash(), block.clone());
        Ok(())
    }

    fn get_by_hash(&self, hash: &block::Hash) -> Result<Option<Block>, StoreError> {
        Ok(self.inner.lock().unwrap().blocks.get(hash).cloned())
    }

    fn get_by_height(&self, height: u64) -> Result<Option<Block>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .heights
            .get(&height)
            .and_then(|hash| inner.blocks.get(hash))
            .cloned())
    }

    fn tip(&self) -> Result<Option<(u64, block::Hash)>, StoreError> {
        Ok(self.inner.lock().unwrap().tip())
    }

    fn range(&self, start: u64, end: u64) -> Result<Vec<Block>, StoreError> {
        Ok(self.inner.lock().unwrap().range(start, end))
    }

    fn delete(&self, hash: &block::Hash) -> Result<bool, StoreError> {
        Ok(self.inner.lock().unwrap().delete(hash))
    }

    fn unindex_height(&self, height: u64) -> Result<(), StoreError> {
        self.inner.lock().unwrap().heights.remove(&height);
        Ok(())
    }

    fn compact(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backup(&self, path: &Path) -> Result<(), StoreError> {
        let inner = self.inner.lock().unwrap();
        let json = serde_json::to_vec_pretty(&BlockBackup::from(&*inner))?;
        std::fs::write(path, json)?;
        Ok(())
    }

    fn restore(&self, path: &Path) -> Result<(), StoreError> {
        let json = std::fs::read(path)?;
        let backup: BlockBackup = serde_json::from_slice(&json)?;
        *self.inner.lock().unwrap() = backup.into();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_chain::parameters::{genesis, Network, NetworkParameters};

    fn address(byte: u8) -> Address {
        Address::new(Network::Mainnet, [byte; 20])
    }

    fn outpoint(byte: u8, index: u32) -> OutPoint {
        OutPoint {
            hash: ember_chain::transaction::Hash([byte; 32]),
            index,
        }
    }

    #[test]
    fn staged_writes_are_invisible_after_rollback() {
        ember_test::init();

        let store = MemoryStateStore::new();
        store.set_balance(&address(1), 100).unwrap();

        store.begin().unwrap();
        store.set_balance(&address(1), 50).unwrap();
        store.set_balance(&address(2), 50).unwrap();
        assert_eq!(store.get_balance(&address(1)).unwrap(), 50);

        store.rollback().unwrap();
        assert_eq!(store.get_balance(&address(1)).unwrap(), 100);
        assert_eq!(store.get_balance(&address(2)).unwrap(), 0);
    }

    #[test]
    fn staged_writes_apply_on_commit() {
        ember_test::init();

        let store = MemoryStateStore::new();
        store.begin().unwrap();
        store.set_balance(&address(1), 10).unwrap();
        store
            .add_utxo(outpoint(3, 0), Output::new(10, address(1), 0))
            .unwrap();
        store.commit().unwrap();

        assert_eq!(store.get_balance(&address(1)).unwrap(), 10);
        assert!(store.get_utxo(&outpoint(3, 0)).unwrap().is_some());
    }

    #[test]
    fn staged_utxo_removal_is_observed_and_revertible() {
        ember_test::init();

        let store = MemoryStateStore::new();
        store
            .add_utxo(outpoint(3, 0), Output::new(10, address(1), 0))
            .unwrap();

        store.begin().unwrap();
        let removed = store.remove_utxo(&outpoint(3, 0)).unwrap();
        assert_eq!(removed.unwrap().value, 10);
        assert!(store.get_utxo(&outpoint(3, 0)).unwrap().is_none());
        assert!(store.utxos_for_address(&address(1)).unwrap().is_empty());

        store.rollback().unwrap();
        assert!(store.get_utxo(&outpoint(3, 0)).unwrap().is_some());
    }

    #[test]
    fn nested_begin_rejected() {
        ember_test::init();

        let store = MemoryStateStore::new();
        store.begin().unwrap();
        assert!(matches!(
            store.begin(),
            Err(StoreError::TransactionInProgress)
        ));
    }

    #[test]
    fn snapshot_restore_round_trip() {
        ember_test::init();

        let store = MemoryStateStore::new();
        store.set_balance(&address(1), 77).unwrap();
        store.snapshot(1).unwrap();

        store.set_balance(&address(1), 0).unwrap();
        store.delete_account(&address(1)).unwrap();

        store.restore_snapshot(1).unwrap();
        assert_eq!(store.get_balance(&address(1)).unwrap(), 77);

        store.delete_snapshot(1).unwrap();
        assert!(matches!(
            store.restore_snapshot(1),
            Err(StoreError::MissingSnapshot(1))
        ));
    }

    #[test]
    fn increment_nonce_is_monotonic() {
        ember_test::init();

        let store = MemoryStateStore::new();
        assert_eq!(store.increment_nonce(&address(1)).unwrap(), 1);
        assert_eq!(store.increment_nonce(&address(1)).unwrap(), 2);
        assert_eq!(store.get_nonce(&address(1)).unwrap(), 2);
    }

    #[test]
    fn block_store_indexes_by_hash_and_height() {
        ember_test::init();

        let store = MemoryBlockStore::new();
        let genesis = genesis::genesis_block(&NetworkParameters::default());
        store.put(&genesis).unwrap();
        // put is idempotent on equal blocks
        store.put(&genesis).unwrap();

        assert_eq!(
            store.get_by_hash(&genesis.hash()).unwrap().unwrap().hash(),
            genesis.hash()
        );
        assert_eq!(
            store.get_by_height(0).unwrap().unwrap().hash(),
            genesis.hash()
        );
        assert_eq!(store.tip().unwrap(), Some((0, genesis.hash())));
        assert_eq!(store.height().unwrap(), Some(0));

        assert!(store.delete(&genesis.hash()).unwrap());
        assert!(!store.delete(&genesis.hash()).unwrap());
        assert_eq!(store.tip().unwrap(), None);
    }
}
