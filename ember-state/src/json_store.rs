//! JSON-on-disk store backends for development.
//!
//! The state store is a single human-readable document; the block store is
//! a directory of one JSON body per block plus a height index document.
//! Every durable write goes through a temp-file-and-rename so a crash
//! leaves either the old or the new contents, never a torn file.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ember_chain::block::{self, Block};
use ember_chain::transparent::{Address, OutPoint, Output};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::memory_store::StateTable;
use crate::state_store::{AccountState, StateData};
use crate::{BlockStore, StateStore, StoreError};

/// Atomically replace `path` with `contents`.
fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}

// ---- state store ----

/// The document layout of the JSON state file.
#[derive(Serialize, Deserialize, Default)]
struct StateDoc {
    accounts: HashMap<Address, AccountState>,
    /// Derived from `accounts`; written for readability, ignored on load.
    contracts: Vec<Address>,
    storage: HashMap<Address, HashMap<String, String>>,
    utxos: HashMap<String, Output>,
    metadata: HashMap<String, String>,
    snapshots: HashMap<u64, StateData>,
}

/// A [`StateStore`] backed by a single JSON document on disk.
pub struct JsonStateStore {
    path: PathBuf,
    inner: Mutex<StateTable>,
}

impl JsonStateStore {
    /// Open (or create) the state file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<JsonStateStore, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut table = StateTable::default();
        if path.exists() {
            let doc: StateDoc = serde_json::from_slice(&fs::read(&path)?)?;
            table.base = StateData {
                accounts: doc.accounts,
                storage: doc.storage,
                utxos: doc.utxos,
                metadata: doc.metadata,
            };
            table.snapshots = doc.snapshots;
            debug!(path = ?path, accounts = table.base.accounts.len(), "loaded json state");
        }
        Ok(JsonStateStore {
            path,
            inner: Mutex::new(table),
        })
    }

    fn save(&self, table: &StateTable) -> Result<(), StoreError> {
        let doc = StateDoc {
            contracts: table.base.contracts(),
            accounts: table.base.accounts.clone(),
            storage: table.base.storage.clone(),
            utxos: table.base.utxos.clone(),
            metadata: table.base.metadata.clone(),
            snapshots: table.snapshots.clone(),
        };
        write_atomic(&self.path, &serde_json::to_vec_pretty(&doc)?)
    }

    /// Persist immediately unless a staged transaction holds the write.
    fn save_if_unstaged(&self, table: &StateTable) -> Result<(), StoreError> {
        if table.staged.is_none() {
            self.save(table)?;
        }
        Ok(())
    }
}

impl StateStore for JsonStateStore {
    fn get_account(&self, address: &Address) -> Result<Option<AccountState>, StoreError> {
        Ok(self.inner.lock().unwrap().get_account(address))
    }

    fn set_account(&self, address: &Address, account: AccountState) -> Result<(), StoreError> {
        let mut table = self.inner.lock().unwrap();
        table.set_account(*address, account);
        self.save_if_unstaged(&table)
    }

    fn delete_account(&self, address: &Address) -> Result<(), StoreError> {
        let mut table = self.inner.lock().unwrap();
        table.delete_account(address);
        self.save_if_unstaged(&table)
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
        let mut table = self.inner.lock().unwrap();
        table.set_storage_value(*address, key, value);
        self.save_if_unstaged(&table)
    }

    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<Output>, StoreError> {
        Ok(self.inner.lock().unwrap().get_utxo(outpoint))
    }

    fn add_utxo(&self, outpoint: OutPoint, output: Output) -> Result<(), StoreError> {
        let mut table = self.inner.lock().unwrap();
        table.add_utxo(outpoint, output);
        self.save_if_unstaged(&table)
    }

    fn remove_utxo(&self, outpoint: &OutPoint) -> Result<Option<Output>, StoreError> {
        let mut table = self.inner.lock().unwrap();
        let removed = table.remove_utxo(outpoint);
        self.save_if_unstaged(&table)?;
        Ok(removed)
    }

    fn utxos_for_address(&self, address: &Address) -> Result<Vec<(OutPoint, Output)>, StoreError> {
        self.inner.lock().unwrap().utxos_for_address(address)
    }

    fn get_metadata(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.lock().unwrap().base.metadata.get(key).cloned())
    }

    fn set_metadata(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut table = self.inner.lock().unwrap();
        table
            .base
            .metadata
            .insert(key.to_string(), value.to_string());
        self.save(&table)
    }

    fn begin(&self) -> Result<(), StoreError> {
        self.inner.lock().unwrap().begin()
    }

    fn commit(&self) -> Result<(), StoreError> {
        let mut table = self.inner.lock().unwrap();
        table.commit()?;
        self.save(&table)
    }

    fn rollback(&self) -> Result<(), StoreError> {
        self.inner.lock().unwrap().rollback()
    }

    fn snapshot(&self, id: u64) -> Result<(), StoreError> {
        let mut table = self.inner.lock().unwrap();
        table.snapshot(id);
        self.save(&table)
    }

    fn restore_snapshot(&self, id: u64) -> Result<(), StoreError> {
        let mut table = self.inner.lock().unwrap();
        table.restore_snapshot(id)?;
        self.save(&table)
    }

    fn delete_snapshot(&self, id: u64) -> Result<(), StoreError> {
        let mut table = self.inner.lock().unwrap();
        table.delete_snapshot(id)?;
        self.save(&table)
    }

    fn backup(&self, path: &Path) -> Result<(), StoreError> {
        let table = self.inner.lock().unwrap();
        write_atomic(path, &serde_json::to_vec_pretty(&table.base)?)
    }

    fn restore(&self, path: &Path) -> Result<(), StoreError> {
        let data: StateData = serde_json::from_slice(&fs::read(path)?)?;
        let mut table = self.inner.lock().unwrap();
        table.staged = None;
        table.base = data;
        self.save(&table)
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut table = self.inner.lock().unwrap();
        table.clear();
        self.save(&table)
    }
}

// ---- block store ----

#[derive(Serialize, Deserialize, Default)]
struct BlockIndex {
    heights: BTreeMap<u64, block::Hash>,
}

/// A [`BlockStore`] backed by one JSON body per block plus an index file.
pub struct JsonBlockStore {
    dir: PathBuf,
    index: Mutex<BlockIndex>,
}

impl JsonBlockStore {
    /// Open (or create) the block directory at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<JsonBlockStore, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(dir.join("blocks"))?;
        let index_path = dir.join("index.json");
        let index = if index_path.exists() {
            serde_json::from_slice(&fs::read(&index_path)?)?
        } else {
            BlockIndex::default()
        };
        Ok(JsonBlockStore {
            dir,
            index: Mutex::new(index),
        })
    }

    fn body_path(&self, hash: &block::Hash) -> PathBuf {
        self.dir.join("blocks").join(format!("{}.json", hash))
    }

    fn save_index(&self, index: &BlockIndex) -> Result<(), StoreError> {
        write_atomic(&self.dir.join("index.json"), &serde_json::to_vec_pretty(index)?)
    }

    fn read_body(&self, hash: &block::Hash) -> Result<Option<Block>, StoreError> {
        let path = self.body_path(hash);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&fs::read(path)?)?))
    }
}

impl BlockStore for JsonBlockStore {
    fn put(&self, block: &Block) -> Result<(), StoreError> {
        let hash = block.hash();
        // Body first, synced, then the index: a crash in between leaves a
        // dangling body that no index entry reaches.
        write_atomic(&self.body_path(&hash), &serde_json::to_vec_pretty(block)?)?;
        let mut index = self.index.lock().unwrap();
        index.heights.insert(block.height(), hash);
        self.save_index(&index)
    }

    fn put_body(&self, block: &Block) -> Result<(), StoreError> {
        write_atomic(
            &self.body_path(&block.hash()),
            &serde_json::to_vec_pretty(block)?,
        )
    }

    fn get_by_hash(&self, hash: &block::Hash) -> Result<Option<Block>, StoreError> {
        self.read_body(hash)
    }

    fn get_by_height(&self, height: u64) -> Result<Option<Block>, StoreError> {
        let hash = { self.index.lock().unwrap().heights.get(&height).copied() };
        match hash {
            Some(hash) => self.read_body(&hash),
            None => Ok(None),
        }
    }

    fn tip(&self) -> Result<Option<(u64, block::Hash)>, StoreError> {
        Ok(self
            .index
            .lock()
            .unwrap()
            .heights
            .iter()
            .next_back()
            .map(|(height, hash)| (*height, *hash)))
    }

    fn range(&self, start: u64, end: u64) -> Result<Vec<Block>, StoreError> {
        let hashes: Vec<block::Hash> = {
            let index = self.index.lock().unwrap();
            index.heights.range(start..=end).map(|(_, hash)| *hash).collect()
        };
        let mut blocks = Vec::with_capacity(hashes.len());
        for hash in hashes {
            match self.read_body(&hash)? {
                Some(block) => blocks.push(block),
                None => {
                    return Err(StoreError::Corruption(format!(
                        "height index references missing block {}",
                        hash
                    )))
                }
            }
        }
        Ok(blocks)
    }

    fn delete(&self, hash: &block::Hash) -> Result<bool, StoreError> {
        let block = match self.read_body(hash)? {
            Some(block) => block,
            None => return Ok(false),
        };
        fs::remove_file(self.body_path(hash))?;
        let mut index = self.index.lock().unwrap();
        if index.heights.get(&block.height()) == Some(hash) {
            index.heights.remove(&block.height());
            self.save_index(&index)?;
        }
        Ok(true)
    }

    fn unindex_height(&self, height: u64) -> Result<(), StoreError> {
        let mut index = self.index.lock().unwrap();
        if index.heights.remove(&height).is_some() {
            self.save_index(&index)?;
        }
        Ok(())
    }

    fn compact(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backup(&self, path: &Path) -> Result<(), StoreError> {
        let target = path.to_path_buf();
        fs::create_dir_all(target.join("blocks"))?;
        let index = self.index.lock().unwrap();
        write_atomic(&target.join("index.json"), &serde_json::to_vec_pretty(&*index)?)?;
        for entry in fs::read_dir(self.dir.join("blocks"))? {
            let entry = entry?;
            fs::copy(entry.path(), target.join("blocks").join(entry.file_name()))?;
        }
        Ok(())
    }

    fn restore(&self, path: &Path) -> Result<(), StoreError> {
        let source = path.to_path_buf();
        let new_index: BlockIndex =
            serde_json::from_slice(&fs::read(source.join("index.json"))?)?;

        // Clear current bodies, then copy the backup in.
        for entry in fs::read_dir(self.dir.join("blocks"))? {
            fs::remove_file(entry?.path())?;
        }
        for entry in fs::read_dir(source.join("blocks"))? {
            let entry = entry?;
            fs::copy(entry.path(), self.dir.join("blocks").join(entry.file_name()))?;
        }
        let mut index = self.index.lock().unwrap();
        *index = new_index;
        self.save_index(&index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_chain::parameters::{genesis, Network, NetworkParameters};
    use tempdir::TempDir;

    #[test]
    fn state_survives_reopen() {
        ember_test::init();

        let dir = TempDir::new("ember-json-state").unwrap();
        let path = dir.path().join("state.json");
        let address = Address::new(Network::Mainnet, [5; 20]);

        {
            let store = JsonStateStore::open(&path).unwrap();
            store.begin().unwrap();
            store.set_balance(&address, 42).unwrap();
            store.commit().unwrap();
        }

        let store = JsonStateStore::open(&path).unwrap();
        assert_eq!(store.get_balance(&address).unwrap(), 42);
    }

    #[test]
    fn uncommitted_writes_do_not_persist() {
        ember_test::init();

        let dir = TempDir::new("ember-json-state").unwrap();
        let path = dir.path().join("state.json");
        let address = Address::new(Network::Mainnet, [6; 20]);

        {
            let store = JsonStateStore::open(&path).unwrap();
            // Establish the file on disk first.
            store.set_metadata("created", "yes").unwrap();
            store.begin().unwrap();
            store.set_balance(&address, 42).unwrap();
            // Dropped without commit.
        }

        let store = JsonStateStore::open(&path).unwrap();
        assert_eq!(store.get_balance(&address).unwrap(), 0);
    }

    #[test]
    fn snapshots_survive_reopen() {
        ember_test::init();

        let dir = TempDir::new("ember-json-state").unwrap();
        let path = dir.path().join("state.json");
        let address = Address::new(Network::Mainnet, [7; 20]);

        {
            let store = JsonStateStore::open(&path).unwrap();
            store.set_balance(&address, 9).unwrap();
            store.snapshot(3).unwrap();
            store.set_balance(&address, 1).unwrap();
        }

        let store = JsonStateStore::open(&path).unwrap();
        assert_eq!(store.get_balance(&address).unwrap(), 1);
        store.restore_snapshot(3).unwrap();
        assert_eq!(store.get_balance(&address).unwrap(), 9);
    }

    #[test]
    fn block_store_survives_reopen() {
        ember_test::init();

        let dir = TempDir::new("ember-json-blocks").unwrap();
        let genesis = genesis::genesis_block(&NetworkParameters::default());

        {
            let store = JsonBlockStore::open(dir.path()).unwrap();
            store.put(&genesis).unwrap();
        }

        let store = JsonBlockStore::open(dir.path()).unwrap();
        assert_eq!(
            store.get_by_height(0).unwrap().unwrap().hash(),
            genesis.hash()
        );
        assert_eq!(store.tip().unwrap(), Some((0, genesis.hash())));
    }

    #[test]
    fn backup_and_restore_block_store() {
        ember_test::init();

        let dir = TempDir::new("ember-json-blocks").unwrap();
        let backup_dir = TempDir::new("ember-json-backup").unwrap();
        let genesis = genesis::genesis_block(&NetworkParameters::default());

        let store = JsonBlockStore::open(dir.path()).unwrap();
        store.put(&genesis).unwrap();
        store.backup(backup_dir.path()).unwrap();

        store.delete(&genesis.hash()).unwrap();
        assert!(store.get_by_hash(&genesis.hash()).unwrap().is_none());

        store.restore(backup_dir.path()).unwrap();
        assert!(store.get_by_hash(&genesis.hash()).unwrap().is_some());
    }
}
