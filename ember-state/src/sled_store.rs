//! The production store backends, built on the sled embedded key-value
//! store.
//!
//! Namespaces are sled trees: `blk` (block hash → canonical block bytes)
//! and `hgt` (big-endian height → block hash) for blocks; `acc`, `sto`,
//! `utxo`, and `meta` for state. UTXO values use the canonical wire
//! encoding; account values use JSON so a hex dump of the database stays
//! debuggable.

use std::convert::TryInto;
use std::path::Path;
use std::sync::Mutex;

use ember_chain::block::{self, Block};
use ember_chain::transparent::{Address, OutPoint, Output};
use ember_chain::{EmberDeserialize, EmberSerialize};
use tracing::trace;

use crate::config::Config;
use crate::state_store::{AccountState, Staged, StateData};
use crate::{BlockStore, StateStore, StoreError};
use ember_chain::parameters::Network;

fn height_key(height: u64) -> [u8; 8] {
    height.to_be_bytes()
}

fn decode_height(bytes: &[u8]) -> Result<u64, StoreError> {
    Ok(u64::from_be_bytes(bytes.try_into().map_err(|_| {
        StoreError::Corruption("height key is not 8 bytes".into())
    })?))
}

fn decode_hash(bytes: &[u8]) -> Result<block::Hash, StoreError> {
    Ok(block::Hash(bytes.try_into().map_err(|_| {
        StoreError::Corruption("block hash value is not 32 bytes".into())
    })?))
}

// ---- block store ----

/// A [`BlockStore`] over a sled database.
pub struct SledBlockStore {
    db: sled::Db,
    blk: sled::Tree,
    hgt: sled::Tree,
}

impl SledBlockStore {
    pub fn open(config: &Config, network: Network) -> Result<SledBlockStore, StoreError> {
        let db = config.sled_config(network, "blocks").open()?;
        Ok(SledBlockStore {
            blk: db.open_tree(b"blk")?,
            hgt: db.open_tree(b"hgt")?,
            db,
        })
    }

    fn read_block(&self, bytes: &[u8]) -> Result<Block, StoreError> {
        Ok(Block::ember_deserialize(bytes)?)
    }
}

impl BlockStore for SledBlockStore {
    fn put(&self, block: &Block) -> Result<(), StoreError> {
        let hash = block.hash();
        let body = block.ember_serialize_to_vec().map_err(StoreError::Io)?;

        // Body first, flushed to disk, then the height index. A crash in
        // between leaves a dangling body without an index entry, which
        // readers never reach.
        self.blk.insert(&hash.0, body)?;
        self.blk.flush()?;
        self.hgt.insert(&height_key(block.height()), &hash.0)?;

        metrics::counter!("store.block.put.count", 1);
        trace!(height = block.height(), %hash, "stored block");
        Ok(())
    }

    fn put_body(&self, block: &Block) -> Result<(), StoreError> {
        let hash = block.hash();
        let body = block.ember_serialize_to_vec().map_err(StoreError::Io)?;
        self.blk.insert(&hash.0, body)?;
        self.blk.flush()?;
        Ok(())
    }

    fn get_by_hash(&self, hash: &block::Hash) -> Result<Option<Block>, StoreError> {
        match self.blk.get(&hash.0)? {
            Some(bytes) => Ok(Some(self.read_block(&bytes)?)),
            None => Ok(None),
        }
    }

    fn get_by_height(&self, height: u64) -> Result<Option<Block>, StoreError> {
        match self.hgt.get(&height_key(height))? {
            Some(hash) => self.get_by_hash(&decode_hash(&hash)?),
            None => Ok(None),
        }
    }

    fn tip(&self) -> Result<Option<(u64, block::Hash)>, StoreError> {
        match self.hgt.last()? {
            Some((height, hash)) => Ok(Some((decode_height(&height)?, decode_hash(&hash)?))),
            None => Ok(None),
        }
    }

    fn range(&self, start: u64, end: u64) -> Result<Vec<Block>, StoreError> {
        let mut blocks = Vec::new();
        for entry in self
            .hgt
            .range(height_key(start).to_vec()..=height_key(end).to_vec())
        {
            let (_, hash) = entry?;
            let hash = decode_hash(&hash)?;
            match self.get_by_hash(&hash)? {
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
        let block = match self.get_by_hash(hash)? {
            Some(block) => block,
            None => return Ok(false),
        };
        self.blk.remove(&hash.0)?;
        if let Some(indexed) = self.hgt.get(&height_key(block.height()))? {
            if indexed.as_ref() == hash.0 {
                self.hgt.remove(&height_key(block.height()))?;
            }
        }
        Ok(true)
    }

    fn unindex_height(&self, height: u64) -> Result<(), StoreError> {
        self.hgt.remove(&height_key(height))?;
        Ok(())
    }

    fn compact(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    fn backup(&self, path: &Path) -> Result<(), StoreError> {
        let target = sled::Config::default().path(path).open()?;
        let blk = target.open_tree(b"blk")?;
        let hgt = target.open_tree(b"hgt")?;
        blk.clear()?;
        hgt.clear()?;
        for entry in self.blk.iter() {
            let (key, value) = entry?;
            blk.insert(key, value)?;
        }
        for entry in self.hgt.iter() {
            let (key, value) = entry?;
            hgt.insert(key, value)?;
        }
        target.flush()?;
        Ok(())
    }

    fn restore(&self, path: &Path) -> Result<(), StoreError> {
        let source = sled::Config::default().path(path).open()?;
        let blk = source.open_tree(b"blk")?;
        let hgt = source.open_tree(b"hgt")?;
        self.blk.clear()?;
        self.hgt.clear()?;
        for entry in blk.iter() {
            let (key, value) = entry?;
            self.blk.insert(key, value)?;
        }
        for entry in hgt.iter() {
            let (key, value) = entry?;
            self.hgt.insert(key, value)?;
        }
        self.db.flush()?;
        Ok(())
    }
}

// ---- state store ----

/// A [`StateStore`] over a sled database.
pub struct SledStateStore {
    db: sled::Db,
    acc: sled::Tree,
    sto: sled::Tree,
    utxo: sled::Tree,
    meta: sled::Tree,
    staged: Mutex<Option<Staged>>,
}

fn account_key(address: &Address) -> Vec<u8> {
    address.to_string().into_bytes()
}

fn storage_key(address: &Address, key: &[u8]) -> Vec<u8> {
    let mut out = account_key(address);
    out.push(b':');
    out.extend_from_slice(hex::encode(key).as_bytes());
    out
}

fn utxo_key(outpoint: &OutPoint) -> Vec<u8> {
    let mut out = Vec::with_capacity(36);
    out.extend_from_slice(&outpoint.hash.0);
    out.extend_from_slice(&outpoint.index.to_be_bytes());
    out
}

fn decode_utxo_key(bytes: &[u8]) -> Result<OutPoint, StoreError> {
    if bytes.len() != 36 {
        return Err(StoreError::Corruption("utxo key is not 36 bytes".into()));
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&bytes[0..32]);
    Ok(OutPoint {
        hash: ember_chain::transaction::Hash(hash),
        index: u32::from_be_bytes(bytes[32..36].try_into().expect("length checked")),
    })
}

const META_SNAPSHOT_PREFIX: &str = "snap:";
const META_VALUE_PREFIX: &str = "m:";

impl SledStateStore {
    pub fn open(config: &Config, network: Network) -> Result<SledStateStore, StoreError> {
        let db = config.sled_config(network, "state").open()?;
        Ok(SledStateStore {
            acc: db.open_tree(b"acc")?,
            sto: db.open_tree(b"sto")?,
            utxo: db.open_tree(b"utxo")?,
            meta: db.open_tree(b"meta")?,
            staged: Mutex::new(None),
            db,
        })
    }

    fn base_account(&self, address: &Address) -> Result<Option<AccountState>, StoreError> {
        match self.acc.get(account_key(address))? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn base_utxo(&self, outpoint: &OutPoint) -> Result<Option<Output>, StoreError> {
        match self.utxo.get(utxo_key(outpoint))? {
            Some(bytes) => Ok(Some(Output::ember_deserialize(&bytes[..])?)),
            None => Ok(None),
        }
    }

    /// Materialize the committed state as a whole-state value.
    fn dump_state(&self) -> Result<StateData, StoreError> {
        let mut data = StateData::default();
        for entry in self.acc.iter() {
            let (key, value) = entry?;
            let address = parse_address_key(&key)?;
            data.accounts
                .insert(address, serde_json::from_slice(&value)?);
        }
        for entry in self.sto.iter() {
            let (key, value) = entry?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|_| StoreError::Corruption("storage key is not utf-8".into()))?;
            let (address, hex_key) = key
                .split_once(':')
                .ok_or_else(|| StoreError::Corruption("storage key missing separator".into()))?;
            let address: Address = address
                .parse()
                .map_err(|_| StoreError::Corruption("bad address in storage key".into()))?;
            data.storage
                .entry(address)
                .or_default()
                .insert(hex_key.to_string(), hex::encode(&value));
        }
        for entry in self.utxo.iter() {
            let (key, value) = entry?;
            let outpoint = decode_utxo_key(&key)?;
            data.add_utxo(outpoint, Output::ember_deserialize(&value[..])?);
        }
        for entry in self.meta.scan_prefix(META_VALUE_PREFIX.as_bytes()) {
            let (key, value) = entry?;
            let key = String::from_utf8_lossy(&key[META_VALUE_PREFIX.len()..]).into_owned();
            data.metadata
                .insert(key, String::from_utf8_lossy(&value).into_owned());
        }
        Ok(data)
    }

    /// Replace the committed state with a whole-state value.
    fn load_state(&self, data: &StateData) -> Result<(), StoreError> {
        self.acc.clear()?;
        self.sto.clear()?;
        self.utxo.clear()?;
        for (address, account) in data.accounts.iter() {
            self.acc
                .insert(account_key(address), serde_json::to_vec(account)?)?;
        }
        for (address, entries) in data.storage.iter() {
            for (hex_key, hex_value) in entries.iter() {
                let key = hex::decode(hex_key)
                    .map_err(|_| StoreError::Corruption("bad storage key hex".into()))?;
                let value = hex::decode(hex_value)
                    .map_err(|_| StoreError::Corruption("bad storage value hex".into()))?;
                self.sto.insert(storage_key(address, &key), value)?;
            }
        }
        for (key, output) in data.utxos.iter() {
            let outpoint = crate::state_store::parse_outpoint_key(key)?;
            self.utxo.insert(
                utxo_key(&outpoint),
                output.ember_serialize_to_vec().map_err(StoreError::Io)?,
            )?;
        }
        self.db.flush()?;
        Ok(())
    }

    fn snapshot_key(id: u64) -> Vec<u8> {
        let mut key = META_SNAPSHOT_PREFIX.as_bytes().to_vec();
        key.extend_from_slice(&id.to_be_bytes());
        key
    }
}

fn parse_address_key(bytes: &[u8]) -> Result<Address, StoreError> {
    String::from_utf8(bytes.to_vec())
        .map_err(|_| StoreError::Corruption("account key is not utf-8".into()))?
        .parse()
        .map_err(|_| StoreError::Corruption("account key is not an address".into()))
}

impl StateStore for SledStateStore {
    fn get_account(&self, address: &Address) -> Result<Option<AccountState>, StoreError> {
        if let Some(staged) = self.staged.lock().unwrap().as_ref() {
            if let Some(entry) = staged.accounts.get(address) {
                return Ok(entry.clone());
            }
        }
        self.base_account(address)
    }

    fn set_account(&self, address: &Address, account: AccountState) -> Result<(), StoreError> {
        let mut staged = self.staged.lock().unwrap();
        match staged.as_mut() {
            Some(staged) => {
                staged.accounts.insert(*address, Some(account));
            }
            None => {
                self.acc
                    .insert(account_key(address), serde_json::to_vec(&account)?)?;
            }
        }
        Ok(())
    }

    fn delete_account(&self, address: &Address) -> Result<(), StoreError> {
        let mut staged = self.staged.lock().unwrap();
        match staged.as_mut() {
            Some(staged) => {
                staged.accounts.insert(*address, None);
            }
            None => {
                self.acc.remove(account_key(address))?;
                // Contract storage goes with the account.
                let keys: Vec<_> = self
                    .sto
                    .scan_prefix(storage_key(address, b"").as_slice())
                    .keys()
                    .collect::<Result<_, _>>()?;
                for key in keys {
                    self.sto.remove(key)?;
                }
            }
        }
        Ok(())
    }

    fn get_storage_value(
        &self,
        address: &Address,
        key: &[u8],
    ) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(staged) = self.staged.lock().unwrap().as_ref() {
            if let Some(entry) = staged.storage.get(&(*address, key.to_vec())) {
                return Ok(entry.clone());
            }
        }
        Ok(self
            .sto
            .get(storage_key(address, key))?
            .map(|value| value.to_vec()))
    }

    fn set_storage_value(
        &self,
        address: &Address,
        key: &[u8],
        value: &[u8],
    ) -> Result<(), StoreError> {
        let mut staged = self.staged.lock().unwrap();
        match staged.as_mut() {
            Some(staged) => {
                staged
                    .storage
                    .insert((*address, key.to_vec()), Some(value.to_vec()));
            }
            None => {
                self.sto.insert(storage_key(address, key), value)?;
            }
        }
        Ok(())
    }

    fn get_utxo(&self, outpoint: &OutPoint) -> Result<Option<Output>, StoreError> {
        if let Some(staged) = self.staged.lock().unwrap().as_ref() {
            if let Some(entry) = staged.utxos.get(outpoint) {
                return Ok(entry.clone());
            }
        }
        self.base_utxo(outpoint)
    }

    fn add_utxo(&self, outpoint: OutPoint, output: Output) -> Result<(), StoreError> {
        let mut staged = self.staged.lock().unwrap();
        match staged.as_mut() {
            Some(staged) => {
                staged.utxos.insert(outpoint, Some(output));
            }
            None => {
                self.utxo.insert(
                    utxo_key(&outpoint),
                    output.ember_serialize_to_vec().map_err(StoreError::Io)?,
                )?;
            }
        }
        Ok(())
    }

    fn remove_utxo(&self, outpoint: &OutPoint) -> Result<Option<Output>, StoreError> {
        let previous = self.get_utxo(outpoint)?;
        let mut staged = self.staged.lock().unwrap();
        match staged.as_mut() {
            Some(staged) => {
                staged.utxos.insert(*outpoint, None);
            }
            None => {
                self.utxo.remove(utxo_key(outpoint))?;
            }
        }
        Ok(previous)
    }

    fn utxos_for_address(&self, address: &Address) -> Result<Vec<(OutPoint, Output)>, StoreError> {
        let mut found = std::collections::BTreeMap::new();
        for entry in self.utxo.iter() {
            let (key, value) = entry?;
            let output = Output::ember_deserialize(&value[..])?;
            if output.recipient == *address {
                found.insert(key.to_vec(), (decode_utxo_key(&key)?, output));
            }
        }
        if let Some(staged) = self.staged.lock().unwrap().as_ref() {
            for (outpoint, entry) in staged.utxos.iter() {
                let key = utxo_key(outpoint);
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

    fn get_metadata(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut meta_key = META_VALUE_PREFIX.as_bytes().to_vec();
        meta_key.extend_from_slice(key.as_bytes());
        Ok(self
            .meta
            .get(meta_key)?
            .map(|value| String::from_utf8_lossy(&value).into_owned()))
    }

    fn set_metadata(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut meta_key = META_VALUE_PREFIX.as_bytes().to_vec();
        meta_key.extend_from_slice(key.as_bytes());
        self.meta.insert(meta_key, value.as_bytes())?;
        self.meta.flush()?;
        Ok(())
    }

    fn begin(&self) -> Result<(), StoreError> {
        let mut staged = self.staged.lock().unwrap();
        if staged.is_some() {
            return Err(StoreError::TransactionInProgress);
        }
        *staged = Some(Staged::default());
        Ok(())
    }

    fn commit(&self) -> Result<(), StoreError> {
        let staged = self
            .staged
            .lock()
            .unwrap()
            .take()
            .ok_or(StoreError::NoTransaction)?;

        let mut acc_batch = sled::Batch::default();
        for (address, entry) in staged.accounts.iter() {
            match entry {
                Some(account) => acc_batch.insert(account_key(address), serde_json::to_vec(account)?),
                None => acc_batch.remove(account_key(address)),
            }
        }
        let mut sto_batch = sled::Batch::default();
        for ((address, key), entry) in staged.storage.iter() {
            match entry {
                Some(value) => sto_batch.insert(storage_key(address, key), value.clone()),
                None => sto_batch.remove(storage_key(address, key)),
            }
        }
        let mut utxo_batch = sled::Batch::default();
        for (outpoint, entry) in staged.utxos.iter() {
            match entry {
                Some(output) => utxo_batch.insert(
                    utxo_key(outpoint),
                    output.ember_serialize_to_vec().map_err(StoreError::Io)?,
                ),
                None => utxo_batch.remove(utxo_key(outpoint)),
            }
        }

        self.acc.apply_batch(acc_batch)?;
        self.sto.apply_batch(sto_batch)?;
        self.utxo.apply_batch(utxo_batch)?;
        self.db.flush()?;
        metrics::counter!("store.state.commit.count", 1);
        Ok(())
    }

    fn rollback(&self) -> Result<(), StoreError> {
        self.staged
            .lock()
            .unwrap()
            .take()
            .map(|_| ())
            .ok_or(StoreError::NoTransaction)
    }

    fn snapshot(&self, id: u64) -> Result<(), StoreError> {
        let data = self.dump_state()?;
        self.meta
            .insert(Self::snapshot_key(id), serde_json::to_vec(&data)?)?;
        self.meta.flush()?;
        Ok(())
    }

    fn restore_snapshot(&self, id: u64) -> Result<(), StoreError> {
        let blob = self
            .meta
            .get(Self::snapshot_key(id))?
            .ok_or(StoreError::MissingSnapshot(id))?;
        let data: StateData = serde_json::from_slice(&blob)?;
        *self.staged.lock().unwrap() = None;
        self.load_state(&data)
    }

    fn delete_snapshot(&self, id: u64) -> Result<(), StoreError> {
        self.meta
            .remove(Self::snapshot_key(id))?
            .map(|_| ())
            .ok_or(StoreError::MissingSnapshot(id))
    }

    fn backup(&self, path: &Path) -> Result<(), StoreError> {
        let data = self.dump_state()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(&data)?)?;
        Ok(())
    }

    fn restore(&self, path: &Path) -> Result<(), StoreError> {
        let data: StateData = serde_json::from_slice(&std::fs::read(path)?)?;
        *self.staged.lock().unwrap() = None;
        self.load_state(&data)
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.staged.lock().unwrap() = None;
        self.acc.clear()?;
        self.sto.clear()?;
        self.utxo.clear()?;
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn open_stores(dir: &TempDir) -> (SledBlockStore, SledStateStore) {
        let config = Config::with_dir(dir.path());
        (
            SledBlockStore::open(&config, Network::Testnet).unwrap(),
            SledStateStore::open(&config, Network::Testnet).unwrap(),
        )
    }

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
    fn block_round_trip() {
        ember_test::init();

        let dir = TempDir::new("ember-sled").unwrap();
        let (blocks, _) = open_stores(&dir);

        let genesis = ember_chain::parameters::genesis::genesis_block(
            &ember_chain::parameters::NetworkParameters::test(),
        );
        blocks.put(&genesis).unwrap();

        assert_eq!(
            blocks.get_by_hash(&genesis.hash()).unwrap().unwrap(),
            genesis
        );
        assert_eq!(blocks.get_by_height(0).unwrap().unwrap(), genesis);
        assert_eq!(blocks.tip().unwrap(), Some((0, genesis.hash())));
        assert_eq!(blocks.range(0, 10).unwrap().len(), 1);
    }

    #[test]
    fn state_commit_and_rollback() {
        ember_test::init();

        let dir = TempDir::new("ember-sled").unwrap();
        let (_, state) = open_stores(&dir);

        state.begin().unwrap();
        state.set_balance(&address(1), 5).unwrap();
        state
            .add_utxo(outpoint(1, 0), Output::new(5, address(1), 0))
            .unwrap();
        state.commit().unwrap();

        state.begin().unwrap();
        state.remove_utxo(&outpoint(1, 0)).unwrap();
        state.set_balance(&address(1), 0).unwrap();
        state.rollback().unwrap();

        assert_eq!(state.get_balance(&address(1)).unwrap(), 5);
        assert!(state.get_utxo(&outpoint(1, 0)).unwrap().is_some());
        assert_eq!(state.utxos_for_address(&address(1)).unwrap().len(), 1);
    }

    #[test]
    fn snapshot_round_trip() {
        ember_test::init();

        let dir = TempDir::new("ember-sled").unwrap();
        let (_, state) = open_stores(&dir);

        state.set_balance(&address(2), 11).unwrap();
        state
            .set_storage_value(&address(2), b"slot", b"value")
            .unwrap();
        state.snapshot(9).unwrap();

        state.clear().unwrap();
        assert_eq!(state.get_balance(&address(2)).unwrap(), 0);

        state.restore_snapshot(9).unwrap();
        assert_eq!(state.get_balance(&address(2)).unwrap(), 11);
        assert_eq!(
            state.get_storage_value(&address(2), b"slot").unwrap(),
            Some(b"value".to_vec())
        );
    }

    #[test]
    fn metadata_survives_clear() {
        ember_test::init();

        let dir = TempDir::new("ember-sled").unwrap();
        let (_, state) = open_stores(&dir);

        state.set_metadata("tip", "abcd").unwrap();
        state.clear().unwrap();
        assert_eq!(state.get_metadata("tip").unwrap(), Some("abcd".into()));
    }
}
