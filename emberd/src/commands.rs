//! The node command surface.
//!
//! Every operation returns a structured JSON result or a [`NodeError`]
//! with a short human reason; the CLI maps these one-to-one onto its
//! subcommands.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::info;

use ember_chain::block::Block;
use ember_chain::transaction::Transaction;
use ember_chain::transparent::Address;
use ember_chain::{EmberDeserializeInto, EmberSerialize};
use ember_consensus::{ChainManager, NullRuntime};
use ember_state::HashOrHeight;

use crate::components::miner::Miner;
use crate::node::{unix_now, Node};
use crate::NodeError;

impl Node {
    // ---- lifecycle ----

    pub fn status(&self) -> Value {
        let chain = self.chain();
        let summary = chain.summary();
        json!({
            "running": self.is_running(),
            "mining": self.inner.mining.load(Ordering::SeqCst),
            "network": self.inner.config.chain.network.name(),
            "height": summary.height,
            "best_block_id": summary.best_block_id.to_string(),
            "total_work": summary.total_work.to_string(),
            "peers": self.connected_peer_count(),
            "mempool": self.inner.mempool.len(),
        })
    }

    fn connected_peer_count(&self) -> usize {
        self.inner
            .address_book
            .lock()
            .unwrap()
            .peers()
            .filter(|peer| peer.state == ember_network::PeerConnectionState::Ready)
            .count()
    }

    // ---- chain queries ----

    /// Summaries of the most recent `limit` blocks, tip first.
    pub fn show_chain(&self, limit: usize) -> Result<Value, NodeError> {
        let chain = self.chain();
        let height = chain.height();
        let mut blocks = Vec::new();
        let mut cursor = height;
        loop {
            if blocks.len() >= limit {
                break;
            }
            match chain.block(HashOrHeight::Height(cursor))? {
                Some(block) => blocks.push(block_summary(&block)),
                None => break,
            }
            if cursor == 0 {
                break;
            }
            cursor -= 1;
        }
        Ok(json!({ "height": height, "blocks": blocks }))
    }

    pub fn show_block(&self, query: HashOrHeight) -> Result<Value, NodeError> {
        let block = self
            .chain()
            .block(query)?
            .ok_or_else(|| NodeError::InvalidArgument("no such block".into()))?;
        Ok(serde_json::to_value(&block)?)
    }

    pub fn show_stats(&self) -> Result<Value, NodeError> {
        let chain = self.chain();
        let summary = chain.summary();
        let mut transactions = 0u64;
        for height in 0..=summary.height {
            if let Some(block) = chain.block(HashOrHeight::Height(height))? {
                transactions += block.transactions.len() as u64;
            }
        }
        Ok(json!({
            "height": summary.height,
            "best_block_id": summary.best_block_id.to_string(),
            "genesis_id": summary.genesis_id.to_string(),
            "total_work": summary.total_work.to_string(),
            "total_transactions": transactions,
            "next_difficulty": chain.next_difficulty(),
            "mempool": self.inner.mempool.len(),
        }))
    }

    pub fn replay_block(&self, hash: &str) -> Result<Value, NodeError> {
        let hash = parse_block_hash(hash)?;
        self.chain().replay_block(&hash)?;
        Ok(json!({ "replayed": hash.to_string(), "valid": true }))
    }

    pub fn balance(&self, address: &str) -> Result<Value, NodeError> {
        let address = parse_address(address)?;
        let chain = self.chain();
        Ok(json!({
            "address": address.to_string(),
            "balance": chain.balance(&address)?,
            "nonce": chain.nonce(&address)?,
            "utxos": chain.utxos_of(&address)?.len(),
        }))
    }

    // ---- mempool ----

    pub fn tx_pool(&self) -> Value {
        let entries: Vec<Value> = self
            .inner
            .mempool
            .select(usize::MAX)
            .into_iter()
            .map(|(tx, fee)| json!({ "id": tx.hash().to_string(), "fee": fee }))
            .collect();
        json!({ "size": entries.len(), "transactions": entries })
    }

    /// Admit a transaction without announcing it.
    pub async fn add_transaction(&self, tx: Transaction) -> Result<Value, NodeError> {
        let id = tx.hash();
        let chain = self.chain();
        let fee = self.inner.mempool.insert(Arc::new(tx), chain.as_ref())?;
        Ok(json!({ "id": id.to_string(), "fee": fee }))
    }

    /// Admit (if needed) and announce a transaction to all peers.
    pub async fn broadcast_transaction(&self, tx: Transaction) -> Result<Value, NodeError> {
        let id = tx.hash();
        self.on_incoming_tx(None, Arc::new(tx)).await;
        if !self.inner.mempool.contains(&id) {
            return Err(NodeError::InvalidArgument(format!(
                "transaction {} was not admitted",
                id
            )));
        }
        Ok(json!({ "id": id.to_string(), "broadcast": true }))
    }

    /// Decode a hex-encoded canonical transaction.
    pub fn decode_transaction(&self, hex_bytes: &str) -> Result<Transaction, NodeError> {
        let bytes = hex::decode(hex_bytes)
            .map_err(|_| NodeError::InvalidArgument("transaction hex is invalid".into()))?;
        bytes
            .as_slice()
            .ember_deserialize_into()
            .map_err(|err| NodeError::InvalidArgument(format!("bad transaction: {}", err)))
    }

    // ---- mining ----

    /// Assemble an unsolved candidate block.
    pub fn generate_block_template(&self) -> Result<Value, NodeError> {
        let template = self.build_miner()?.assemble_template()?;
        Ok(json!({
            "height": template.height(),
            "difficulty": template.header.difficulty,
            "transactions": template.transactions.len(),
            "template_hex": hex::encode(
                template.ember_serialize_to_vec().map_err(NodeError::Network)?
            ),
        }))
    }

    /// Mine one block synchronously and submit it.
    pub async fn mine_block(&self) -> Result<Value, NodeError> {
        let template = self.build_miner()?.assemble_template()?;
        let cancel = std::sync::atomic::AtomicBool::new(false);
        let block =
            Miner::solve(template, &cancel).expect("an uncancelled search only ends solved");
        let hash = block.hash();
        let height = block.height();
        self.on_incoming_block(None, Arc::new(block)).await;
        if self.chain().height() < height {
            return Err(NodeError::InvalidArgument(
                "mined block was not accepted".into(),
            ));
        }
        Ok(json!({ "hash": hash.to_string(), "height": height }))
    }

    pub fn start_mining(&self) -> Result<Value, NodeError> {
        if !self.is_running() {
            return Err(NodeError::NotRunning);
        }
        self.start_miner()?;
        Ok(json!({ "mining": true }))
    }

    pub fn stop_mining(&self) -> Value {
        self.stop_miner();
        json!({ "mining": false })
    }

    pub fn mining_status(&self) -> Result<Value, NodeError> {
        Ok(json!({
            "mining": self.inner.mining.load(Ordering::SeqCst),
            "reward_address": self.reward_address()?.to_string(),
            "next_difficulty": self.chain().next_difficulty(),
        }))
    }

    // ---- peers ----

    pub fn connect_peer(&self, addr: &str) -> Result<Value, NodeError> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|_| NodeError::InvalidArgument(format!("bad peer address {}", addr)))?;
        if !self.is_running() {
            return Err(NodeError::NotRunning);
        }
        if !self
            .inner
            .address_book
            .lock()
            .unwrap()
            .is_admissible(&addr, unix_now())
        {
            return Err(NodeError::InvalidArgument(format!(
                "peer {} is banned or blacklisted",
                addr
            )));
        }
        self.attach_connection(addr, None);
        Ok(json!({ "connecting": addr.to_string() }))
    }

    pub fn disconnect_peer(&self, addr: &str) -> Result<Value, NodeError> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|_| NodeError::InvalidArgument(format!("bad peer address {}", addr)))?;
        self.inner.peers.lock().unwrap().remove(&addr);
        self.inner
            .address_book
            .lock()
            .unwrap()
            .record_disconnect(addr, unix_now());
        Ok(json!({ "disconnected": addr.to_string() }))
    }

    pub fn list_peers(&self) -> Value {
        let book = self.inner.address_book.lock().unwrap();
        let peers: Vec<Value> = book
            .peers()
            .map(|peer| {
                json!({
                    "address": peer.addr.to_string(),
                    "node_id": peer.node_id,
                    "state": format!("{:?}", peer.state),
                    "reputation": peer.reputation,
                    "latency_ms": peer.last_latency_ms,
                    "ban_expiry": peer.ban_expiry,
                })
            })
            .collect();
        json!({ "peers": peers })
    }

    pub fn network_info(&self) -> Value {
        let book = self.inner.address_book.lock().unwrap();
        let banned = book
            .peers()
            .filter(|peer| peer.is_banned(unix_now()))
            .count();
        json!({
            "listen_addr": self.inner.config.network.listen_addr.to_string(),
            "network": self.inner.config.chain.network.name(),
            "known_peers": book.len(),
            "connected": self.inner.peers.lock().unwrap().len(),
            "banned": banned,
            "challenge_peers": self.inner.config.network.challenge_peers,
        })
    }

    pub fn ban_peer(&self, addr: &str) -> Result<Value, NodeError> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|_| NodeError::InvalidArgument(format!("bad peer address {}", addr)))?;
        let expiry = self
            .inner
            .address_book
            .lock()
            .unwrap()
            .ban(addr, unix_now());
        self.inner.peers.lock().unwrap().remove(&addr);
        Ok(json!({ "banned": addr.to_string(), "until": expiry }))
    }

    pub fn unban_peer(&self, addr: &str) -> Result<Value, NodeError> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|_| NodeError::InvalidArgument(format!("bad peer address {}", addr)))?;
        self.inner.address_book.lock().unwrap().unban(addr);
        Ok(json!({ "unbanned": addr.to_string() }))
    }

    // ---- wallet ----

    pub fn create_account(&self, label: &str, password: &str) -> Result<Value, NodeError> {
        let account = self
            .inner
            .wallet
            .lock()
            .unwrap()
            .create_account(label, password)?;
        Ok(json!({ "address": account.address, "label": account.label }))
    }

    pub fn import_account(
        &self,
        label: &str,
        secret_hex: &str,
        password: &str,
    ) -> Result<Value, NodeError> {
        let account =
            self.inner
                .wallet
                .lock()
                .unwrap()
                .import_account(label, secret_hex, password)?;
        Ok(json!({ "address": account.address, "label": account.label }))
    }

    pub fn list_accounts(&self) -> Value {
        let wallet = self.inner.wallet.lock().unwrap();
        let default = wallet.default_account().map(|a| a.address.clone());
        let accounts: Vec<Value> = wallet
            .list_accounts()
            .iter()
            .map(|account| {
                json!({
                    "address": account.address,
                    "label": account.label,
                    "default": Some(&account.address) == default.as_ref(),
                })
            })
            .collect();
        json!({ "accounts": accounts })
    }

    /// Build and sign a transfer from a wallet account, selecting UTXOs
    /// until `amount + fee` is covered and returning change to the sender.
    pub fn create_transfer(
        &self,
        from: &str,
        password: &str,
        to: &str,
        amount: u64,
        fee: u64,
    ) -> Result<Transaction, NodeError> {
        let from_addr = parse_address(from)?;
        let to_addr = parse_address(to)?;
        let keys = self.inner.wallet.lock().unwrap().unlock(from, password)?;

        let needed = amount
            .checked_add(fee)
            .ok_or_else(|| NodeError::InvalidArgument("amount overflows".into()))?;
        let chain = self.chain();
        let mut selected = Vec::new();
        let mut total = 0u64;
        for (outpoint, output) in chain.utxos_of(&from_addr)? {
            total = total.saturating_add(output.value);
            selected.push(outpoint);
            if total >= needed {
                break;
            }
        }
        if total < needed {
            return Err(NodeError::InvalidArgument(format!(
                "insufficient funds: have {}, need {}",
                total, needed
            )));
        }

        let inputs = selected
            .into_iter()
            .map(|outpoint| ember_chain::transparent::Input::new(outpoint, keys.public_key_bytes()))
            .collect();
        let mut outputs = vec![ember_chain::transparent::Output::new(amount, to_addr, 0)];
        let change = total - needed;
        if change > 0 {
            outputs.push(ember_chain::transparent::Output::new(change, from_addr, 1));
        }

        let mut tx = Transaction::new(1, inputs, outputs, 0);
        tx.sign(&keys)
            .map_err(|err| NodeError::InvalidArgument(err.to_string()))?;
        Ok(tx)
    }

    pub fn export_account(&self, address: &str, password: &str) -> Result<Value, NodeError> {
        let blob = self
            .inner
            .wallet
            .lock()
            .unwrap()
            .export_account(address, password)?;
        Ok(serde_json::to_value(&blob)?)
    }

    pub fn remove_account(&self, address: &str) -> Result<Value, NodeError> {
        self.inner.wallet.lock().unwrap().remove_account(address)?;
        Ok(json!({ "removed": address }))
    }

    pub fn set_default_account(&self, address: &str) -> Result<Value, NodeError> {
        self.inner
            .wallet
            .lock()
            .unwrap()
            .set_default_account(address)?;
        Ok(json!({ "default_account": address }))
    }

    // ---- maintenance ----

    pub fn validate_chain(&self) -> Result<Value, NodeError> {
        let verified = self.chain().verify_chain()?;
        Ok(json!({ "valid": true, "verified_height": verified }))
    }

    /// Write the whole active chain to `path` as a JSON array of blocks.
    pub fn export_chain(&self, path: &Path) -> Result<Value, NodeError> {
        let chain = self.chain();
        let height = chain.height();
        let mut blocks = Vec::with_capacity(height as usize + 1);
        for cursor in 0..=height {
            let block = chain
                .block(HashOrHeight::Height(cursor))?
                .ok_or_else(|| NodeError::InvalidArgument("height index gap".into()))?;
            blocks.push(block);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(NodeError::Network)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(&blocks)?).map_err(NodeError::Network)?;
        info!(?path, height, "chain exported");
        Ok(json!({ "exported_blocks": blocks.len() }))
    }

    /// Feed blocks from a previously exported file through the chain
    /// manager.
    pub async fn import_chain(&self, path: &Path) -> Result<Value, NodeError> {
        let blocks: Vec<Block> =
            serde_json::from_slice(&std::fs::read(path).map_err(NodeError::Network)?)?;
        let mut imported = 0usize;
        for block in blocks {
            if block.height() == 0 {
                // The genesis block is fixed by configuration.
                continue;
            }
            self.on_incoming_block(None, Arc::new(block)).await;
            imported += 1;
        }
        Ok(json!({ "imported_blocks": imported, "height": self.chain().height() }))
    }

    /// Wipe the chain back to genesis and clear the mempool.
    pub fn reset(&self) -> Result<Value, NodeError> {
        self.inner.mempool.clear();

        let chain = self.chain();
        let height = chain.height();
        // Drop every non-genesis block, then rebuild from the store.
        for cursor in (1..=height).rev() {
            if let Some(block) = self.inner.blocks_store.get_by_height(cursor)? {
                self.inner.blocks_store.delete(&block.hash())?;
            }
            self.inner.blocks_store.unindex_height(cursor)?;
        }
        self.reload_chain()?;
        info!("chain reset to genesis");
        Ok(json!({ "height": self.chain().height() }))
    }

    /// Copy both stores to a backup directory.
    pub fn backup(&self, path: &Path) -> Result<Value, NodeError> {
        std::fs::create_dir_all(path).map_err(NodeError::Network)?;
        self.inner.blocks_store.backup(&path.join("blocks"))?;
        self.inner.state_store.backup(&path.join("state.json"))?;
        Ok(json!({ "backup": path.display().to_string() }))
    }

    /// Replace both stores from a backup directory and replay.
    pub fn restore(&self, path: &Path) -> Result<Value, NodeError> {
        self.inner.mempool.clear();
        self.inner.blocks_store.restore(&path.join("blocks"))?;
        self.inner.state_store.restore(&path.join("state.json"))?;
        self.reload_chain()?;
        Ok(json!({ "height": self.chain().height() }))
    }

    /// Rebuild the chain manager from the stores, replaying from genesis.
    fn reload_chain(&self) -> Result<(), NodeError> {
        let rebuilt = Arc::new(ChainManager::init(
            self.inner.config.chain.clone(),
            self.inner.blocks_store.clone(),
            self.inner.state_store.clone(),
            Arc::new(NullRuntime),
        )?);
        *self.inner.chain.write().unwrap() = rebuilt;
        self.bump_work();
        Ok(())
    }
}

fn block_summary(block: &Block) -> Value {
    json!({
        "height": block.height(),
        "hash": block.hash().to_string(),
        "previous": block.header.previous_block_hash.to_string(),
        "time": block.header.time,
        "difficulty": block.header.difficulty,
        "transactions": block.transactions.len(),
    })
}

fn parse_block_hash(raw: &str) -> Result<ember_chain::block::Hash, NodeError> {
    raw.parse()
        .map_err(|_| NodeError::InvalidArgument(format!("bad block hash {}", raw)))
}

fn parse_address(raw: &str) -> Result<Address, NodeError> {
    raw.parse()
        .map_err(|_| NodeError::InvalidArgument(format!("bad address {}", raw)))
}
