//! The chain manager: the tree of known blocks, fork choice over total
//! work, state application with undo records, and reorganization.
//!
//! Block acceptance is serialized under a single writer lock, so at any
//! instant exactly one thread mutates the chain state. The manager stores
//! block bodies through a [`BlockStore`] and account/UTXO state through a
//! [`StateStore`]; every block application runs inside one staged state
//! transaction, and reorganizations additionally take a full snapshot so a
//! failure midway restores the pre-reorg state.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info, warn};

use ember_chain::block::{self, Block};
use ember_chain::parameters::{genesis, NetworkParameters};
use ember_chain::transaction::Transaction;
use ember_chain::transparent::{Address, OutPoint, Output};
use ember_chain::work;
use ember_state::{BlockStore, HashOrHeight, MemoryStateStore, StateStore};

use crate::block::check;
use crate::difficulty;
use crate::error::{BlockError, ChainError, TransactionError};
use crate::vm::ContractRuntime;

/// Gas handed to each contract call by the block application path.
const CONTRACT_GAS_LIMIT: u64 = 1_000_000;

/// The timestamp window consulted by the median-time rule.
const MEDIAN_TIME_SPAN: usize = 11;

/// How the chain manager classified a newly submitted block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockOutcome {
    /// The block extended the active chain.
    Accepted { height: u64 },
    /// The block was already known; state is unchanged.
    AlreadyKnown,
    /// The block's parent is unknown; it is parked until the parent
    /// arrives.
    Orphaned,
    /// The block extends a branch that is not heavier than the active
    /// chain.
    SideChain,
    /// The block made a branch heavier than the active chain, which was
    /// reorganized onto it.
    Reorganized { depth: u64 },
}

/// A read-only summary of the active chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainStateSummary {
    pub height: u64,
    pub best_block_id: block::Hash,
    pub total_work: u128,
    pub genesis_id: block::Hash,
}

/// What must be undone to roll one applied block back out of the state:
/// the UTXO entries its transactions consumed. Created outputs are
/// recomputed from the block itself.
#[derive(Clone, Debug, Default)]
struct UndoRecord {
    spent: Vec<(OutPoint, Output)>,
}

/// Metadata for one known block. Bodies live in the block store; indices
/// hold hashes, not references.
#[derive(Clone, Debug)]
struct BlockEntry {
    parent: block::Hash,
    height: u64,
    difficulty: u32,
    time: u64,
    /// Sum of difficulties from genesis through this block.
    cumulative_work: u128,
    /// Present only while the block is on the active chain.
    undo: Option<UndoRecord>,
}

struct ChainInner {
    entries: HashMap<block::Hash, BlockEntry>,
    /// Height to hash, for the active chain only.
    active: HashMap<u64, block::Hash>,
    /// Parked blocks whose parent is unknown, keyed by the parent hash.
    orphans: HashMap<block::Hash, Vec<Block>>,
    tip: block::Hash,
    height: u64,
    total_work: u128,
    genesis: block::Hash,
    snapshot_counter: u64,
}

impl ChainInner {
    fn new(genesis: block::Hash) -> ChainInner {
        ChainInner {
            entries: HashMap::new(),
            active: HashMap::new(),
            orphans: HashMap::new(),
            tip: block::Hash::ZERO,
            height: 0,
            total_work: 0,
            genesis,
            snapshot_counter: 0,
        }
    }
}

impl ChainInner {
    fn is_active_hash(&self, hash: &block::Hash) -> bool {
        self.entries
            .get(hash)
            .map(|entry| self.active.get(&entry.height) == Some(hash))
            .unwrap_or(false)
    }

    fn insert_active(&mut self, hash: block::Hash, block: &Block, undo: UndoRecord) {
        let parent = block.header.previous_block_hash;
        let parent_work = self
            .entries
            .get(&parent)
            .map(|entry| entry.cumulative_work)
            .unwrap_or(0);
        let cumulative_work = parent_work + work::block_work(block.header.difficulty);
        self.entries.insert(
            hash,
            BlockEntry {
                parent,
                height: block.height(),
                difficulty: block.header.difficulty,
                time: block.header.time,
                cumulative_work,
                undo: Some(undo),
            },
        );
        self.active.insert(block.height(), hash);
        self.tip = hash;
        self.height = block.height();
        self.total_work = cumulative_work;
    }

    fn insert_side(&mut self, hash: block::Hash, block: &Block) {
        let parent = block.header.previous_block_hash;
        let parent_work = self
            .entries
            .get(&parent)
            .map(|entry| entry.cumulative_work)
            .unwrap_or(0);
        self.entries.insert(
            hash,
            BlockEntry {
                parent,
                height: block.height(),
                difficulty: block.header.difficulty,
                time: block.header.time,
                cumulative_work: parent_work + work::block_work(block.header.difficulty),
                undo: None,
            },
        );
    }

    /// Timestamps of up to `span` ancestors starting at `from` (inclusive),
    /// walking parent links.
    fn ancestor_times(&self, from: &block::Hash, span: usize) -> Vec<u64> {
        let mut times = Vec::with_capacity(span);
        let mut cursor = *from;
        while times.len() < span {
            match self.entries.get(&cursor) {
                Some(entry) => {
                    times.push(entry.time);
                    cursor = entry.parent;
                }
                None => break,
            }
        }
        times
    }

    fn next_snapshot_id(&mut self) -> u64 {
        self.snapshot_counter += 1;
        self.snapshot_counter
    }
}

/// The chain manager. See the module docs.
pub struct ChainManager {
    params: NetworkParameters,
    blocks: Arc<dyn BlockStore>,
    state: Arc<dyn StateStore>,
    vm: Arc<dyn ContractRuntime>,
    inner: RwLock<ChainInner>,
    /// Transactions rolled out of the active chain by the latest
    /// reorganizations, awaiting mempool re-admission.
    reclaimed: Mutex<Vec<Arc<Transaction>>>,
}

impl ChainManager {
    /// Construct the chain manager, creating the genesis block in empty
    /// stores or replaying the stored active chain into the state store.
    pub fn init(
        params: NetworkParameters,
        blocks: Arc<dyn BlockStore>,
        state: Arc<dyn StateStore>,
        vm: Arc<dyn ContractRuntime>,
    ) -> Result<ChainManager, ChainError> {
        let genesis_block = genesis::genesis_block(&params);
        let manager = ChainManager {
            params,
            blocks,
            state,
            vm,
            inner: RwLock::new(ChainInner::new(genesis_block.hash())),
            reclaimed: Mutex::new(Vec::new()),
        };

        let stored_tip = manager.blocks.tip()?;
        match stored_tip {
            None => {
                info!(genesis = %genesis_block.hash(), "initializing empty chain");
                manager.bootstrap(&genesis_block)?;
            }
            Some((height, _)) => {
                info!(height, "replaying stored chain");
                manager.replay_from_store(&genesis_block, height)?;
            }
        }
        Ok(manager)
    }

    pub fn parameters(&self) -> &NetworkParameters {
        &self.params
    }

    fn bootstrap(&self, genesis_block: &Block) -> Result<(), ChainError> {
        let mut inner = self.inner.write().unwrap();
        self.state.clear()?;
        check::block_is_structurally_valid(genesis_block, self.params.max_block_bytes)?;
        self.state.begin()?;
        let undo = match self.apply_transactions(genesis_block) {
            Ok(undo) => {
                self.state.commit()?;
                undo
            }
            Err(err) => {
                let _ = self.state.rollback();
                return Err(err);
            }
        };
        self.blocks.put(genesis_block)?;
        inner.insert_active(genesis_block.hash(), genesis_block, undo);
        self.persist_summary(&inner)?;
        Ok(())
    }

    fn replay_from_store(&self, genesis_block: &Block, tip_height: u64) -> Result<(), ChainError> {
        let stored_genesis = self
            .blocks
            .get_by_height(0)?
            .ok_or_else(|| ChainError::ReplayMismatch {
                height: 0,
                reason: "no stored genesis block".into(),
            })?;
        if stored_genesis.hash() != genesis_block.hash() {
            return Err(ChainError::ConflictingGenesis(stored_genesis.hash()));
        }

        {
            let mut inner = self.inner.write().unwrap();
            self.state.clear()?;
            self.state.begin()?;
            let undo = match self.apply_transactions(&stored_genesis) {
                Ok(undo) => {
                    self.state.commit()?;
                    undo
                }
                Err(err) => {
                    let _ = self.state.rollback();
                    return Err(err);
                }
            };
            inner.insert_active(stored_genesis.hash(), &stored_genesis, undo);
        }

        for height in 1..=tip_height {
            let stored =
                self.blocks
                    .get_by_height(height)?
                    .ok_or_else(|| ChainError::ReplayMismatch {
                        height,
                        reason: "height index gap".into(),
                    })?;
            match self.commit_block(stored)? {
                BlockOutcome::Accepted { .. } => {}
                other => {
                    return Err(ChainError::ReplayMismatch {
                        height,
                        reason: format!("replayed block classified as {:?}", other),
                    })
                }
            }
        }
        Ok(())
    }

    /// Submit a block for acceptance. See [`BlockOutcome`] for the
    /// classification; errors describe consensus violations (attributable
    /// to the block's sender) or storage failures.
    pub fn commit_block(&self, block: Block) -> Result<BlockOutcome, ChainError> {
        let mut inner = self.inner.write().unwrap();
        let outcome = self.try_accept(&mut inner, block)?;

        // Whenever acceptance advanced the chain, parked descendants may
        // now connect.
        if let BlockOutcome::Accepted { .. } | BlockOutcome::Reorganized { .. } = outcome {
            self.flush_orphans(&mut inner);
        }
        Ok(outcome)
    }

    fn try_accept(&self, inner: &mut ChainInner, block: Block) -> Result<BlockOutcome, ChainError> {
        let hash = block.hash();
        if inner.entries.contains_key(&hash) {
            return Ok(BlockOutcome::AlreadyKnown);
        }

        check::block_is_structurally_valid(&block, self.params.max_block_bytes)?;

        let parent_hash = block.header.previous_block_hash;
        if parent_hash.is_zero() {
            // Only the configured genesis block may claim a zero parent,
            // and it is always already known after init.
            return Err(ChainError::ConflictingGenesis(hash));
        }

        let parent = match inner.entries.get(&parent_hash) {
            Some(parent) => parent.clone(),
            None => {
                debug!(%hash, parent = %parent_hash, "parking orphan block");
                inner.orphans.entry(parent_hash).or_default().push(block);
                metrics::gauge!(
                    "chain.orphan.count",
                    inner.orphans.values().map(Vec::len).sum::<usize>() as _
                );
                return Ok(BlockOutcome::Orphaned);
            }
        };

        self.contextual_validate(inner, &block, &parent)?;

        let candidate_work =
            parent.cumulative_work + work::block_work(block.header.difficulty);

        if parent_hash == inner.tip {
            self.state.begin()?;
            let undo = match self.apply_transactions(&block) {
                Ok(undo) => {
                    self.state.commit()?;
                    undo
                }
                Err(err) => {
                    let _ = self.state.rollback();
                    return Err(err);
                }
            };
            self.blocks.put(&block)?;
            inner.insert_active(hash, &block, undo);
            self.persist_summary(inner)?;
            metrics::counter!("chain.committed.block.count", 1);
            metrics::gauge!("chain.committed.block.height", block.height() as _);
            info!(height = block.height(), %hash, "block accepted");
            return Ok(BlockOutcome::Accepted {
                height: block.height(),
            });
        }

        // A branch. Record the block either way; promote the branch only
        // if it is strictly heavier. Ties keep the first-seen tip.
        self.blocks.put_body(&block)?;
        if candidate_work > inner.total_work {
            let depth = self.reorganize(inner, block)?;
            return Ok(BlockOutcome::Reorganized { depth });
        }
        inner.insert_side(hash, &block);
        debug!(%hash, height = block.height(), "recorded side-chain block");
        Ok(BlockOutcome::SideChain)
    }

    fn contextual_validate(
        &self,
        inner: &ChainInner,
        block: &Block,
        parent: &BlockEntry,
    ) -> Result<(), ChainError> {
        if block.height() != parent.height + 1 {
            return Err(BlockError::UnexpectedHeight {
                parent: parent.height,
                found: block.height(),
            }
            .into());
        }

        let expected = self.expected_difficulty(inner, parent, block.height());
        if block.header.difficulty != expected {
            return Err(BlockError::UnexpectedDifficulty {
                expected,
                found: block.header.difficulty,
            }
            .into());
        }

        check::difficulty_filter(block)?;

        let times = inner.ancestor_times(&block.header.previous_block_hash, MEDIAN_TIME_SPAN);
        check::time_is_after_median(&block.header, &times)?;
        Ok(())
    }

    /// The difficulty expected of a block at `candidate_height` whose
    /// parent is `parent`, following the candidate's own branch for
    /// retarget windows.
    fn expected_difficulty(
        &self,
        inner: &ChainInner,
        parent: &BlockEntry,
        candidate_height: u64,
    ) -> u32 {
        let interval = self.params.retarget_interval;
        if candidate_height % interval != 0 {
            return parent.difficulty;
        }
        // Walk back to the first block of the finished interval: from the
        // parent at height H-1 down to the block at height H-interval.
        let mut cursor_hash = parent.parent;
        let mut first_time = parent.time;
        for _ in 0..interval.saturating_sub(1) {
            match inner.entries.get(&cursor_hash) {
                Some(entry) => {
                    first_time = entry.time;
                    cursor_hash = entry.parent;
                }
                None => break,
            }
        }
        difficulty::next_difficulty(
            &self.params,
            candidate_height,
            parent.difficulty,
            Some((first_time, parent.time)),
        )
    }

    fn flush_orphans(&self, inner: &mut ChainInner) {
        let mut queue: Vec<block::Hash> = inner.orphans.keys().copied().collect();
        while let Some(parent_hash) = queue.pop() {
            if !inner.entries.contains_key(&parent_hash) {
                continue;
            }
            let children = match inner.orphans.remove(&parent_hash) {
                Some(children) => children,
                None => continue,
            };
            for child in children {
                let child_hash = child.hash();
                match self.try_accept(inner, child) {
                    Ok(outcome) => {
                        debug!(%child_hash, ?outcome, "unparked orphan block");
                        // The child may itself have parked descendants.
                        queue.push(child_hash);
                    }
                    Err(err) => {
                        warn!(%child_hash, %err, "dropping invalid orphan block");
                    }
                }
            }
        }
    }

    /// Replace the active suffix with the heavier branch ending in
    /// `candidate`. On any failure the state snapshot taken first is
    /// restored and the candidate is rejected.
    fn reorganize(&self, inner: &mut ChainInner, candidate: Block) -> Result<u64, ChainError> {
        let candidate_hash = candidate.hash();

        // Collect the branch back to the fork point with the active chain.
        let mut branch: Vec<Block> = vec![candidate];
        let mut cursor = branch[0].header.previous_block_hash;
        while !inner.is_active_hash(&cursor) {
            let block = self
                .blocks
                .get_by_hash(&cursor)?
                .ok_or(ChainError::UnknownBlock(cursor))?;
            cursor = block.header.previous_block_hash;
            branch.push(block);
        }
        branch.reverse();
        let ancestor_hash = cursor;
        let ancestor_height = inner
            .entries
            .get(&ancestor_hash)
            .map(|entry| entry.height)
            .ok_or(ChainError::UnknownBlock(ancestor_hash))?;
        let old_height = inner.height;
        let depth = old_height - ancestor_height;

        info!(
            %candidate_hash,
            fork = %ancestor_hash,
            depth,
            "reorganizing onto heavier branch"
        );

        let snapshot_id = inner.next_snapshot_id();
        self.state.snapshot(snapshot_id)?;
        self.state.begin()?;

        let mut reclaimed: Vec<Arc<Transaction>> = Vec::new();
        let result = (|| -> Result<Vec<UndoRecord>, ChainError> {
            // Roll the active suffix back, newest first.
            for height in ((ancestor_height + 1)..=old_height).rev() {
                let hash = *inner
                    .active
                    .get(&height)
                    .ok_or_else(|| ChainError::ReorgFailed(format!(
                        "missing active block at height {}",
                        height
                    )))?;
                let block = self
                    .blocks
                    .get_by_hash(&hash)?
                    .ok_or(ChainError::UnknownBlock(hash))?;
                let undo = inner
                    .entries
                    .get(&hash)
                    .and_then(|entry| entry.undo.clone())
                    .ok_or_else(|| {
                        ChainError::ReorgFailed(format!("missing undo data for {}", hash))
                    })?;
                self.revert_transactions(&block, &undo)?;
                reclaimed.extend(
                    block
                        .transactions
                        .iter()
                        .filter(|tx| !tx.is_coinbase())
                        .cloned(),
                );
            }
            // Apply the new branch, oldest first.
            let mut undos = Vec::with_capacity(branch.len());
            for block in branch.iter() {
                undos.push(self.apply_transactions(block)?);
            }
            Ok(undos)
        })();

        let undos = match result {
            Ok(undos) => {
                self.state.commit()?;
                let _ = self.state.delete_snapshot(snapshot_id);
                undos
            }
            Err(err) => {
                let _ = self.state.rollback();
                self.state.restore_snapshot(snapshot_id)?;
                let _ = self.state.delete_snapshot(snapshot_id);
                warn!(%err, "reorganization failed, state restored");
                return Err(ChainError::ReorgFailed(err.to_string()));
            }
        };

        // Demote the rolled-back suffix.
        for height in (ancestor_height + 1)..=old_height {
            if let Some(hash) = inner.active.remove(&height) {
                if let Some(entry) = inner.entries.get_mut(&hash) {
                    entry.undo = None;
                }
            }
            self.blocks.unindex_height(height)?;
        }
        // Promote the branch.
        for (block, undo) in branch.iter().zip(undos) {
            self.blocks.put(block)?;
            inner.insert_active(block.hash(), block, undo);
        }
        self.persist_summary(inner)?;
        self.reclaimed.lock().unwrap().extend(reclaimed);
        metrics::counter!("chain.reorg.count", 1);
        metrics::gauge!("chain.committed.block.height", inner.height as _);
        Ok(depth)
    }

    /// Apply every transaction of `block` to the state store, which must
    /// have a staged transaction open. Returns the undo record.
    fn apply_transactions(&self, block: &Block) -> Result<UndoRecord, ChainError> {
        let network = self.params.network;
        let mut undo = UndoRecord::default();
        let mut spent: HashSet<OutPoint> = HashSet::new();
        let mut total_fees: u64 = 0;

        for tx in block.transactions.iter() {
            let txid = tx.hash();
            if tx.is_coinbase() {
                if tx.inputs[0].coinbase_height() != Some(block.height()) {
                    return Err(BlockError::Transaction(TransactionError::BadCoinbaseInput).into());
                }
            } else {
                if tx.lock_time != 0 && tx.lock_time as u64 > block.header.time {
                    return Err(BlockError::Transaction(TransactionError::Premature {
                        lock_time: tx.lock_time,
                        block_time: block.header.time,
                    })
                    .into());
                }
                let mut input_total: u64 = 0;
                for input in tx.inputs.iter() {
                    let outpoint = input.previous_output;
                    if !spent.insert(outpoint) {
                        return Err(
                            BlockError::Transaction(TransactionError::DuplicateSpend(outpoint))
                                .into(),
                        );
                    }
                    let output = self.state.get_utxo(&outpoint)?.ok_or_else(|| {
                        ChainError::Block(TransactionError::MissingUtxo(outpoint).into())
                    })?;
                    if Address::from_public_key(network, &input.public_key) != output.recipient {
                        return Err(
                            BlockError::Transaction(TransactionError::WrongOwner(outpoint)).into(),
                        );
                    }
                    input_total = input_total
                        .checked_add(output.value)
                        .ok_or(BlockError::Transaction(TransactionError::ValueOverflow))?;
                    self.state.remove_utxo(&outpoint)?;
                    self.debit(&output.recipient, output.value, block.header.time)?;
                    undo.spent.push((outpoint, output));
                }
                let output_total = tx
                    .total_output_value()
                    .ok_or(BlockError::Transaction(TransactionError::ValueOverflow))?;
                if input_total < output_total {
                    return Err(BlockError::Transaction(
                        TransactionError::InsufficientInputValue {
                            inputs: input_total,
                            outputs: output_total,
                        },
                    )
                    .into());
                }
                total_fees = total_fees
                    .checked_add(input_total - output_total)
                    .ok_or(BlockError::Transaction(TransactionError::ValueOverflow))?;
                // One nonce per transaction, charged to the first signer.
                if let Some(first) = tx.inputs.first() {
                    let sender = Address::from_public_key(network, &first.public_key);
                    self.state.increment_nonce(&sender)?;
                }
            }

            for output in tx.outputs.iter() {
                self.state.add_utxo(
                    OutPoint {
                        hash: txid,
                        index: output.index,
                    },
                    output.clone(),
                )?;
                self.credit(&output.recipient, output.value, block.header.time)?;
                if !output.script_pubkey.is_empty() {
                    let outcome = self
                        .vm
                        .execute(
                            &output.recipient,
                            output.script_pubkey.as_bytes(),
                            CONTRACT_GAS_LIMIT,
                            self.state.as_ref(),
                        )
                        .map_err(|err| ChainError::Contract(err.to_string()))?;
                    debug!(
                        contract = %output.recipient,
                        gas_used = outcome.gas_used,
                        events = outcome.events.len(),
                        "contract executed"
                    );
                }
            }
        }

        if let Some(coinbase) = block.coinbase() {
            let claimed = coinbase
                .total_output_value()
                .ok_or(BlockError::Transaction(TransactionError::ValueOverflow))?;
            let allowed = self.params.block_reward.saturating_add(total_fees);
            if claimed > allowed {
                return Err(BlockError::ExcessCoinbaseValue { claimed, allowed }.into());
            }
        }
        Ok(undo)
    }

    /// Undo one block's application. Inverse of [`Self::apply_transactions`].
    fn revert_transactions(&self, block: &Block, undo: &UndoRecord) -> Result<(), ChainError> {
        let network = self.params.network;
        for tx in block.transactions.iter().rev() {
            let txid = tx.hash();
            for output in tx.outputs.iter() {
                self.state.remove_utxo(&OutPoint {
                    hash: txid,
                    index: output.index,
                })?;
                self.debit(&output.recipient, output.value, block.header.time)?;
            }
            if !tx.is_coinbase() {
                if let Some(first) = tx.inputs.first() {
                    let sender = Address::from_public_key(network, &first.public_key);
                    let mut account = self.state.get_account(&sender)?.unwrap_or_default();
                    account.nonce = account.nonce.saturating_sub(1);
                    self.state.set_account(&sender, account)?;
                }
            }
        }
        for (outpoint, output) in undo.spent.iter() {
            self.state.add_utxo(*outpoint, output.clone())?;
            self.credit(&output.recipient, output.value, block.header.time)?;
        }
        Ok(())
    }

    fn credit(&self, address: &Address, value: u64, time: u64) -> Result<(), ChainError> {
        let mut account = self.state.get_account(address)?.unwrap_or_default();
        account.balance = account.balance.saturating_add(value);
        account.last_updated = time;
        self.state.set_account(address, account)?;
        Ok(())
    }

    fn debit(&self, address: &Address, value: u64, time: u64) -> Result<(), ChainError> {
        let mut account = self.state.get_account(address)?.unwrap_or_default();
        account.balance = account.balance.saturating_sub(value);
        account.last_updated = time;
        self.state.set_account(address, account)?;
        Ok(())
    }

    fn persist_summary(&self, inner: &ChainInner) -> Result<(), ChainError> {
        self.state.set_metadata("chain.height", &inner.height.to_string())?;
        self.state.set_metadata("chain.tip", &inner.tip.to_string())?;
        self.state
            .set_metadata("chain.total_work", &inner.total_work.to_string())?;
        self.state
            .set_metadata("chain.genesis", &inner.genesis.to_string())?;
        Ok(())
    }

    // ---- read queries ----

    pub fn summary(&self) -> ChainStateSummary {
        let inner = self.inner.read().unwrap();
        ChainStateSummary {
            height: inner.height,
            best_block_id: inner.tip,
            total_work: inner.total_work,
            genesis_id: inner.genesis,
        }
    }

    pub fn tip(&self) -> (u64, block::Hash) {
        let inner = self.inner.read().unwrap();
        (inner.height, inner.tip)
    }

    pub fn height(&self) -> u64 {
        self.inner.read().unwrap().height
    }

    pub fn total_work(&self) -> u128 {
        self.inner.read().unwrap().total_work
    }

    pub fn contains(&self, hash: &block::Hash) -> bool {
        self.inner.read().unwrap().entries.contains_key(hash)
    }

    pub fn block(&self, query: HashOrHeight) -> Result<Option<Block>, ChainError> {
        match query {
            HashOrHeight::Hash(hash) => Ok(self.blocks.get_by_hash(&hash)?),
            HashOrHeight::Height(height) => Ok(self.blocks.get_by_height(height)?),
        }
    }

    pub fn balance(&self, address: &Address) -> Result<u64, ChainError> {
        Ok(self.state.get_balance(address)?)
    }

    pub fn nonce(&self, address: &Address) -> Result<u64, ChainError> {
        Ok(self.state.get_nonce(address)?)
    }

    pub fn utxo(&self, outpoint: &OutPoint) -> Result<Option<Output>, ChainError> {
        Ok(self.state.get_utxo(outpoint)?)
    }

    pub fn utxos_of(&self, address: &Address) -> Result<Vec<(OutPoint, Output)>, ChainError> {
        Ok(self.state.utxos_for_address(address)?)
    }

    /// The difficulty required of the next block on the active chain.
    pub fn next_difficulty(&self) -> u32 {
        let inner = self.inner.read().unwrap();
        match inner.entries.get(&inner.tip) {
            Some(tip) => self.expected_difficulty(&inner, tip, inner.height + 1),
            None => self.params.initial_difficulty,
        }
    }

    /// The median of the active tip's recent timestamps; a valid next
    /// block must carry a strictly greater time.
    pub fn median_time_past(&self) -> u64 {
        let inner = self.inner.read().unwrap();
        let times = inner.ancestor_times(&inner.tip, MEDIAN_TIME_SPAN);
        check::median_time(&times)
    }

    /// Take the transactions returned to circulation by recent
    /// reorganizations.
    pub fn drain_reclaimed(&self) -> Vec<Arc<Transaction>> {
        std::mem::take(&mut *self.reclaimed.lock().unwrap())
    }

    /// Structurally revalidate one stored block.
    pub fn replay_block(&self, hash: &block::Hash) -> Result<(), ChainError> {
        let block = self
            .blocks
            .get_by_hash(hash)?
            .ok_or(ChainError::UnknownBlock(*hash))?;
        check::block_is_structurally_valid(&block, self.params.max_block_bytes)?;
        Ok(())
    }

    /// Replay the whole active chain from genesis into a scratch state,
    /// revalidating every block. Returns the verified height.
    pub fn verify_chain(&self) -> Result<u64, ChainError> {
        let expected = self.summary();
        let scratch = ChainManager::init(
            self.params.clone(),
            self.blocks.clone(),
            Arc::new(MemoryStateStore::new()),
            self.vm.clone(),
        )?;
        let replayed = scratch.summary();
        if replayed != expected {
            return Err(ChainError::ReplayMismatch {
                height: replayed.height,
                reason: format!(
                    "replayed tip {} does not match live tip {}",
                    replayed.best_block_id, expected.best_block_id
                ),
            });
        }
        Ok(replayed.height)
    }
}
