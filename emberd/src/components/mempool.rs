//! The transaction pool.
//!
//! Admission runs the stateless checks and resolves every input against
//! the chain's UTXO view: unknown inputs are rejected outright, and a
//! second spend of an outpoint already claimed by a pooled transaction is
//! a conflict. Selection is deterministic: fee density descending, ties
//! broken by arrival order and then transaction id.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use ember_chain::transaction::{self, Transaction};
use ember_chain::transparent::{OutPoint, Output};
use ember_consensus::error::TransactionError;
use ember_consensus::transaction::check as tx_check;

use std::sync::Arc;

/// Where admission looks up unspent outputs: the chain manager's UTXO set.
pub trait UtxoSource {
    fn utxo(&self, outpoint: &OutPoint) -> Option<Output>;
}

impl UtxoSource for ember_consensus::ChainManager {
    fn utxo(&self, outpoint: &OutPoint) -> Option<Output> {
        ember_consensus::ChainManager::utxo(self, outpoint)
            .ok()
            .flatten()
    }
}

/// Why a transaction was refused admission.
#[derive(Error, Debug)]
pub enum MempoolError {
    #[error("transaction {0} is already pooled")]
    Duplicate(transaction::Hash),

    #[error("input references unknown output {0:?}")]
    UnknownInput(OutPoint),

    #[error("output {0:?} is already spent by a pooled transaction")]
    Conflict(OutPoint),

    #[error("coinbase transactions cannot be pooled")]
    Coinbase,

    #[error("invalid transaction: {0}")]
    Invalid(#[from] TransactionError),

    #[error("the pool is full and the fee does not displace anything")]
    Full,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MempoolConfig {
    /// Upper bound on pooled transactions.
    pub capacity: usize,
    /// Entries older than this are expired by the maintenance loop.
    pub max_age_secs: u64,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        MempoolConfig {
            capacity: 5_000,
            max_age_secs: 3 * 60 * 60,
        }
    }
}

struct Entry {
    tx: Arc<Transaction>,
    fee: u64,
    size: usize,
    arrival_seq: u64,
    arrival: Instant,
}

impl Entry {
    /// Compare fee densities without floating point:
    /// `a.fee/a.size > b.fee/b.size  ⇔  a.fee·b.size > b.fee·a.size`.
    fn denser_than(&self, other: &Entry) -> std::cmp::Ordering {
        let lhs = self.fee as u128 * other.size as u128;
        let rhs = other.fee as u128 * self.size as u128;
        lhs.cmp(&rhs)
    }
}

#[derive(Default)]
struct Inner {
    entries: HashMap<transaction::Hash, Entry>,
    /// Outpoints claimed by pooled transactions, for conflict detection.
    by_outpoint: HashMap<OutPoint, transaction::Hash>,
    next_seq: u64,
}

/// The mempool. All operations are atomic under one mutex; `select`
/// observes a consistent snapshot without blocking concurrent inserts for
/// longer than its critical section.
pub struct Mempool {
    inner: Mutex<Inner>,
    config: MempoolConfig,
}

impl Mempool {
    pub fn new(config: MempoolConfig) -> Mempool {
        Mempool {
            inner: Mutex::new(Inner::default()),
            config,
        }
    }

    /// Admit a transaction. Returns its fee.
    pub fn insert(
        &self,
        tx: Arc<Transaction>,
        view: &dyn UtxoSource,
    ) -> Result<u64, MempoolError> {
        if tx.is_coinbase() {
            return Err(MempoolError::Coinbase);
        }
        tx_check::stateless_checks(&tx)?;

        let id = tx.hash();
        let mut inner = self.inner.lock().unwrap();
        if inner.entries.contains_key(&id) {
            return Err(MempoolError::Duplicate(id));
        }

        // Resolve inputs against the chain UTXO set; a double spend of a
        // pooled outpoint is a conflict, an unresolvable one is unknown.
        let mut input_total: u64 = 0;
        for input in tx.inputs.iter() {
            let outpoint = input.previous_output;
            if inner.by_outpoint.contains_key(&outpoint) {
                return Err(MempoolError::Conflict(outpoint));
            }
            let output = view
                .utxo(&outpoint)
                .ok_or(MempoolError::UnknownInput(outpoint))?;
            input_total = input_total
                .checked_add(output.value)
                .ok_or(TransactionError::ValueOverflow)?;
        }
        let output_total = tx
            .total_output_value()
            .ok_or(TransactionError::ValueOverflow)?;
        if input_total < output_total {
            return Err(TransactionError::InsufficientInputValue {
                inputs: input_total,
                outputs: output_total,
            }
            .into());
        }
        let fee = input_total - output_total;

        let entry = Entry {
            size: tx.len(),
            tx: tx.clone(),
            fee,
            arrival_seq: inner.next_seq,
            arrival: Instant::now(),
        };

        // Capacity pressure evicts the worst entry, but only for a better
        // one.
        if inner.entries.len() >= self.config.capacity {
            let displaced = inner
                .entries
                .iter()
                .min_by(|(a_id, a), (b_id, b)| {
                    a.denser_than(b)
                        .then(b.arrival_seq.cmp(&a.arrival_seq))
                        .then(b_id.0.cmp(&a_id.0))
                })
                .filter(|(_, worst)| entry.denser_than(worst) == std::cmp::Ordering::Greater)
                .map(|(id, _)| *id);
            match displaced {
                Some(worst_id) => {
                    Self::evict(&mut inner, &worst_id);
                    debug!(%worst_id, "evicted lowest fee density entry under pressure");
                }
                None => return Err(MempoolError::Full),
            }
        }

        inner.next_seq += 1;
        for input in tx.inputs.iter() {
            inner.by_outpoint.insert(input.previous_output, id);
        }
        inner.entries.insert(id, entry);
        metrics::gauge!("mempool.size", inner.entries.len() as _);
        trace!(%id, fee, "transaction admitted to mempool");
        Ok(fee)
    }

    fn evict(inner: &mut Inner, id: &transaction::Hash) -> Option<Arc<Transaction>> {
        let entry = inner.entries.remove(id)?;
        for input in entry.tx.inputs.iter() {
            inner.by_outpoint.remove(&input.previous_output);
        }
        Some(entry.tx)
    }

    pub fn remove(&self, id: &transaction::Hash) -> Option<Arc<Transaction>> {
        let mut inner = self.inner.lock().unwrap();
        let removed = Self::evict(&mut inner, id);
        metrics::gauge!("mempool.size", inner.entries.len() as _);
        removed
    }

    pub fn contains(&self, id: &transaction::Hash) -> bool {
        self.inner.lock().unwrap().entries.contains_key(id)
    }

    pub fn get(&self, id: &transaction::Hash) -> Option<Arc<Transaction>> {
        self.inner
            .lock()
            .unwrap()
            .entries
            .get(id)
            .map(|entry| entry.tx.clone())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.clear();
        inner.by_outpoint.clear();
        metrics::gauge!("mempool.size", 0.0);
    }

    /// Select up to `max` transactions for block assembly, with their fees.
    pub fn select(&self, max: usize) -> Vec<(Arc<Transaction>, u64)> {
        let inner = self.inner.lock().unwrap();
        let mut candidates: Vec<(&transaction::Hash, &Entry)> = inner.entries.iter().collect();
        candidates.sort_by(|(a_id, a), (b_id, b)| {
            b.denser_than(a)
                .then(a.arrival_seq.cmp(&b.arrival_seq))
                .then(a_id.0.cmp(&b_id.0))
        });
        candidates
            .into_iter()
            .take(max)
            .map(|(_, entry)| (entry.tx.clone(), entry.fee))
            .collect()
    }

    /// Drop every transaction included in an accepted block.
    pub fn remove_included(&self, ids: impl IntoIterator<Item = transaction::Hash>) {
        let mut inner = self.inner.lock().unwrap();
        for id in ids {
            Self::evict(&mut inner, &id);
        }
        metrics::gauge!("mempool.size", inner.entries.len() as _);
    }

    /// Offer transactions rolled back by a reorganization. Invalid ones
    /// are dropped silently; still-valid ones re-enter the pool. Returns
    /// the number re-admitted.
    pub fn readmit(
        &self,
        txs: impl IntoIterator<Item = Arc<Transaction>>,
        view: &dyn UtxoSource,
    ) -> usize {
        let mut admitted = 0;
        for tx in txs {
            match self.insert(tx, view) {
                Ok(_) => admitted += 1,
                Err(err) => trace!(%err, "dropping rolled-back transaction"),
            }
        }
        admitted
    }

    /// Expire entries older than the configured age.
    pub fn expire(&self) -> usize {
        let max_age = Duration::from_secs(self.config.max_age_secs);
        let mut inner = self.inner.lock().unwrap();
        let stale: Vec<transaction::Hash> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.arrival.elapsed() > max_age)
            .map(|(id, _)| *id)
            .collect();
        for id in stale.iter() {
            Self::evict(&mut inner, id);
        }
        if !stale.is_empty() {
            debug!(count = stale.len(), "expired stale mempool entries");
            metrics::gauge!("mempool.size", inner.entries.len() as _);
        }
        stale.len()
    }
}
