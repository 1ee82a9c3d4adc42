//! The node runtime: constructs and wires every subsystem, owns the
//! lifecycle, and routes peer events into the chain manager and mempool.
//!
//! Workers are named tokio tasks sharing one shutdown watch flag. `stop`
//! flips the flag, then joins each worker under the configured grace
//! period and detaches (with a log line) any that fail to exit in time.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tracing::{debug, error, info, warn};

use ember_chain::block::Block;
use ember_chain::crypto::KeyPair;
use ember_chain::parameters::Network;
use ember_chain::transaction::Transaction;
use ember_chain::transparent::Address;
use ember_consensus::{BlockOutcome, ChainManager, NullRuntime};
use ember_network::auth::AuthSessions;
use ember_network::constants::REPUTATION_DECAY_INTERVAL;
use ember_network::peer::connection::{Connection, PeerEvent, PeerEventKind};
use ember_network::protocol::inv::InventoryHash;
use ember_network::protocol::message::Message;
use ember_network::{AddressBook, PeerBehavior};
use ember_state::{BlockStore, StateStore};
use ember_wallet::Wallet;

use crate::components::mempool::{Mempool, MempoolError};
use crate::components::miner::Miner;
use crate::config::EmberdConfig;
use crate::error::NodeError;

/// How often the reconnect worker scans for candidates.
const RECONNECT_SCAN_INTERVAL: Duration = Duration::from_secs(5);

/// How often the mempool maintenance loop runs.
const MEMPOOL_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock set before the unix epoch")
        .as_secs()
}

pub(crate) struct PeerHandle {
    outbound: mpsc::Sender<Message>,
}

pub(crate) struct NodeInner {
    pub(crate) config: EmberdConfig,
    pub(crate) chain: StdRwLock<Arc<ChainManager>>,
    pub(crate) mempool: Arc<Mempool>,
    pub(crate) wallet: StdMutex<Wallet>,
    pub(crate) address_book: StdMutex<AddressBook>,
    pub(crate) auth_sessions: StdMutex<AuthSessions>,
    pub(crate) peers: StdMutex<HashMap<SocketAddr, PeerHandle>>,
    pub(crate) blocks_store: Arc<dyn BlockStore>,
    pub(crate) state_store: Arc<dyn StateStore>,
    identity: Arc<KeyPair>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    work_counter: AtomicU64,
    work_tx: watch::Sender<u64>,
    work_rx: watch::Receiver<u64>,
    events_tx: mpsc::Sender<PeerEvent>,
    events_rx: StdMutex<Option<mpsc::Receiver<PeerEvent>>>,
    workers: StdMutex<Vec<(String, JoinHandle<()>)>>,
    pub(crate) mining: AtomicBool,
    running: AtomicBool,
    local_listen: StdMutex<Option<SocketAddr>>,
}

/// A handle on the node runtime. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct Node {
    pub(crate) inner: Arc<NodeInner>,
}

impl Node {
    /// Construct every subsystem from the configuration. No workers run
    /// until [`Node::start`].
    pub fn init(mut config: EmberdConfig) -> Result<Node, NodeError> {
        // The chain parameters are authoritative for the network identity.
        config.network.network = config.chain.network;
        let network = config.chain.network;

        let (blocks_store, state_store) = open_stores(&config, network)?;
        let chain = Arc::new(ChainManager::init(
            config.chain.clone(),
            blocks_store.clone(),
            state_store.clone(),
            Arc::new(NullRuntime),
        )?);

        let wallet = match &config.wallet_file {
            Some(path) => Wallet::open(path, network)?,
            None => Wallet::in_memory(network),
        };

        let mut address_book = match &config.network.peers_file {
            Some(path) => AddressBook::load(path)?,
            None => AddressBook::new(),
        };
        for addr in config.network.initial_peers.iter() {
            address_book.upsert(*addr).persistent = true;
        }

        let identity = Arc::new(load_identity(&config)?);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (work_tx, work_rx) = watch::channel(0u64);
        let (events_tx, events_rx) = mpsc::channel(1024);

        let mempool = Arc::new(Mempool::new(config.mempool.clone()));

        info!(
            network = network.name(),
            height = chain.height(),
            "node initialized"
        );

        Ok(Node {
            inner: Arc::new(NodeInner {
                config,
                chain: StdRwLock::new(chain),
                mempool,
                wallet: StdMutex::new(wallet),
                address_book: StdMutex::new(address_book),
                auth_sessions: StdMutex::new(AuthSessions::new()),
                peers: StdMutex::new(HashMap::new()),
                blocks_store,
                state_store,
                identity,
                shutdown_tx,
                shutdown_rx,
                work_counter: AtomicU64::new(0),
                work_tx,
                work_rx,
                events_tx,
                events_rx: StdMutex::new(Some(events_rx)),
                workers: StdMutex::new(Vec::new()),
                mining: AtomicBool::new(false),
                running: AtomicBool::new(false),
                local_listen: StdMutex::new(None),
            }),
        })
    }

    /// The actual listening address, once started.
    pub fn local_listen_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_listen.lock().unwrap()
    }

    pub fn chain(&self) -> Arc<ChainManager> {
        self.inner.chain.read().unwrap().clone()
    }

    pub fn mempool(&self) -> &Arc<Mempool> {
        &self.inner.mempool
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Start every worker loop.
    pub async fn start(&self) -> Result<(), NodeError> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Err(NodeError::AlreadyRunning);
        }

        // Peer event router.
        let events_rx = self
            .inner
            .events_rx
            .lock()
            .unwrap()
            .take()
            .ok_or(NodeError::AlreadyRunning)?;
        {
            let node = self.clone();
            let mut shutdown = self.inner.shutdown_rx.clone();
            self.spawn_worker("peer-events", async move {
                let mut events_rx = events_rx;
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() { break; }
                        }
                        maybe = events_rx.recv() => match maybe {
                            Some(event) => node.handle_peer_event(event).await,
                            None => break,
                        },
                    }
                }
            });
        }

        // Inbound listener.
        let listener = TcpListener::bind(self.inner.config.network.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        *self.inner.local_listen.lock().unwrap() = Some(local_addr);
        info!(%local_addr, "listening for peers");
        {
            let node = self.clone();
            let mut shutdown = self.inner.shutdown_rx.clone();
            self.spawn_worker("listener", async move {
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() { break; }
                        }
                        accepted = listener.accept() => match accepted {
                            Ok((stream, remote)) => node.admit_inbound(stream, remote),
                            Err(err) => {
                                warn!(%err, "accept failed");
                            }
                        },
                    }
                }
            });
        }

        // Reconnection worker: one task, bounded by the candidate queue.
        {
            let node = self.clone();
            let mut shutdown = self.inner.shutdown_rx.clone();
            self.spawn_worker("reconnect", async move {
                let mut ticker = interval(RECONNECT_SCAN_INTERVAL);
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() { break; }
                        }
                        _ = ticker.tick() => node.reconnect_tick(),
                    }
                }
            });
        }

        // Reputation decay worker.
        {
            let node = self.clone();
            let mut shutdown = self.inner.shutdown_rx.clone();
            self.spawn_worker("reputation-decay", async move {
                let mut ticker = interval(REPUTATION_DECAY_INTERVAL);
                // The first tick fires immediately; skip it.
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() { break; }
                        }
                        _ = ticker.tick() => {
                            let now = unix_now();
                            let mut book = node.inner.address_book.lock().unwrap();
                            book.decay_tick(now);
                            if let Err(err) = book.save() {
                                warn!(%err, "failed to persist peer list");
                            }
                        }
                    }
                }
            });
        }

        // Mempool maintenance worker.
        {
            let node = self.clone();
            let mut shutdown = self.inner.shutdown_rx.clone();
            self.spawn_worker("mempool-maintenance", async move {
                let mut ticker = interval(MEMPOOL_MAINTENANCE_INTERVAL);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() { break; }
                        }
                        _ = ticker.tick() => {
                            node.inner.mempool.expire();
                        }
                    }
                }
            });
        }

        // Dial the configured peers right away.
        self.reconnect_tick();

        if self.inner.config.mining.enabled {
            self.start_miner()?;
        }
        Ok(())
    }

    /// Signal shutdown and join every worker under the grace deadline.
    pub async fn stop(&self) -> Result<(), NodeError> {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return Err(NodeError::NotRunning);
        }
        info!("shutting down");
        self.inner.mining.store(false, Ordering::SeqCst);
        let _ = self.inner.shutdown_tx.send(true);

        // Dropping the handles closes every outbound queue.
        self.inner.peers.lock().unwrap().clear();

        let grace = Duration::from_millis(self.inner.config.shutdown_grace_ms);
        let workers: Vec<(String, JoinHandle<()>)> =
            std::mem::take(&mut *self.inner.workers.lock().unwrap());
        for (name, handle) in workers {
            match timeout(grace, handle).await {
                Ok(Ok(())) => debug!(worker = %name, "worker stopped"),
                Ok(Err(err)) => warn!(worker = %name, %err, "worker panicked"),
                Err(_) => {
                    // The handle is dropped, detaching the task.
                    warn!(worker = %name, grace = ?grace, "worker missed the grace deadline, detaching");
                }
            }
        }

        if let Err(err) = self.inner.address_book.lock().unwrap().save() {
            warn!(%err, "failed to persist peer list on shutdown");
        }
        info!("node stopped");
        Ok(())
    }

    fn spawn_worker<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.inner
            .workers
            .lock()
            .unwrap()
            .push((name.to_string(), handle));
    }

    // ---- connection management ----

    fn admit_inbound(&self, stream: tokio::net::TcpStream, remote: SocketAddr) {
        let now = unix_now();
        {
            let book = self.inner.address_book.lock().unwrap();
            if !book.is_admissible(&remote, now) {
                debug!(%remote, "rejecting banned or blacklisted peer");
                return;
            }
        }
        let at_capacity = {
            let peers = self.inner.peers.lock().unwrap();
            peers.len() >= self.inner.config.network.max_connections
                || peers.contains_key(&remote)
        };
        if at_capacity {
            debug!(%remote, "rejecting connection at capacity");
            return;
        }
        self.attach_connection(remote, Some(stream));
    }

    /// Dial `addr` (or wrap an accepted stream) and spawn its session.
    pub(crate) fn attach_connection(
        &self,
        addr: SocketAddr,
        stream: Option<tokio::net::TcpStream>,
    ) {
        let (out_tx, out_rx) = mpsc::channel(64);
        {
            let mut peers = self.inner.peers.lock().unwrap();
            if peers.contains_key(&addr) {
                return;
            }
            peers.insert(addr, PeerHandle { outbound: out_tx });
        }
        self.inner
            .address_book
            .lock()
            .unwrap()
            .record_attempt(addr, unix_now());

        let node = self.clone();
        let network = self.inner.config.chain.network;
        let identity = self.inner.identity.clone();
        let challenge = self.inner.config.network.challenge_peers;
        let events = self.inner.events_tx.clone();
        let shutdown = self.inner.shutdown_rx.clone();
        tokio::spawn(async move {
            let connection = match stream {
                Some(stream) => Connection::accept(
                    stream, addr, network, identity, challenge, events, out_rx, shutdown,
                ),
                None => {
                    match Connection::connect(
                        addr, network, identity, challenge, events, out_rx, shutdown,
                    )
                    .await
                    {
                        Ok(connection) => connection,
                        Err(err) => {
                            debug!(%addr, %err, "dial failed");
                            node.inner.peers.lock().unwrap().remove(&addr);
                            node.inner
                                .address_book
                                .lock()
                                .unwrap()
                                .record_failure(addr, unix_now());
                            return;
                        }
                    }
                }
            };
            connection.run().await;
        });
    }

    fn reconnect_tick(&self) {
        let now = unix_now();
        let connected: Vec<SocketAddr> = {
            self.inner.peers.lock().unwrap().keys().copied().collect()
        };
        let capacity_left = self
            .inner
            .config
            .network
            .max_connections
            .saturating_sub(connected.len());
        let candidates: Vec<SocketAddr> = {
            let book = self.inner.address_book.lock().unwrap();
            book.reconnect_candidates(now)
                .into_iter()
                .filter(|addr| !connected.contains(addr))
                .take(capacity_left)
                .collect()
        };
        for addr in candidates {
            debug!(%addr, "reconnecting to persistent peer");
            self.attach_connection(addr, None);
        }
    }

    fn disconnect(&self, addr: &SocketAddr) {
        // Dropping the handle closes the outbound queue, which ends the
        // session loop.
        self.inner.peers.lock().unwrap().remove(addr);
    }

    fn peer_sender(&self, addr: &SocketAddr) -> Option<mpsc::Sender<Message>> {
        self.inner
            .peers
            .lock()
            .unwrap()
            .get(addr)
            .map(|handle| handle.outbound.clone())
    }

    /// Send `message` to every ready peer except `except`.
    pub(crate) async fn broadcast(&self, message: Message, except: Option<SocketAddr>) {
        let senders: Vec<(SocketAddr, mpsc::Sender<Message>)> = {
            self.inner
                .peers
                .lock()
                .unwrap()
                .iter()
                .filter(|(addr, _)| Some(**addr) != except)
                .map(|(addr, handle)| (*addr, handle.outbound.clone()))
                .collect()
        };
        for (addr, sender) in senders {
            if sender.send(message.clone()).await.is_err() {
                debug!(%addr, "dropping broadcast to closed session");
            }
        }
    }

    pub(crate) fn bump_work(&self) {
        let next = self.inner.work_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.inner.work_tx.send(next);
    }

    // ---- event routing ----

    async fn handle_peer_event(&self, event: PeerEvent) {
        let addr = event.addr;
        match event.kind {
            PeerEventKind::Ready { node_id, remote } => {
                let now = unix_now();
                {
                    let mut book = self.inner.address_book.lock().unwrap();
                    book.record_success(addr, now);
                    if let Some(node_id) = &node_id {
                        book.upsert(addr).node_id = Some(node_id.clone());
                    }
                }
                if let Some(node_id) = &node_id {
                    self.inner
                        .auth_sessions
                        .lock()
                        .unwrap()
                        .record(addr, node_id.clone(), now);
                }
                info!(%addr, agent = %remote.user_agent, "peer session ready");

                // Bootstrap sync: announce our tip.
                let (_, tip) = self.chain().tip();
                if let Some(sender) = self.peer_sender(&addr) {
                    let _ = sender.send(Message::Inv(vec![InventoryHash::Block(tip)])).await;
                }
            }
            PeerEventKind::Inventory(hashes) => {
                let chain = self.chain();
                let unknown: Vec<InventoryHash> = hashes
                    .into_iter()
                    .filter(|hash| match hash {
                        InventoryHash::Tx(id) => !self.inner.mempool.contains(id),
                        InventoryHash::Block(id) => !chain.contains(id),
                    })
                    .collect();
                if !unknown.is_empty() {
                    if let Some(sender) = self.peer_sender(&addr) {
                        let _ = sender.send(Message::GetData(unknown)).await;
                    }
                }
            }
            PeerEventKind::WantData(hashes) => {
                let sender = match self.peer_sender(&addr) {
                    Some(sender) => sender,
                    None => return,
                };
                for hash in hashes {
                    // Serve what we have; silently ignore the rest.
                    let message = match hash {
                        InventoryHash::Tx(id) => {
                            self.inner.mempool.get(&id).map(Message::Tx)
                        }
                        InventoryHash::Block(id) => self
                            .chain()
                            .block(id.into())
                            .ok()
                            .flatten()
                            .map(|block| Message::Block(Arc::new(block))),
                    };
                    if let Some(message) = message {
                        let _ = sender.send(message).await;
                    }
                }
            }
            PeerEventKind::TransactionReceived(tx) => {
                self.on_incoming_tx(Some(addr), tx).await;
            }
            PeerEventKind::BlockReceived(block) => {
                self.on_incoming_block(Some(addr), block).await;
            }
            PeerEventKind::Misbehaved { behavior, reason } => {
                debug!(%addr, reason, "peer misbehaved");
                self.penalize(addr, behavior);
            }
            PeerEventKind::Latency(latency) => {
                let mut book = self.inner.address_book.lock().unwrap();
                book.upsert(addr).last_latency_ms = Some(latency.as_millis() as u64);
                drop(book);
                // A completed ping round trip counts toward stability.
                self.penalize(addr, PeerBehavior::Stable);
            }
            PeerEventKind::Closed { reason } => {
                debug!(%addr, %reason, "peer session closed");
                self.inner.peers.lock().unwrap().remove(&addr);
                self.inner
                    .address_book
                    .lock()
                    .unwrap()
                    .record_disconnect(addr, unix_now());
            }
        }
    }

    /// Score a peer behavior and enforce any resulting ban.
    fn penalize(&self, addr: SocketAddr, behavior: PeerBehavior) {
        let banned = self
            .inner
            .address_book
            .lock()
            .unwrap()
            .record_behavior(addr, behavior, unix_now());
        if banned.is_some() {
            self.disconnect(&addr);
        }
    }

    /// Accept a transaction from the wire or the local command surface.
    pub(crate) async fn on_incoming_tx(&self, source: Option<SocketAddr>, tx: Arc<Transaction>) {
        let id = tx.hash();
        let chain = self.chain();
        match self.inner.mempool.insert(tx, chain.as_ref()) {
            Ok(fee) => {
                debug!(%id, fee, "transaction admitted");
                if let Some(addr) = source {
                    self.penalize(addr, PeerBehavior::GoodTransaction);
                }
                self.bump_work();
                self.broadcast(Message::Inv(vec![InventoryHash::Tx(id)]), source)
                    .await;
            }
            Err(MempoolError::Invalid(err)) => {
                debug!(%id, %err, "rejected invalid transaction");
                if let Some(addr) = source {
                    self.penalize(addr, PeerBehavior::InvalidTransaction { severity: 1 });
                }
            }
            Err(err) => {
                debug!(%id, %err, "transaction not admitted");
            }
        }
    }

    /// Accept a block from the wire, the miner, or the command surface.
    pub(crate) async fn on_incoming_block(&self, source: Option<SocketAddr>, block: Arc<Block>) {
        let hash = block.hash();
        let parent = block.header.previous_block_hash;
        let chain = self.chain();
        match chain.commit_block((*block).clone()) {
            Ok(BlockOutcome::Accepted { height }) => {
                debug!(%hash, height, "block accepted from network");
                self.after_block_accepted(&chain, &block, source).await;
            }
            Ok(BlockOutcome::Reorganized { depth }) => {
                info!(%hash, depth, "block triggered reorganization");
                self.after_block_accepted(&chain, &block, source).await;
            }
            Ok(BlockOutcome::Orphaned) => {
                // Ask the sender for the missing parent to backfill.
                if let Some(addr) = source {
                    if let Some(sender) = self.peer_sender(&addr) {
                        let _ = sender
                            .send(Message::GetData(vec![InventoryHash::Block(parent)]))
                            .await;
                    }
                }
            }
            Ok(BlockOutcome::AlreadyKnown) | Ok(BlockOutcome::SideChain) => {}
            Err(err) if err.is_block_fault() => {
                warn!(%hash, %err, "rejected invalid block");
                if let Some(addr) = source {
                    self.penalize(addr, PeerBehavior::InvalidBlock { severity: 1 });
                }
            }
            Err(err) => {
                error!(%hash, %err, "storage failure while committing block");
            }
        }
    }

    async fn after_block_accepted(
        &self,
        chain: &Arc<ChainManager>,
        block: &Arc<Block>,
        source: Option<SocketAddr>,
    ) {
        // Mempool bookkeeping: included transactions leave the pool,
        // rolled-back ones are offered back.
        self.inner
            .mempool
            .remove_included(block.transactions.iter().map(|tx| tx.hash()));
        let reclaimed = chain.drain_reclaimed();
        if !reclaimed.is_empty() {
            let admitted = self.inner.mempool.readmit(reclaimed, chain.as_ref());
            debug!(admitted, "re-admitted rolled-back transactions");
        }

        if let Some(addr) = source {
            self.penalize(addr, PeerBehavior::GoodBlock);
        }
        self.bump_work();
        self.broadcast(
            Message::Inv(vec![InventoryHash::Block(block.hash())]),
            source,
        )
        .await;
    }

    // ---- mining ----

    /// The address mined coinbases pay: the configured one, else the
    /// wallet default, else an address derived from the node identity.
    pub(crate) fn reward_address(&self) -> Result<Address, NodeError> {
        let network = self.inner.config.chain.network;
        if let Some(raw) = &self.inner.config.mining.reward_address {
            return raw
                .parse()
                .map_err(|_| NodeError::InvalidArgument(format!("bad reward address {}", raw)));
        }
        if let Some(account) = self.inner.wallet.lock().unwrap().default_account() {
            if let Ok(address) = account.address.parse() {
                return Ok(address);
            }
        }
        Ok(self.inner.identity.address(network))
    }

    pub(crate) fn build_miner(&self) -> Result<Miner, NodeError> {
        Ok(Miner::new(
            self.chain(),
            self.inner.mempool.clone(),
            self.reward_address()?,
            self.inner.config.mining.max_transactions,
        ))
    }

    /// Spawn the producer loop. Idempotent while already mining.
    pub(crate) fn start_miner(&self) -> Result<(), NodeError> {
        if self.inner.mining.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let node = self.clone();
        let mut shutdown = self.inner.shutdown_rx.clone();
        let mut work_rx = self.inner.work_rx.clone();
        self.spawn_worker("miner", async move {
            info!("miner started");
            loop {
                if *shutdown.borrow() || !node.inner.mining.load(Ordering::SeqCst) {
                    break;
                }
                let miner = match node.build_miner() {
                    Ok(miner) => miner,
                    Err(err) => {
                        warn!(%err, "cannot build miner");
                        break;
                    }
                };
                let template = match miner.assemble_template() {
                    Ok(template) => template,
                    Err(err) => {
                        warn!(%err, "template assembly failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };

                let cancel = Arc::new(AtomicBool::new(false));
                let search_cancel = cancel.clone();
                let mut search =
                    tokio::task::spawn_blocking(move || Miner::solve(template, &search_cancel));

                let solved = loop {
                    tokio::select! {
                        result = &mut search => {
                            break result.ok().flatten();
                        }
                        _ = work_rx.changed() => {
                            // New tip or mempool change: restart on a
                            // fresh template.
                            cancel.store(true, Ordering::Relaxed);
                        }
                        _ = shutdown.changed() => {
                            cancel.store(true, Ordering::Relaxed);
                        }
                    }
                };

                if let Some(block) = solved {
                    let hash = block.hash();
                    info!(%hash, height = block.height(), "mined block");
                    node.on_incoming_block(None, Arc::new(block)).await;
                }
            }
            node.inner.mining.store(false, Ordering::SeqCst);
            info!("miner stopped");
        });
        Ok(())
    }

    pub(crate) fn stop_miner(&self) {
        if self.inner.mining.swap(false, Ordering::SeqCst) {
            // Nudge the producer loop so it notices promptly.
            self.bump_work();
            info!("miner stop requested");
        }
    }
}

fn open_stores(
    config: &EmberdConfig,
    network: Network,
) -> Result<(Arc<dyn BlockStore>, Arc<dyn StateStore>), NodeError> {
    use ember_state::config::Backend;
    Ok(match config.state.backend {
        Backend::Sled => (
            Arc::new(ember_state::SledBlockStore::open(&config.state, network)?),
            Arc::new(ember_state::SledStateStore::open(&config.state, network)?),
        ),
        Backend::Json => (
            Arc::new(ember_state::JsonBlockStore::open(
                config.state.store_dir(network, "blocks"),
            )?),
            Arc::new(ember_state::JsonStateStore::open(
                config.state.store_dir(network, "state").join("state.json"),
            )?),
        ),
    })
}

/// Load or create the node's long-term identity key.
fn load_identity(config: &EmberdConfig) -> Result<KeyPair, NodeError> {
    match &config.identity_file {
        None => Ok(KeyPair::generate()),
        Some(path) => {
            if path.exists() {
                let hex_str = std::fs::read_to_string(path)?;
                KeyPair::from_secret_hex(hex_str.trim()).map_err(|err| {
                    NodeError::InvalidArgument(format!("bad identity file: {}", err))
                })
            } else {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                // Persist the raw scalar so restarts keep the same node id.
                loop {
                    let seed = ember_chain::crypto::random_bytes(32);
                    if let Ok(keys) = KeyPair::from_secret_bytes(&seed) {
                        std::fs::write(path, hex::encode(&seed))?;
                        return Ok(keys);
                    }
                }
            }
        }
    }
}
