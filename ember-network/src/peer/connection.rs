//! One peer session: the framed connection, its state machine, and the
//! event stream it feeds the node runtime.
//!
//! A session walks `Connecting → Handshaking → Authenticating? → Ready →
//! Disconnecting`. Data messages flow only in `Ready`; a violation ends the
//! session with a reputation-relevant event. Each live connection is backed
//! by one task running [`Connection::run`], with outbound messages queued
//! through an mpsc channel owned by the runtime.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use futures::prelude::*;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, timeout};
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use ember_chain::block::Block;
use ember_chain::crypto::KeyPair;
use ember_chain::parameters::Network;
use ember_chain::transaction::Transaction;
use ember_chain::SerializationError;

use super::error::PeerError;
use crate::auth;
use crate::constants::{
    CONNECT_TIMEOUT, CURRENT_VERSION, HANDSHAKE_TIMEOUT, PING_INTERVAL, PONG_TIMEOUT,
    SEEN_DEBOUNCE, USER_AGENT,
};
use crate::meta_addr::PeerBehavior;
use crate::protocol::codec::Codec;
use crate::protocol::inv::InventoryHash;
use crate::protocol::message::{Hello, Message};
use crate::protocol::types::{NodeServices, Nonce, ProtocolVersion};

/// The session state machine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionState {
    Connecting,
    Handshaking,
    Authenticating,
    Ready,
    Disconnecting,
}

/// What happened on a peer session.
#[derive(Debug)]
pub enum PeerEventKind {
    /// The handshake (and optional authentication) completed.
    Ready {
        node_id: Option<String>,
        remote: Hello,
    },
    /// The peer announced items.
    Inventory(Vec<InventoryHash>),
    /// The peer requested items.
    WantData(Vec<InventoryHash>),
    /// The peer delivered a transaction.
    TransactionReceived(Arc<Transaction>),
    /// The peer delivered a block.
    BlockReceived(Arc<Block>),
    /// The peer misbehaved; the runtime scores it.
    Misbehaved {
        behavior: PeerBehavior,
        reason: &'static str,
    },
    /// A ping round trip completed.
    Latency(Duration),
    /// The session ended.
    Closed { reason: String },
}

/// An event from one peer session, tagged with its endpoint.
#[derive(Debug)]
pub struct PeerEvent {
    pub addr: SocketAddr,
    pub kind: PeerEventKind,
}

enum Step {
    /// The shutdown flag changed, or its sender is gone.
    Shutdown { sender_gone: bool },
    Outbound(Option<Message>),
    PingTick,
    Frame(Option<Result<Message, SerializationError>>),
}

/// A live peer session. See the module docs.
pub struct Connection {
    addr: SocketAddr,
    framed: Framed<TcpStream, Codec>,
    state: SessionState,
    /// Inventory recently sent or received on this session, for echo
    /// suppression.
    seen: HashMap<InventoryHash, Instant>,
    pending_ping: Option<(Nonce, Instant)>,
    events: mpsc::Sender<PeerEvent>,
    outbound: mpsc::Receiver<Message>,
    shutdown: watch::Receiver<bool>,
    identity: Arc<KeyPair>,
    challenge_peer: bool,
    hello_nonce: Nonce,
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock set before the unix epoch")
        .as_secs()
}

impl Connection {
    /// Dial `addr` and wrap the stream in a session.
    #[allow(clippy::too_many_arguments)]
    pub async fn connect(
        addr: SocketAddr,
        network: Network,
        identity: Arc<KeyPair>,
        challenge_peer: bool,
        events: mpsc::Sender<PeerEvent>,
        outbound: mpsc::Receiver<Message>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Connection, PeerError> {
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| PeerError::ConnectTimeout)??;
        Ok(Connection::accept(
            stream,
            addr,
            network,
            identity,
            challenge_peer,
            events,
            outbound,
            shutdown,
        ))
    }

    /// Wrap an established stream (inbound or outbound) in a session.
    #[allow(clippy::too_many_arguments)]
    pub fn accept(
        stream: TcpStream,
        addr: SocketAddr,
        network: Network,
        identity: Arc<KeyPair>,
        challenge_peer: bool,
        events: mpsc::Sender<PeerEvent>,
        outbound: mpsc::Receiver<Message>,
        shutdown: watch::Receiver<bool>,
    ) -> Connection {
        let codec = Codec::builder()
            .for_network(network)
            .with_metrics_label(addr.to_string())
            .finish();
        Connection {
            addr,
            framed: Framed::new(stream, codec),
            state: SessionState::Connecting,
            seen: HashMap::new(),
            pending_ping: None,
            events,
            outbound,
            shutdown,
            identity,
            challenge_peer,
            hello_nonce: Nonce::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drive the session to completion, emitting a final `Closed` event.
    pub async fn run(mut self) {
        let reason = match self.session().await {
            Ok(()) => "shutdown".to_string(),
            Err(err) => err.to_string(),
        };
        self.state = SessionState::Disconnecting;
        debug!(peer = %self.addr, %reason, "peer session ended");
        self.emit(PeerEventKind::Closed { reason }).await;
    }

    async fn session(&mut self) -> Result<(), PeerError> {
        let remote = timeout(HANDSHAKE_TIMEOUT, self.handshake())
            .await
            .map_err(|_| PeerError::HandshakeTimeout)??;

        let node_id = if self.challenge_peer {
            let node_id = timeout(HANDSHAKE_TIMEOUT, self.authenticate())
                .await
                .map_err(|_| PeerError::HandshakeTimeout)??;
            Some(node_id)
        } else {
            None
        };

        self.state = SessionState::Ready;
        self.emit(PeerEventKind::Ready { node_id, remote }).await;
        self.ready_loop().await
    }

    async fn handshake(&mut self) -> Result<Hello, PeerError> {
        self.state = SessionState::Handshaking;
        let hello = Hello {
            version: ProtocolVersion(CURRENT_VERSION),
            user_agent: USER_AGENT.to_string(),
            services: NodeServices::NETWORK,
            nonce: self.hello_nonce,
        };
        self.framed.send(Message::Hello(hello)).await?;

        match self.framed.next().await {
            Some(Ok(Message::Hello(remote))) => {
                if remote.nonce == self.hello_nonce {
                    return Err(PeerError::ConnectionToSelf);
                }
                trace!(peer = %self.addr, agent = %remote.user_agent, "handshake complete");
                Ok(remote)
            }
            Some(Ok(_)) => Err(PeerError::ProtocolViolation(
                "first message was not a hello",
            )),
            Some(Err(err)) => Err(err.into()),
            None => Err(PeerError::ConnectionClosed),
        }
    }

    async fn authenticate(&mut self) -> Result<String, PeerError> {
        self.state = SessionState::Authenticating;
        let challenge = auth::new_challenge(unix_now());
        self.framed
            .send(Message::AuthChallenge(challenge.clone()))
            .await?;

        loop {
            match self.framed.next().await {
                Some(Ok(Message::AuthResponse(response))) => {
                    return Ok(auth::verify(&challenge, &response)?);
                }
                // The peer may be challenging us concurrently; answer and
                // keep waiting for our response.
                Some(Ok(Message::AuthChallenge(theirs))) => {
                    let response = auth::respond(&self.identity, &theirs);
                    self.framed.send(Message::AuthResponse(response)).await?;
                }
                Some(Ok(_)) => {
                    return Err(PeerError::ProtocolViolation(
                        "expected an auth response during authentication",
                    ))
                }
                Some(Err(err)) => return Err(err.into()),
                None => return Err(PeerError::ConnectionClosed),
            }
        }
    }

    async fn ready_loop(&mut self) -> Result<(), PeerError> {
        let mut ping_timer = interval(PING_INTERVAL);
        loop {
            let step = {
                let Connection {
                    framed,
                    outbound,
                    shutdown,
                    ..
                } = self;
                tokio::select! {
                    changed = shutdown.changed() => Step::Shutdown {
                        sender_gone: changed.is_err(),
                    },
                    maybe = outbound.recv() => Step::Outbound(maybe),
                    _ = ping_timer.tick() => Step::PingTick,
                    frame = framed.next() => Step::Frame(frame),
                }
            };
            match step {
                Step::Shutdown { sender_gone } => {
                    if sender_gone || *self.shutdown.borrow() {
                        return Ok(());
                    }
                }
                // The runtime dropped our outbound handle: disconnect.
                Step::Outbound(None) => return Ok(()),
                Step::Outbound(Some(message)) => self.send_filtered(message).await?,
                Step::PingTick => self.ping_tick().await?,
                Step::Frame(Some(Ok(message))) => self.handle_message(message).await?,
                Step::Frame(Some(Err(err))) => {
                    self.emit(PeerEventKind::Misbehaved {
                        behavior: PeerBehavior::Spam { severity: 2 },
                        reason: "framing error",
                    })
                    .await;
                    return Err(err.into());
                }
                Step::Frame(None) => return Err(PeerError::ConnectionClosed),
            }
        }
    }

    async fn handle_message(&mut self, message: Message) -> Result<(), PeerError> {
        trace!(peer = %self.addr, %message, "message received");
        match message {
            Message::Ping(nonce) => self.framed.send(Message::Pong(nonce)).await?,
            Message::Pong(nonce) => {
                if let Some((expected, sent_at)) = self.pending_ping.take() {
                    if expected == nonce {
                        self.emit(PeerEventKind::Latency(sent_at.elapsed())).await;
                    } else {
                        // Unsolicited pong; keep waiting for the right one.
                        self.pending_ping = Some((expected, sent_at));
                    }
                }
            }
            Message::Inv(hashes) => {
                let now = Instant::now();
                for hash in hashes.iter() {
                    self.seen.insert(*hash, now);
                }
                self.emit(PeerEventKind::Inventory(hashes)).await;
            }
            Message::GetData(hashes) => self.emit(PeerEventKind::WantData(hashes)).await,
            Message::Tx(transaction) => {
                self.seen
                    .insert(InventoryHash::Tx(transaction.hash()), Instant::now());
                self.emit(PeerEventKind::TransactionReceived(transaction))
                    .await;
            }
            Message::Block(block) => {
                self.seen
                    .insert(InventoryHash::Block(block.hash()), Instant::now());
                self.emit(PeerEventKind::BlockReceived(block)).await;
            }
            // A peer may demand authentication at any time.
            Message::AuthChallenge(challenge) => {
                let response = auth::respond(&self.identity, &challenge);
                self.framed.send(Message::AuthResponse(response)).await?;
            }
            Message::Hello(_) => {
                self.emit(PeerEventKind::Misbehaved {
                    behavior: PeerBehavior::ConnectionAbuse { severity: 2 },
                    reason: "hello after handshake",
                })
                .await;
                return Err(PeerError::ProtocolViolation("hello after handshake"));
            }
            Message::AuthResponse(_) => {
                self.emit(PeerEventKind::Misbehaved {
                    behavior: PeerBehavior::ConnectionAbuse { severity: 1 },
                    reason: "unsolicited auth response",
                })
                .await;
                return Err(PeerError::ProtocolViolation("unsolicited auth response"));
            }
        }
        Ok(())
    }

    /// Send a message, suppressing inventory the peer has seen within the
    /// debounce window.
    async fn send_filtered(&mut self, message: Message) -> Result<(), PeerError> {
        let message = match message {
            Message::Inv(hashes) => {
                let now = Instant::now();
                let fresh: Vec<InventoryHash> = hashes
                    .into_iter()
                    .filter(|hash| !self.recently_seen(hash))
                    .collect();
                if fresh.is_empty() {
                    return Ok(());
                }
                for hash in fresh.iter() {
                    self.seen.insert(*hash, now);
                }
                Message::Inv(fresh)
            }
            Message::Tx(transaction) => {
                self.seen
                    .insert(InventoryHash::Tx(transaction.hash()), Instant::now());
                Message::Tx(transaction)
            }
            Message::Block(block) => {
                self.seen
                    .insert(InventoryHash::Block(block.hash()), Instant::now());
                Message::Block(block)
            }
            other => other,
        };
        self.framed.send(message).await?;
        Ok(())
    }

    fn recently_seen(&self, hash: &InventoryHash) -> bool {
        matches!(self.seen.get(hash), Some(at) if at.elapsed() < SEEN_DEBOUNCE)
    }

    async fn ping_tick(&mut self) -> Result<(), PeerError> {
        if let Some((nonce, sent_at)) = self.pending_ping {
            if sent_at.elapsed() > PONG_TIMEOUT {
                self.emit(PeerEventKind::Misbehaved {
                    behavior: PeerBehavior::Timeout { severity: 1 },
                    reason: "ping unanswered",
                })
                .await;
                return Err(PeerError::PingTimeout(nonce));
            }
        }
        // Piggyback seen-set pruning on the ping cadence.
        self.seen.retain(|_, at| at.elapsed() < SEEN_DEBOUNCE);

        let nonce = Nonce::default();
        self.pending_ping = Some((nonce, Instant::now()));
        self.framed.send(Message::Ping(nonce)).await?;
        Ok(())
    }

    async fn emit(&self, kind: PeerEventKind) {
        let _ = self
            .events
            .send(PeerEvent {
                addr: self.addr,
                kind,
            })
            .await;
    }
}
