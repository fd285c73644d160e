//! The network node: a peer cohort and the two-queue pipeline that keeps
//! the store converging toward the network's best chain.
//!
//! All cohort state is owned by the single task inside [`Node::run`];
//! peers, dialers and DNS lookups report back through channels, and the
//! only work leaving the loop is store application on the blocking pool.

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use itertools::Itertools;
use rand::seq::SliceRandom;
use rand::Rng;
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use vireo_crypto::hash::Hash;
use vireo_primitives::{Block, Network, Tx};
use vireo_store::{BlockStored, Store, StoreError, TxStored};

use crate::addrbook::{unix_now, AddrBook};
use crate::config::Config;
use crate::invcache::InvCache;
use crate::message::{
    AddrEntry, InvEntry, InvKind, Locator, Message, NetAddr, VersionMessage, PROTOCOL_VERSION,
    USER_AGENT,
};
use crate::peer::{Direction, Peer, PeerId, PeerInput, PeerState};
use crate::Error;

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);
/// Requested objects unanswered for this long stop counting against the
/// pipeline window.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Outbound connection attempts per connect-worker pass.
const MAX_DIALS_PER_TICK: usize = 32;
const GETBLOCKS_LIMIT: usize = 500;
const GETHEADERS_LIMIT: usize = 2000;
const EVENT_BUFFER: usize = 256;

/// What the node publishes to subscribers: stored objects, by identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Block { hash: Hash<32>, height: u32 },
    Tx { hash: Hash<32> },
}

enum Command {
    SubmitTx(Tx),
    Shutdown,
}

/// Results of work spawned off the event loop.
enum TaskResult {
    Dialed {
        addr: SocketAddr,
        result: std::io::Result<TcpStream>,
    },
    Resolved {
        addrs: Vec<SocketAddr>,
        dial_now: bool,
    },
}

enum QueuedObject {
    Block(Block),
    Tx(Tx),
}

/// Cloneable control surface for a running [`Node`].
#[derive(Clone)]
pub struct NodeHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<Event>,
    bound: watch::Receiver<Option<SocketAddr>>,
}

impl NodeHandle {
    /// A fresh subscription; every event from now on is delivered in
    /// order, and a lagging subscriber loses oldest events first.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Store a local transaction and relay it to connected peers.
    pub async fn submit_tx(&self, tx: Tx) -> Result<(), Error> {
        self.commands
            .send(Command::SubmitTx(tx))
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    pub async fn shutdown(&self) -> Result<(), Error> {
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    /// The bound listen address, once the node has one.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        let mut bound = self.bound.clone();
        let result = match bound.wait_for(Option::is_some).await {
            Ok(addr) => *addr,
            Err(_) => None,
        };
        result
    }
}

pub struct Node {
    network: Network,
    config: Config,
    store: Arc<dyn Store>,
    nonce: u64,
    best_height: u32,

    peers: HashMap<PeerId, Peer>,
    next_peer: PeerId,
    dialing: HashSet<SocketAddr>,

    addrs: AddrBook,
    inv_cache: InvCache,
    inv_queue: VecDeque<(InvEntry, PeerId)>,
    obj_queue: VecDeque<QueuedObject>,
    /// Objects requested with `getdata` that have not arrived yet.
    in_flight: HashMap<InvEntry, Instant>,

    peer_tx: mpsc::Sender<PeerInput>,
    peer_rx: mpsc::Receiver<PeerInput>,
    task_tx: mpsc::Sender<TaskResult>,
    task_rx: mpsc::Receiver<TaskResult>,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<Event>,
    bound: watch::Sender<Option<SocketAddr>>,
}

impl Node {
    pub fn new(network: Network, store: Arc<dyn Store>, config: Config) -> (Self, NodeHandle) {
        let (peer_tx, peer_rx) = mpsc::channel(256);
        let (task_tx, task_rx) = mpsc::channel(64);
        let (command_tx, command_rx) = mpsc::channel(16);
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (bound_tx, bound_rx) = watch::channel(None);

        let handle = NodeHandle {
            commands: command_tx,
            events: events.clone(),
            bound: bound_rx,
        };

        let node = Self {
            network,
            addrs: AddrBook::new(config.max.addr),
            inv_cache: InvCache::new(config.max.inv_cache),
            config,
            store,
            nonce: rand::thread_rng().gen(),
            best_height: 0,
            peers: HashMap::new(),
            next_peer: 0,
            dialing: HashSet::new(),
            inv_queue: VecDeque::new(),
            obj_queue: VecDeque::new(),
            in_flight: HashMap::new(),
            peer_tx,
            peer_rx,
            task_tx,
            task_rx,
            commands: command_rx,
            events,
            bound: bound_tx,
        };

        (node, handle)
    }

    /// Drive the node until shutdown is requested.
    pub async fn run(mut self) -> Result<(), Error> {
        let listener = match &self.config.listen {
            Some(listen) => {
                let listener = TcpListener::bind((listen.host.as_str(), listen.port)).await?;
                let addr = listener.local_addr()?;
                info!(%addr, "listening");
                let _ = self.bound.send(Some(addr));
                Some(listener)
            }
            None => None,
        };

        // pick up where the store left off
        let store = self.store.clone();
        if let Ok(Ok(Some((_, height)))) =
            tokio::task::spawn_blocking(move || store.head()).await
        {
            self.best_height = height;
        }

        for target in self.config.connect.clone() {
            self.dial_name(target);
        }

        let mut queue_tick = interval(Duration::from_secs(self.config.intervals.queue.max(1)));
        let mut inv_tick = interval(Duration::from_secs(self.config.intervals.inv_queue.max(1)));
        let mut addr_tick = interval(Duration::from_secs(self.config.intervals.addrs.max(1)));
        let mut connect_tick = interval(Duration::from_secs(self.config.intervals.connect.max(1)));
        for tick in [
            &mut queue_tick,
            &mut inv_tick,
            &mut addr_tick,
            &mut connect_tick,
        ] {
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::SubmitTx(tx)) => self.submit_tx(tx).await,
                    Some(Command::Shutdown) | None => break,
                },

                Some(input) = self.peer_rx.recv() => self.handle_peer_input(input).await,

                Some(result) = self.task_rx.recv() => self.handle_task(result),

                accepted = accept_next(&listener) => match accepted {
                    Ok((stream, addr)) => self.accept_peer(stream, addr),
                    Err(err) => warn!(%err, "accept failed"),
                },

                _ = queue_tick.tick() => {
                    self.queue_worker().await;
                }

                _ = inv_tick.tick() => self.inv_worker(),

                _ = addr_tick.tick() => self.addr_worker(),

                _ = connect_tick.tick() => self.connect_worker(),
            }
        }

        self.graceful_shutdown().await
    }

    // peer lifecycle

    fn accept_peer(&mut self, stream: TcpStream, addr: SocketAddr) {
        let id = self.next_peer;
        self.next_peer += 1;

        info!(peer = id, %addr, "inbound connection");
        let peer = Peer::spawn(
            id,
            stream,
            addr,
            Direction::Inbound,
            self.network,
            self.peer_tx.clone(),
        );
        self.peers.insert(id, peer);
    }

    fn register_outbound(&mut self, stream: TcpStream, addr: SocketAddr) {
        let id = self.next_peer;
        self.next_peer += 1;

        info!(peer = id, %addr, "outbound connection");
        let peer = Peer::spawn(
            id,
            stream,
            addr,
            Direction::Outbound,
            self.network,
            self.peer_tx.clone(),
        );
        self.peers.insert(id, peer);
        self.send_version(id);
    }

    fn close_peer(&mut self, id: PeerId) {
        if let Some(mut peer) = self.peers.remove(&id) {
            debug!(peer = id, addr = %peer.addr, "removing peer");
            peer.close();
        }
    }

    fn send_version(&self, id: PeerId) {
        let Some(peer) = self.peers.get(&id) else {
            return;
        };

        let sender = self
            .config
            .listen
            .as_ref()
            .and_then(|l| format!("{}:{}", l.host, l.port).parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 0)));

        peer.send(Message::Version(VersionMessage {
            version: PROTOCOL_VERSION,
            services: 1,
            timestamp: unix_now() as i64,
            receiver: NetAddr::new(peer.addr),
            sender: NetAddr::new(sender),
            nonce: self.nonce,
            user_agent: USER_AGENT.to_string(),
            start_height: self.best_height,
        }));
    }

    fn maybe_promote(&mut self, id: PeerId) {
        let now = unix_now();
        let Some(peer) = self.peers.get_mut(&id) else {
            return;
        };

        if peer.state == PeerState::Handshaking && peer.verack && peer.version.is_some() {
            peer.state = PeerState::Connected;
            let agent = peer
                .version
                .as_ref()
                .map(|v| v.user_agent.clone())
                .unwrap_or_default();
            info!(peer = id, addr = %peer.addr, %agent, "handshake complete");

            if peer.direction == Direction::Outbound {
                let addr = peer.addr;
                self.addrs.insert(addr, now);
            }
        }
    }

    fn connected_peers(&self) -> Vec<PeerId> {
        self.peers
            .values()
            .filter(|p| p.is_connected())
            .map(|p| p.id)
            .collect()
    }

    fn random_connected(&self) -> Option<PeerId> {
        self.connected_peers()
            .choose(&mut rand::thread_rng())
            .copied()
    }

    fn send_to(&self, id: PeerId, message: Message) {
        if let Some(peer) = self.peers.get(&id) {
            peer.send(message);
        }
    }

    // inputs

    async fn handle_peer_input(&mut self, input: PeerInput) {
        match input {
            PeerInput::Message { peer, message } => self.handle_message(peer, message).await,
            PeerInput::Failed { peer, error } => {
                warn!(peer, %error, "peer misbehaved");
                self.close_peer(peer);
            }
            PeerInput::Disconnected { peer } => {
                self.close_peer(peer);
            }
        }
    }

    fn handle_task(&mut self, result: TaskResult) {
        match result {
            TaskResult::Dialed { addr, result } => {
                self.dialing.remove(&addr);
                match result {
                    Ok(stream) => self.register_outbound(stream, addr),
                    Err(err) => debug!(%addr, %err, "dial failed"),
                }
            }
            TaskResult::Resolved { addrs, dial_now } => {
                let now = unix_now();
                for addr in &addrs {
                    self.addrs.insert(*addr, now);
                }
                if dial_now {
                    for addr in addrs {
                        self.dial(addr);
                    }
                }
            }
        }
    }

    async fn handle_message(&mut self, id: PeerId, message: Message) {
        match self.peers.get_mut(&id) {
            Some(peer) => peer.last_seen = Instant::now(),
            None => return,
        }

        trace!(peer = id, command = message.command(), "handling");

        match message {
            Message::Version(version) => {
                if version.nonce == self.nonce {
                    debug!(peer = id, "own nonce echoed back, dropping self connection");
                    self.close_peer(id);
                    return;
                }

                let direction = match self.peers.get_mut(&id) {
                    Some(peer) => {
                        peer.version = Some(version);
                        peer.send(Message::Verack);
                        peer.direction
                    }
                    None => return,
                };

                if direction == Direction::Inbound {
                    self.send_version(id);
                }
                self.maybe_promote(id);
            }

            Message::Verack => {
                if let Some(peer) = self.peers.get_mut(&id) {
                    peer.verack = true;
                }
                self.maybe_promote(id);
            }

            Message::Ping(nonce) => self.send_to(id, Message::Pong(nonce)),
            Message::Pong(_) => {}

            Message::Addr(entries) => {
                for entry in entries {
                    self.addrs.insert(entry.addr.socket_addr(), entry.time);
                }
            }

            Message::GetAddr => {
                let entries: Vec<AddrEntry> = self
                    .addrs
                    .entries()
                    .into_iter()
                    .take(self.config.max.addr)
                    .map(|a| AddrEntry {
                        time: a.last_seen,
                        addr: NetAddr::new(a.addr),
                    })
                    .collect();
                self.send_to(id, Message::Addr(entries));
            }

            Message::Inv(entries) => self.handle_inv(id, entries),
            Message::GetData(entries) => self.handle_getdata(id, entries).await,
            Message::GetBlocks(locator) => self.handle_locator(id, locator, false).await,
            Message::GetHeaders(locator) => self.handle_locator(id, locator, true).await,
            Message::Headers(headers) => self.handle_headers(id, headers),

            Message::Block(block) => {
                let entry = InvEntry::block(block.hash());
                self.in_flight.remove(&entry);
                self.inv_cache.insert(entry);
                self.obj_queue.push_back(QueuedObject::Block(block));
            }

            Message::Tx(tx) => {
                let entry = InvEntry::tx(tx.hash());
                self.in_flight.remove(&entry);
                self.inv_cache.insert(entry);
                self.obj_queue.push_back(QueuedObject::Tx(tx));
            }

            Message::NotFound(entries) => {
                for entry in &entries {
                    self.in_flight.remove(entry);
                }
                debug!(peer = id, count = entries.len(), "peer lacks requested objects");
            }
        }
    }

    fn handle_inv(&mut self, id: PeerId, entries: Vec<InvEntry>) {
        for entry in entries {
            if self.inv_cache.contains(&entry) {
                trace!(peer = id, hash = %entry.hash.reversed(), "inventory already seen");
                continue;
            }

            // transactions are expendable under load; blocks always queue
            if entry.kind == InvKind::Tx && self.inv_queue.len() >= self.config.max.inv {
                debug!(peer = id, "inventory queue saturated, dropping tx announcement");
                continue;
            }

            self.inv_cache.insert(entry);
            self.inv_queue.push_back((entry, id));
        }
    }

    async fn handle_getdata(&mut self, id: PeerId, entries: Vec<InvEntry>) {
        let store = self.store.clone();

        let looked_up = tokio::task::spawn_blocking(move || {
            let mut found = Vec::new();
            let mut missing = Vec::new();

            for entry in entries {
                let message = match entry.kind {
                    InvKind::Block => store.get_block(&entry.hash).ok().flatten().map(Message::Block),
                    InvKind::Tx => store.get_tx(&entry.hash).ok().flatten().map(Message::Tx),
                };

                match message {
                    Some(message) => found.push(message),
                    None => missing.push(entry),
                }
            }

            (found, missing)
        })
        .await;

        let Ok((found, missing)) = looked_up else {
            return;
        };

        for message in found {
            self.send_to(id, message);
        }
        if !missing.is_empty() {
            self.send_to(id, Message::NotFound(missing));
        }
    }

    async fn handle_locator(&mut self, id: PeerId, locator: Locator, headers: bool) {
        let store = self.store.clone();
        let limit = if headers {
            GETHEADERS_LIMIT
        } else {
            GETBLOCKS_LIMIT
        };

        let walked = tokio::task::spawn_blocking(move || -> Result<Vec<Block>, StoreError> {
            // the fork point is the first locator hash on our main chain
            let mut start = None;
            for hash in &locator.have {
                if store.height_of(hash)?.is_some() {
                    start = store.get_block(hash)?;
                    break;
                }
            }

            let mut out = Vec::new();
            let mut current = match start {
                Some(block) => block,
                None => match store.block_at_height(0)? {
                    // no common ancestor: offer everything from genesis
                    Some(genesis) => {
                        out.push(genesis.clone());
                        genesis
                    }
                    None => return Ok(out),
                },
            };

            while out.len() < limit {
                match store.next_block(&current)? {
                    Some(next) => {
                        out.push(next.clone());
                        current = next;
                    }
                    None => break,
                }
            }

            Ok(out)
        })
        .await;

        let blocks = match walked {
            Ok(Ok(blocks)) => blocks,
            Ok(Err(err)) => {
                warn!(%err, "locator walk failed");
                return;
            }
            Err(err) => {
                warn!(%err, "locator walk panicked");
                return;
            }
        };

        if blocks.is_empty() {
            return;
        }

        let reply = if headers {
            Message::Headers(blocks.iter().map(|b| b.header).collect())
        } else {
            Message::Inv(blocks.iter().map(|b| InvEntry::block(b.hash())).collect())
        };
        self.send_to(id, reply);
    }

    fn handle_headers(&mut self, id: PeerId, headers: Vec<vireo_primitives::BlockHeader>) {
        if !self.config.headers_only {
            debug!(peer = id, "unsolicited headers ignored");
            return;
        }

        for header in headers {
            let entry = InvEntry::block(header.hash());
            self.in_flight.remove(&entry);
            self.inv_cache.insert(entry);
            self.obj_queue
                .push_back(QueuedObject::Block(Block::new(header, Vec::new())));
        }
    }

    // workers

    /// Drain the object queue through the store, then ask for more work
    /// if the pipeline ran dry.
    async fn queue_worker(&mut self) {
        while let Some(object) = self.obj_queue.pop_front() {
            self.apply(object).await;
        }

        if self.inv_queue.is_empty() && self.in_flight.is_empty() {
            self.request_blocks().await;
        }
    }

    async fn apply(&mut self, object: QueuedObject) {
        let store = self.store.clone();

        match object {
            QueuedObject::Block(block) => {
                let hash = block.hash();
                let stored = tokio::task::spawn_blocking(move || store.store_block(block)).await;

                match stored {
                    Ok(Ok(BlockStored::New { height })) => {
                        self.best_height = self.best_height.max(height);
                        debug!(hash = %hash.reversed(), height, "stored block");
                        let _ = self.events.send(Event::Block { hash, height });
                    }
                    Ok(Ok(BlockStored::Existing)) => {
                        trace!(hash = %hash.reversed(), "block already stored")
                    }
                    Ok(Ok(BlockStored::Orphan)) => {
                        debug!(hash = %hash.reversed(), "orphan parked for its predecessor")
                    }
                    Ok(Ok(BlockStored::Invalid)) => {
                        warn!(hash = %hash.reversed(), "rejected invalid block")
                    }
                    Ok(Err(err)) => warn!(hash = %hash.reversed(), %err, "store failed"),
                    Err(err) => warn!(%err, "store worker died"),
                }
            }

            QueuedObject::Tx(tx) => {
                let hash = tx.hash();
                let stored = tokio::task::spawn_blocking(move || store.store_tx(tx)).await;

                match stored {
                    Ok(Ok(TxStored::New)) => {
                        debug!(hash = %hash.reversed(), "stored tx");
                        let _ = self.events.send(Event::Tx { hash });
                    }
                    Ok(Ok(TxStored::Existing)) => {
                        trace!(hash = %hash.reversed(), "tx already stored")
                    }
                    Ok(Err(err)) => warn!(hash = %hash.reversed(), %err, "store failed"),
                    Err(err) => warn!(%err, "store worker died"),
                }
            }
        }
    }

    /// Ask a random connected peer for blocks past our tip.
    async fn request_blocks(&mut self) {
        let Some(id) = self.random_connected() else {
            return;
        };

        let store = self.store.clone();
        let head = tokio::task::spawn_blocking(move || store.head()).await;

        let have = match head {
            Ok(Ok(Some((tip, _)))) => vec![tip.hash()],
            Ok(Ok(None)) => Vec::new(),
            Ok(Err(err)) => {
                warn!(%err, "head lookup failed");
                return;
            }
            Err(err) => {
                warn!(%err, "head lookup panicked");
                return;
            }
        };

        let locator = Locator::new(have);
        let request = if self.config.headers_only {
            Message::GetHeaders(locator)
        } else {
            Message::GetBlocks(locator)
        };

        trace!(peer = id, "requesting blocks");
        self.send_to(id, request);
    }

    /// Turn announced inventory into `getdata`, pausing while the object
    /// pipeline is full.
    fn inv_worker(&mut self) {
        self.in_flight
            .retain(|_, since| since.elapsed() < REQUEST_TIMEOUT);

        while self.obj_queue.len() + self.in_flight.len() < self.config.max.queue {
            let Some((entry, announcer)) = self.inv_queue.pop_front() else {
                break;
            };

            let target = if self
                .peers
                .get(&announcer)
                .map_or(false, Peer::is_connected)
            {
                Some(announcer)
            } else {
                self.random_connected()
            };

            match target {
                Some(id) => {
                    trace!(peer = id, hash = %entry.hash.reversed(), "requesting object");
                    self.in_flight.insert(entry, Instant::now());
                    self.send_to(id, Message::GetData(vec![entry]));
                }
                None => {
                    self.inv_queue.push_front((entry, announcer));
                    break;
                }
            }
        }
    }

    /// Keep the address book stocked.
    fn addr_worker(&mut self) {
        if self.addrs.is_full() {
            self.addrs.purge_expired(unix_now());
            return;
        }

        if let Some(id) = self.random_connected() {
            trace!(peer = id, "requesting addresses");
            self.send_to(id, Message::GetAddr);
        }
    }

    /// Heal the cohort: drop stale handshakes, dial new candidates, and
    /// fall back to DNS seeds when the address book is dry.
    fn connect_worker(&mut self) {
        let stale: Vec<PeerId> = self
            .peers
            .values()
            .filter(|p| {
                p.state == PeerState::Handshaking && p.last_seen.elapsed() > HANDSHAKE_TIMEOUT
            })
            .map(|p| p.id)
            .collect();
        for id in stale {
            warn!(peer = id, "handshake timed out");
            self.close_peer(id);
        }

        let active = self.peers.len() + self.dialing.len();
        if active >= self.config.max.connections {
            return;
        }
        let want = (self.config.max.connections - active).min(MAX_DIALS_PER_TICK);

        if self.peers.is_empty() {
            for target in self.config.connect.clone() {
                self.dial_name(target);
            }
        }

        let now = unix_now();
        let occupied: HashSet<SocketAddr> = self
            .peers
            .values()
            .map(|p| p.addr)
            .chain(self.dialing.iter().copied())
            .unique()
            .collect();

        let candidates = self.addrs.sample(
            want,
            now,
            |addr| !occupied.contains(addr),
            &mut rand::thread_rng(),
        );

        if candidates.is_empty() && self.addrs.is_empty() && self.config.dns {
            self.seed_from_dns();
            return;
        }

        for addr in candidates {
            self.dial(addr);
        }
    }

    // outbound connection plumbing

    fn dial(&mut self, addr: SocketAddr) {
        if self.dialing.contains(&addr) || self.peers.values().any(|p| p.addr == addr) {
            return;
        }

        debug!(%addr, "dialing");
        self.dialing.insert(addr);
        let task_tx = self.task_tx.clone();

        tokio::spawn(async move {
            let result = match timeout(DIAL_TIMEOUT, TcpStream::connect(addr)).await {
                Ok(connected) => connected,
                Err(_) => Err(std::io::Error::from(std::io::ErrorKind::TimedOut)),
            };
            let _ = task_tx.send(TaskResult::Dialed { addr, result }).await;
        });
    }

    fn dial_name(&mut self, target: String) {
        let task_tx = self.task_tx.clone();

        tokio::spawn(async move {
            match lookup_host(target.as_str()).await {
                Ok(addrs) => {
                    let addrs: Vec<SocketAddr> = addrs.take(1).collect();
                    if !addrs.is_empty() {
                        let _ = task_tx
                            .send(TaskResult::Resolved {
                                addrs,
                                dial_now: true,
                            })
                            .await;
                    }
                }
                Err(err) => debug!(%target, %err, "name resolution failed"),
            }
        });
    }

    fn seed_from_dns(&mut self) {
        let port = self.network.default_port();

        for seed in self.network.dns_seeds() {
            info!(%seed, "seeding addresses from dns");
            let task_tx = self.task_tx.clone();
            let host = seed.to_string();

            tokio::spawn(async move {
                match lookup_host((host.as_str(), port)).await {
                    Ok(addrs) => {
                        let addrs: Vec<SocketAddr> = addrs.collect();
                        let _ = task_tx
                            .send(TaskResult::Resolved {
                                addrs,
                                dial_now: false,
                            })
                            .await;
                    }
                    Err(err) => debug!(%host, %err, "dns seed failed"),
                }
            });
        }
    }

    // local submission and shutdown

    async fn submit_tx(&mut self, tx: Tx) {
        let hash = tx.hash();
        let store = self.store.clone();
        let stored = tokio::task::spawn_blocking(move || store.store_tx(tx)).await;

        match stored {
            Ok(Ok(TxStored::New)) => {}
            Ok(Ok(TxStored::Existing)) => {
                debug!(hash = %hash.reversed(), "submitted tx already known");
                return;
            }
            Ok(Err(err)) => {
                warn!(hash = %hash.reversed(), %err, "submitted tx not stored");
                return;
            }
            Err(err) => {
                warn!(%err, "store worker died");
                return;
            }
        }

        info!(hash = %hash.reversed(), "accepted local tx");
        self.inv_cache.insert(InvEntry::tx(hash));
        let _ = self.events.send(Event::Tx { hash });

        // relay to a majority of the cohort
        let connected = self.connected_peers();
        let majority = connected.len() / 2 + 1;
        for id in connected.choose_multiple(&mut rand::thread_rng(), majority) {
            self.send_to(*id, Message::Inv(vec![InvEntry::tx(hash)]));
        }
    }

    /// Stop intake, drain what is already queued against a deadline, and
    /// close every peer.
    async fn graceful_shutdown(mut self) -> Result<(), Error> {
        info!(queued = self.obj_queue.len(), "shutting down");
        let deadline = Instant::now() + SHUTDOWN_DEADLINE;

        while let Some(object) = self.obj_queue.pop_front() {
            if Instant::now() >= deadline {
                warn!(
                    dropped = self.obj_queue.len() + 1,
                    "shutdown deadline reached"
                );
                break;
            }
            self.apply(object).await;
        }

        for (_, mut peer) in self.peers.drain() {
            peer.close();
        }

        Ok(())
    }
}

/// Accept from the listener, or park forever when listening is disabled.
async fn accept_next(listener: &Option<TcpListener>) -> std::io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vireo_store::MemoryStore;

    fn test_node(config: Config) -> (Node, NodeHandle) {
        Node::new(Network::Mainnet, Arc::new(MemoryStore::new()), config)
    }

    fn block_entry(tag: u64) -> InvEntry {
        InvEntry::block(vireo_crypto::hash::sha256d(&tag.to_le_bytes()))
    }

    #[tokio::test]
    async fn inv_announcements_dedupe_through_the_cache() {
        let (mut node, _handle) = test_node(Config::default());

        node.handle_inv(0, vec![block_entry(1), block_entry(2)]);
        node.handle_inv(0, vec![block_entry(1)]);
        node.handle_inv(1, vec![block_entry(2), block_entry(3)]);

        assert_eq!(node.inv_queue.len(), 3);
        assert!(node.inv_cache.contains(&block_entry(1)));
        assert!(node.inv_cache.contains(&block_entry(3)));
    }

    #[tokio::test]
    async fn saturated_inv_queue_sheds_tx_but_not_blocks() {
        let mut config = Config::default();
        config.max.inv = 2;
        let (mut node, _handle) = test_node(config);

        node.handle_inv(0, vec![block_entry(1), block_entry(2)]);

        let tx_entry = InvEntry::tx(vireo_crypto::hash::sha256d(b"tx"));
        node.handle_inv(0, vec![tx_entry]);
        assert_eq!(node.inv_queue.len(), 2);
        // dropped announcements are not cached, so they may come back
        assert!(!node.inv_cache.contains(&tx_entry));

        node.handle_inv(0, vec![block_entry(3)]);
        assert_eq!(node.inv_queue.len(), 3);
    }

    #[tokio::test]
    async fn inv_worker_stalls_without_connected_peers() {
        let (mut node, _handle) = test_node(Config::default());

        node.handle_inv(0, vec![block_entry(1)]);
        node.inv_worker();

        // nothing to send it to; the entry stays queued
        assert_eq!(node.inv_queue.len(), 1);
        assert!(node.in_flight.is_empty());
    }

    #[tokio::test]
    async fn queue_worker_applies_and_notifies() {
        let (mut node, handle) = test_node(Config::default());
        let mut events = handle.subscribe();

        let chain = vireo_store::conformance::test_chain(3);
        for block in &chain {
            node.obj_queue.push_back(QueuedObject::Block(block.clone()));
        }
        node.queue_worker().await;

        for (height, block) in chain.iter().enumerate() {
            assert_eq!(
                events.try_recv().unwrap(),
                Event::Block {
                    hash: block.hash(),
                    height: height as u32
                }
            );
        }
        assert_eq!(node.best_height, 2);
        assert!(node.obj_queue.is_empty());
    }

    #[tokio::test]
    async fn submitted_tx_is_stored_and_published() {
        let (mut node, handle) = test_node(Config::default());
        let mut events = handle.subscribe();

        let tx = vireo_store::conformance::test_chain(1)[0].txs[0].clone();
        node.submit_tx(tx.clone()).await;

        assert_eq!(events.try_recv().unwrap(), Event::Tx { hash: tx.hash() });
        assert!(node.inv_cache.contains(&InvEntry::tx(tx.hash())));

        // resubmission is idempotent and silent
        node.submit_tx(tx).await;
        assert!(events.try_recv().is_err());
    }
}
