use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use vireo_network::config::Config;
use vireo_network::message::{self, InvEntry, Message};
use vireo_network::node::{Event, Node, NodeHandle};
use vireo_primitives::{Block, Network, Tx};
use vireo_store::conformance::test_chain;
use vireo_store::{BlockStored, MemoryStore, Store, StoreError, TxStored};

const NETWORK: Network = Network::Mainnet;

fn listener_config() -> Config {
    Config::from_value(json!({
        "listen": { "host": "127.0.0.1", "port": 0 },
        "dns": false,
        "intervals": { "queue": 1, "inv_queue": 1, "addrs": 1, "connect": 1 },
    }))
    .unwrap()
}

fn dialer_config(target: &str) -> Config {
    Config::from_value(json!({
        "connect": [target],
        "dns": false,
        "intervals": { "queue": 1, "inv_queue": 1, "addrs": 1, "connect": 1 },
    }))
    .unwrap()
}

fn spawn_node(store: Arc<dyn Store>, config: Config) -> NodeHandle {
    let (node, handle) = Node::new(NETWORK, store, config);
    tokio::spawn(node.run());
    handle
}

async fn expect_chain(events: &mut tokio::sync::broadcast::Receiver<Event>, chain: &[Block]) {
    for (height, block) in chain.iter().enumerate() {
        let event = timeout(Duration::from_secs(30), events.recv())
            .await
            .expect("timed out waiting for block event")
            .unwrap();

        assert_eq!(
            event,
            Event::Block {
                hash: block.hash(),
                height: height as u32
            }
        );
    }
}

#[tokio::test]
async fn block_sync_over_loopback() {
    let chain = test_chain(4);

    let server_store = Arc::new(MemoryStore::new());
    for block in &chain {
        server_store.store_block(block.clone()).unwrap();
    }

    let server = spawn_node(server_store, listener_config());
    let addr = server.local_addr().await.expect("server never bound");

    let client_store = Arc::new(MemoryStore::new());
    let client = spawn_node(client_store.clone(), dialer_config(&addr.to_string()));
    let mut events = client.subscribe();

    expect_chain(&mut events, &chain).await;

    let (tip, height) = client_store.head().unwrap().unwrap();
    assert_eq!(height, 3);
    assert_eq!(tip.hash(), chain[3].hash());

    client.shutdown().await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn headers_only_sync_converges_to_tip() {
    let chain = test_chain(5);

    let server_store = Arc::new(MemoryStore::new());
    for block in &chain {
        server_store.store_block(block.clone()).unwrap();
    }

    let server = spawn_node(server_store, listener_config());
    let addr = server.local_addr().await.expect("server never bound");

    let mut config = dialer_config(&addr.to_string());
    config.headers_only = true;

    let client_store = Arc::new(MemoryStore::new());
    let client = spawn_node(client_store.clone(), config);
    let mut events = client.subscribe();

    expect_chain(&mut events, &chain).await;

    let (tip, height) = client_store.head().unwrap().unwrap();
    assert_eq!(height, 4);
    assert_eq!(tip.hash(), chain[4].hash());
    // headers only: the stored tip has no transactions
    assert!(tip.txs.is_empty());

    client.shutdown().await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn submitted_tx_is_relayed_to_peers() {
    let server = spawn_node(Arc::new(MemoryStore::new()), listener_config());
    let addr = server.local_addr().await.expect("server never bound");

    let client_store = Arc::new(MemoryStore::new());
    let client = spawn_node(client_store, dialer_config(&addr.to_string()));

    let mut server_events = server.subscribe();

    // give the handshake a moment, then submit on the dialing side
    tokio::time::sleep(Duration::from_secs(2)).await;
    let tx: Tx = test_chain(1)[0].txs[0].clone();
    client.submit_tx(tx.clone()).await.unwrap();

    let event = timeout(Duration::from_secs(30), server_events.recv())
        .await
        .expect("timed out waiting for relayed tx")
        .unwrap();
    assert_eq!(event, Event::Tx { hash: tx.hash() });

    client.shutdown().await.unwrap();
    server.shutdown().await.unwrap();
}

// a store whose block writes take real time, to exercise backpressure

struct SlowStore {
    inner: MemoryStore,
    delay: Duration,
}

impl Store for SlowStore {
    fn store_block(&self, block: Block) -> Result<BlockStored, StoreError> {
        std::thread::sleep(self.delay);
        self.inner.store_block(block)
    }

    fn store_tx(&self, tx: Tx) -> Result<TxStored, StoreError> {
        self.inner.store_tx(tx)
    }

    fn get_block(
        &self,
        hash: &vireo_crypto::hash::Hash<32>,
    ) -> Result<Option<Block>, StoreError> {
        self.inner.get_block(hash)
    }

    fn get_tx(&self, hash: &vireo_crypto::hash::Hash<32>) -> Result<Option<Tx>, StoreError> {
        self.inner.get_tx(hash)
    }

    fn block_at_height(&self, height: u32) -> Result<Option<Block>, StoreError> {
        self.inner.block_at_height(height)
    }

    fn head(&self) -> Result<Option<(Block, u32)>, StoreError> {
        self.inner.head()
    }

    fn has(
        &self,
        kind: vireo_store::ObjectKind,
        hash: &vireo_crypto::hash::Hash<32>,
    ) -> Result<bool, StoreError> {
        self.inner.has(kind, hash)
    }

    fn next_block(&self, block: &Block) -> Result<Option<Block>, StoreError> {
        self.inner.next_block(block)
    }

    fn height_of(&self, hash: &vireo_crypto::hash::Hash<32>) -> Result<Option<u32>, StoreError> {
        self.inner.height_of(hash)
    }
}

/// Minimal hand-driven remote peer over a raw socket.
struct RemotePeer {
    socket: TcpStream,
    buffer: Vec<u8>,
}

impl RemotePeer {
    async fn connect(addr: std::net::SocketAddr) -> Self {
        Self {
            socket: TcpStream::connect(addr).await.unwrap(),
            buffer: Vec::new(),
        }
    }

    async fn send(&mut self, message: Message) {
        self.socket
            .write_all(&message.to_wire(NETWORK))
            .await
            .unwrap();
    }

    async fn recv(&mut self) -> Message {
        loop {
            if let Some(frame) = message::try_frame(&mut self.buffer, NETWORK).unwrap() {
                if let Some(message) = Message::decode(&frame.command, &frame.payload).unwrap() {
                    return message;
                }
                continue;
            }

            let mut chunk = [0u8; 4096];
            let n = self.socket.read(&mut chunk).await.unwrap();
            assert!(n > 0, "node closed the connection");
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }

    async fn handshake(&mut self) {
        let version = message::VersionMessage {
            version: message::PROTOCOL_VERSION,
            services: 1,
            timestamp: 0,
            receiver: message::NetAddr::new(([127, 0, 0, 1], 8333).into()),
            sender: message::NetAddr::new(([127, 0, 0, 1], 8333).into()),
            nonce: 0x5EED,
            user_agent: "/remote-test/".into(),
            start_height: 0,
        };
        self.send(Message::Version(version)).await;

        let mut got_version = false;
        let mut got_verack = false;
        while !(got_version && got_verack) {
            match self.recv().await {
                Message::Version(_) => {
                    got_version = true;
                    self.send(Message::Verack).await;
                }
                Message::Verack => got_verack = true,
                other => panic!("unexpected message during handshake: {other:?}"),
            }
        }
    }
}

#[tokio::test]
async fn inventory_pipeline_is_backpressured() {
    const MAX_QUEUE: usize = 4;
    const BLOCKS: usize = 10 * MAX_QUEUE;

    let config = Config::from_value(json!({
        "listen": { "host": "127.0.0.1", "port": 0 },
        "dns": false,
        "max": { "queue": MAX_QUEUE },
        "intervals": { "queue": 1, "inv_queue": 1, "addrs": 30, "connect": 30 },
    }))
    .unwrap();

    let store = Arc::new(SlowStore {
        inner: MemoryStore::new(),
        delay: Duration::from_millis(25),
    });

    let node = spawn_node(store, config);
    let mut events = node.subscribe();
    let addr = node.local_addr().await.expect("node never bound");

    let chain = test_chain(BLOCKS as u8);
    let mut remote = RemotePeer::connect(addr).await;
    remote.handshake().await;

    // announce everything at once
    let inv: Vec<InvEntry> = chain.iter().map(|b| InvEntry::block(b.hash())).collect();
    remote.send(Message::Inv(inv)).await;

    // serve getdata while asserting the pipeline window stays bounded
    let serve = async {
        let mut outstanding: Vec<InvEntry> = Vec::new();
        let mut requested = 0usize;

        while requested < BLOCKS {
            match remote.recv().await {
                Message::GetData(entries) => {
                    requested += entries.len();
                    outstanding.extend(entries);
                    assert!(
                        outstanding.len() <= MAX_QUEUE,
                        "{} unanswered requests, limit is {MAX_QUEUE}",
                        outstanding.len()
                    );

                    for entry in outstanding.drain(..) {
                        let block = chain
                            .iter()
                            .find(|b| b.hash() == entry.hash)
                            .expect("node requested an unannounced block");
                        remote.send(Message::Block(block.clone())).await;
                    }
                }
                // idle-pipeline probing is fine to ignore
                Message::GetBlocks(_) | Message::GetHeaders(_) | Message::GetAddr => {}
                Message::Ping(nonce) => remote.send(Message::Pong(nonce)).await,
                other => panic!("unexpected message: {other:?}"),
            }
        }

        requested
    };

    let requested = timeout(Duration::from_secs(60), serve)
        .await
        .expect("sync did not finish in time");

    // every announcement was requested exactly once
    assert_eq!(requested, BLOCKS);

    // and every block made it into the store, in order
    for (height, block) in chain.iter().enumerate() {
        let event = timeout(Duration::from_secs(30), events.recv())
            .await
            .expect("missing block event")
            .unwrap();
        assert_eq!(
            event,
            Event::Block {
                hash: block.hash(),
                height: height as u32
            }
        );
    }

    node.shutdown().await.unwrap();
}
