//! Executable contract for [`Store`] backends.
//!
//! The battery is exported so any backend, not just the in-memory
//! reference, can assert the identical behavior.

use vireo_crypto::hash::Hash;
use vireo_primitives::{Block, BlockHeader, OutPoint, Tx, TxIn, TxOut};

use crate::{BlockStored, ObjectKind, Store, TxStored};

/// A minimal valid block: one coinbase transaction tagged so every block
/// in a test chain hashes differently.
pub fn test_block(prev: Hash<32>, tag: u8) -> Block {
    let coinbase = Tx::new(
        vec![TxIn::new(OutPoint::null(), vec![0x01, tag])],
        vec![TxOut::new(50_0000_0000, vec![0x51])],
    );

    let header = BlockHeader {
        version: 1,
        prev_block: prev,
        merkle_root: coinbase.hash(),
        time: 1_231_006_505 + tag as u32,
        bits: 0x1d00ffff,
        nonce: tag as u32,
    };

    Block::new(header, vec![coinbase])
}

/// A linear chain of `len` blocks starting from a zero predecessor.
pub fn test_chain(len: u8) -> Vec<Block> {
    let mut prev = Hash::zero();
    (0..len)
        .map(|tag| {
            let block = test_block(prev, tag);
            prev = block.hash();
            block
        })
        .collect()
}

/// Run the full battery against fresh instances produced by `make`.
pub fn run<S: Store>(make: impl Fn() -> S) {
    block_storage_is_idempotent(&make());
    height_chain_is_contiguous(&make());
    orphans_are_adopted(&make());
    invalid_blocks_are_rejected(&make());
    tx_storage_is_idempotent(&make());
    linear_iteration_walks_the_chain(&make());
}

fn block_storage_is_idempotent<S: Store>(store: &S) {
    let block = test_block(Hash::zero(), 0);
    let hash = block.hash();

    assert_eq!(
        store.store_block(block.clone()).unwrap(),
        BlockStored::New { height: 0 }
    );
    assert_eq!(store.store_block(block).unwrap(), BlockStored::Existing);

    assert!(store.has(ObjectKind::Block, &hash).unwrap());
    assert!(!store.has(ObjectKind::Tx, &hash).unwrap());
    assert_eq!(store.get_block(&hash).unwrap().unwrap().hash(), hash);
}

fn height_chain_is_contiguous<S: Store>(store: &S) {
    let chain = test_chain(5);
    for (height, block) in chain.iter().enumerate() {
        assert_eq!(
            store.store_block(block.clone()).unwrap(),
            BlockStored::New {
                height: height as u32
            }
        );
    }

    let (tip, height) = store.head().unwrap().unwrap();
    assert_eq!(height, 4);
    assert_eq!(tip.hash(), chain[4].hash());

    // every non-genesis block's predecessor sits one height below
    for height in 1..5u32 {
        let block = store.block_at_height(height).unwrap().unwrap();
        let below = store.block_at_height(height - 1).unwrap().unwrap();
        assert_eq!(block.header.prev_block, below.hash());
    }
}

fn orphans_are_adopted<S: Store>(store: &S) {
    let chain = test_chain(3);

    store.store_block(chain[0].clone()).unwrap();

    // the grandchild arrives before its parent
    assert_eq!(
        store.store_block(chain[2].clone()).unwrap(),
        BlockStored::Orphan
    );
    assert!(!store.has(ObjectKind::Block, &chain[2].hash()).unwrap());

    // connecting the parent adopts the waiting orphan
    assert_eq!(
        store.store_block(chain[1].clone()).unwrap(),
        BlockStored::New { height: 1 }
    );
    assert!(store.has(ObjectKind::Block, &chain[2].hash()).unwrap());
    assert_eq!(store.height_of(&chain[2].hash()).unwrap(), Some(2));

    let (_, height) = store.head().unwrap().unwrap();
    assert_eq!(height, 2);
}

fn invalid_blocks_are_rejected<S: Store>(store: &S) {
    let mut block = test_block(Hash::zero(), 7);
    block.header.merkle_root = Hash::zero();

    assert_eq!(store.store_block(block.clone()).unwrap(), BlockStored::Invalid);
    assert!(!store.has(ObjectKind::Block, &block.hash()).unwrap());
}

fn tx_storage_is_idempotent<S: Store>(store: &S) {
    let tx = Tx::new(
        vec![TxIn::new(OutPoint::null(), vec![0x01, 0xAB])],
        vec![TxOut::new(1, vec![0x51])],
    );
    let hash = tx.hash();

    assert_eq!(store.store_tx(tx.clone()).unwrap(), TxStored::New);
    assert_eq!(store.store_tx(tx).unwrap(), TxStored::Existing);
    assert!(store.has(ObjectKind::Tx, &hash).unwrap());
    assert_eq!(store.get_tx(&hash).unwrap().unwrap().hash(), hash);
}

fn linear_iteration_walks_the_chain<S: Store>(store: &S) {
    let chain = test_chain(4);
    for block in &chain {
        store.store_block(block.clone()).unwrap();
    }

    let mut current = store.block_at_height(0).unwrap().unwrap();
    let mut seen = vec![current.hash()];

    while let Some(next) = store.next_block(&current).unwrap() {
        seen.push(next.hash());
        current = next;
    }

    let expected: Vec<_> = chain.iter().map(Block::hash).collect();
    assert_eq!(seen, expected);
}
