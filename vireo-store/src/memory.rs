//! The in-memory reference backend.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{debug, warn};
use vireo_crypto::hash::Hash;
use vireo_primitives::{Block, Tx};

use crate::{BlockStored, ObjectKind, Store, StoreError, TxStored};

#[derive(Default)]
struct Inner {
    blocks: HashMap<Hash<32>, Block>,
    /// Main chain: height to block hash, contiguous from zero.
    heights: HashMap<u32, Hash<32>>,
    /// Inverse of `heights`.
    index: HashMap<Hash<32>, u32>,
    txs: HashMap<Hash<32>, Tx>,
    /// Blocks whose predecessor has not arrived, keyed by that
    /// predecessor.
    orphans: HashMap<Hash<32>, Vec<Block>>,
}

/// Reference [`Store`] holding everything behind a single mutex.
///
/// Every mutation runs inside one critical section, which is the whole
/// concurrency story the contract asks of a backend.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // a poisoned store means a panic mid-mutation; propagating the
        // panic is the only honest option
        self.inner.lock().expect("store mutex poisoned")
    }
}

impl Inner {
    fn connect(&mut self, block: Block, height: u32) {
        let hash = block.hash();
        self.heights.insert(height, hash);
        self.index.insert(hash, height);
        self.blocks.insert(hash, block);

        // adopt any orphans that were waiting for this block
        if let Some(children) = self.orphans.remove(&hash) {
            for child in children {
                debug!(hash = %child.hash().reversed(), "connecting former orphan");
                self.connect(child, height + 1);
            }
        }
    }
}

impl Store for MemoryStore {
    fn store_block(&self, block: Block) -> Result<BlockStored, StoreError> {
        let hash = block.hash();
        let mut inner = self.lock();

        if inner.blocks.contains_key(&hash) {
            return Ok(BlockStored::Existing);
        }

        // header-only blocks carry no body to validate
        if !block.txs.is_empty() && !block.merkle_root_matches() {
            warn!(hash = %hash.reversed(), "merkle root does not commit to body");
            return Ok(BlockStored::Invalid);
        }

        let height = if block.header.prev_block.is_zero() {
            0
        } else if let Some(prev_height) = inner.index.get(&block.header.prev_block) {
            prev_height + 1
        } else {
            debug!(
                hash = %hash.reversed(),
                prev = %block.header.prev_block.reversed(),
                "predecessor unknown, parking orphan"
            );
            let prev = block.header.prev_block;
            inner.orphans.entry(prev).or_default().push(block);
            return Ok(BlockStored::Orphan);
        };

        inner.connect(block, height);
        Ok(BlockStored::New { height })
    }

    fn store_tx(&self, tx: Tx) -> Result<TxStored, StoreError> {
        let hash = tx.hash();
        let mut inner = self.lock();

        if inner.txs.contains_key(&hash) {
            return Ok(TxStored::Existing);
        }

        inner.txs.insert(hash, tx);
        Ok(TxStored::New)
    }

    fn get_block(&self, hash: &Hash<32>) -> Result<Option<Block>, StoreError> {
        Ok(self.lock().blocks.get(hash).cloned())
    }

    fn get_tx(&self, hash: &Hash<32>) -> Result<Option<Tx>, StoreError> {
        Ok(self.lock().txs.get(hash).cloned())
    }

    fn block_at_height(&self, height: u32) -> Result<Option<Block>, StoreError> {
        let inner = self.lock();
        let Some(hash) = inner.heights.get(&height) else {
            return Ok(None);
        };

        let block = inner
            .blocks
            .get(hash)
            .cloned()
            .ok_or_else(|| StoreError::Corrupt(format!("height {height} points at a missing block")))?;

        Ok(Some(block))
    }

    fn head(&self) -> Result<Option<(Block, u32)>, StoreError> {
        let inner = self.lock();
        let Some(max) = inner.heights.keys().max().copied() else {
            return Ok(None);
        };

        let hash = &inner.heights[&max];
        let block = inner
            .blocks
            .get(hash)
            .cloned()
            .ok_or_else(|| StoreError::Corrupt(format!("tip at {max} points at a missing block")))?;

        Ok(Some((block, max)))
    }

    fn has(&self, kind: ObjectKind, hash: &Hash<32>) -> Result<bool, StoreError> {
        let inner = self.lock();
        Ok(match kind {
            ObjectKind::Block => inner.blocks.contains_key(hash),
            ObjectKind::Tx => inner.txs.contains_key(hash),
        })
    }

    fn next_block(&self, block: &Block) -> Result<Option<Block>, StoreError> {
        let inner = self.lock();
        let Some(height) = inner.index.get(&block.hash()) else {
            return Ok(None);
        };

        let Some(hash) = inner.heights.get(&(height + 1)) else {
            return Ok(None);
        };

        Ok(inner.blocks.get(hash).cloned())
    }

    fn height_of(&self, hash: &Hash<32>) -> Result<Option<u32>, StoreError> {
        Ok(self.lock().index.get(hash).copied())
    }
}
