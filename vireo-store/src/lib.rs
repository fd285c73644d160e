//! Blockchain storage: the logical interface the node drives, plus an
//! in-memory reference backend.
//!
//! The node only ever talks to [`Store`]; backends are swapped at node
//! construction. The reference implementation in [`memory`] doubles as
//! the executable contract: any other backend must pass the same
//! [`conformance`] battery.

pub mod conformance;
pub mod memory;

use thiserror::Error;
use vireo_crypto::hash::Hash;
use vireo_primitives::{Block, Tx};

pub use memory::MemoryStore;

/// What kind of object an inventory hash refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Tx,
    Block,
}

/// Result of submitting a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockStored {
    /// Accepted and connected at this height.
    New { height: u32 },
    /// Already present; idempotent no-op.
    Existing,
    /// Predecessor unknown; parked in the orphan pool.
    Orphan,
    /// Fails validation; rejected.
    Invalid,
}

/// Result of submitting a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStored {
    New,
    Existing,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("stored chain is corrupt: {0}")]
    Corrupt(String),
}

/// The persistence contract between the node and any storage backend.
///
/// Implementations provide their own serialization; callers may invoke
/// any operation from any thread.
pub trait Store: Send + Sync {
    /// Persist a block, idempotent on its hash.
    fn store_block(&self, block: Block) -> Result<BlockStored, StoreError>;

    /// Persist a loose transaction, idempotent on its hash.
    fn store_tx(&self, tx: Tx) -> Result<TxStored, StoreError>;

    fn get_block(&self, hash: &Hash<32>) -> Result<Option<Block>, StoreError>;

    fn get_tx(&self, hash: &Hash<32>) -> Result<Option<Tx>, StoreError>;

    fn block_at_height(&self, height: u32) -> Result<Option<Block>, StoreError>;

    /// The current tip with its height, `None` on an empty store.
    fn head(&self) -> Result<Option<(Block, u32)>, StoreError>;

    fn has(&self, kind: ObjectKind, hash: &Hash<32>) -> Result<bool, StoreError>;

    /// The main-chain successor of the given block, for linear traversal
    /// from genesis.
    fn next_block(&self, block: &Block) -> Result<Option<Block>, StoreError>;

    /// Height of the given main-chain block.
    fn height_of(&self, hash: &Hash<32>) -> Result<Option<u32>, StoreError>;
}
