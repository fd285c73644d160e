//! Bitcoin block and transaction primitives with their wire codec

mod block;
mod merkle;
mod network;
mod tx;

pub use block::{AuxPow, Block, BlockHeader, MerkleBranch};
pub use merkle::merkle_root;
pub use network::Network;
pub use tx::{OutPoint, Tx, TxIn, TxOut};
