//! Rust-native building blocks for the Bitcoin protocol
//!
//! Vireo is a collection of modules re-implementing the core of the
//! Bitcoin protocol in native Rust: the consensus wire codec, the Script
//! interpreter and a peer-to-peer node over a pluggable storage
//! interface. It provides no particular application; it is meant as a
//! base layer for explorers, wallets and other higher-level use-cases.

#[doc(inline)]
pub use vireo_codec as codec;

#[doc(inline)]
pub use vireo_crypto as crypto;

#[doc(inline)]
pub use vireo_primitives as primitives;

#[doc(inline)]
pub use vireo_script as script;

#[doc(inline)]
pub use vireo_store as store;

#[doc(inline)]
pub use vireo_network as network;
