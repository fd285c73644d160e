//! Bitcoin peer-to-peer networking stack using async IO
//!
//! The [`node::Node`] owns a cohort of peers, keeps the attached
//! [`vireo_store::Store`] converging toward the network's best chain
//! through a two-queue download pipeline, and publishes stored objects on
//! a broadcast channel. All cohort state lives on a single event-loop
//! task; only store application and DNS resolution leave it.

pub mod addrbook;
pub mod config;
pub mod invcache;
pub mod message;
pub mod node;
pub mod peer;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error")]
    Io(#[from] std::io::Error),

    #[error("message opens with foreign magic {}", hex::encode(.0))]
    BadMagic([u8; 4]),

    #[error("payload checksum mismatch for `{0}`")]
    BadChecksum(String),

    #[error("payload of {0} bytes exceeds the protocol limit")]
    OversizedPayload(usize),

    #[error("malformed payload")]
    Decode(#[from] vireo_codec::Error),

    #[error("peer announced our own nonce, connected to self")]
    ConnectedToSelf,

    #[error("handshake did not complete in time")]
    HandshakeTimeout,

    #[error("peer channel closed")]
    ChannelClosed,

    #[error("invalid configuration: {0}")]
    Config(String),
}
