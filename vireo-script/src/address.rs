//! Base58check addresses and their extraction from standard scripts.

use std::fmt;
use std::str::FromStr;

use base58::{FromBase58, ToBase58};
use thiserror::Error;
use vireo_crypto::hash::{hash160, sha256d, Hash};
use vireo_primitives::Network;

use crate::script::Script;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("not valid base58")]
    BadBase58,

    #[error("decoded payload has the wrong length")]
    BadLength,

    #[error("checksum mismatch")]
    BadChecksum,
}

/// A base58check address: version byte plus hash160 digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    pub version: u8,
    pub hash: Hash<20>,
}

impl Address {
    pub fn new(version: u8, hash: Hash<20>) -> Self {
        Self { version, hash }
    }

    /// The address paying to the hash160 of the given public key.
    pub fn from_pubkey(network: Network, pubkey: &[u8]) -> Self {
        Self::new(network.address_version(), hash160(pubkey))
    }

    pub fn from_hash160(network: Network, hash: Hash<20>) -> Self {
        Self::new(network.address_version(), hash)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut payload = Vec::with_capacity(25);
        payload.push(self.version);
        payload.extend_from_slice(self.hash.as_ref());

        let checksum = sha256d(&payload);
        payload.extend_from_slice(&checksum[..4]);

        f.write_str(&payload.to_base58())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let payload = s.from_base58().map_err(|_| AddressError::BadBase58)?;

        if payload.len() != 25 {
            return Err(AddressError::BadLength);
        }

        let (body, checksum) = payload.split_at(21);
        if sha256d(body)[..4] != *checksum {
            return Err(AddressError::BadChecksum);
        }

        let mut hash = [0u8; 20];
        hash.copy_from_slice(&body[1..]);

        Ok(Self {
            version: body[0],
            hash: Hash::new(hash),
        })
    }
}

/// The addresses a standard script pays to, in script order; empty for
/// non-standard scripts.
pub fn extract(script: &Script, network: Network) -> Vec<Address> {
    script
        .payee_hashes()
        .into_iter()
        .map(|hash| Address::from_hash160(network, hash))
        .collect()
}
