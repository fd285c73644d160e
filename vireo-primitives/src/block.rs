use vireo_codec::{Error, Reader, WireDecode, WireEncode, Writer, MAX_BLOCK_TXS};
use vireo_crypto::hash::{sha256d, Hash};

use crate::merkle::merkle_root;
use crate::tx::Tx;

/// The fixed 80-byte block header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_block: Hash<32>,
    pub merkle_root: Hash<32>,
    /// Unix seconds.
    pub time: u32,
    /// Compact difficulty target.
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub const SIZE: usize = 80;

    /// Version bit announcing a merged-mining proof after the header.
    pub const VERSION_AUXPOW: u32 = 0x100;

    /// The wire-order block identifier, a pure function of the header.
    pub fn hash(&self) -> Hash<32> {
        sha256d(&vireo_codec::to_bytes(self))
    }

    pub fn has_aux_pow(&self) -> bool {
        self.version & Self::VERSION_AUXPOW != 0
    }
}

impl WireDecode for BlockHeader {
    fn decode(r: &mut Reader) -> Result<Self, Error> {
        Ok(Self {
            version: r.read_u32()?,
            prev_block: Hash::new(r.read_array::<32>()?),
            merkle_root: Hash::new(r.read_array::<32>()?),
            time: r.read_u32()?,
            bits: r.read_u32()?,
            nonce: r.read_u32()?,
        })
    }
}

impl WireEncode for BlockHeader {
    fn encode(&self, w: &mut Vec<u8>) {
        w.put_u32(self.version);
        w.put_bytes(self.prev_block.as_ref());
        w.put_bytes(self.merkle_root.as_ref());
        w.put_u32(self.time);
        w.put_u32(self.bits);
        w.put_u32(self.nonce);
    }
}

/// A path through a merkle tree plus the side mask selecting left/right.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleBranch {
    pub hashes: Vec<Hash<32>>,
    pub side_mask: u32,
}

impl WireDecode for MerkleBranch {
    fn decode(r: &mut Reader) -> Result<Self, Error> {
        let count = r.read_varint()?;
        let mut hashes = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            hashes.push(Hash::new(r.read_array::<32>()?));
        }
        let side_mask = r.read_u32()?;

        Ok(Self { hashes, side_mask })
    }
}

impl WireEncode for MerkleBranch {
    fn encode(&self, w: &mut Vec<u8>) {
        w.put_varint(self.hashes.len() as u64);
        for hash in &self.hashes {
            w.put_bytes(hash.as_ref());
        }
        w.put_u32(self.side_mask);
    }
}

/// Merged-mining proof-of-work carried between the header and the
/// transaction count when [`BlockHeader::VERSION_AUXPOW`] is set.
///
/// The structure is parsed in full so that re-encoding reproduces the
/// original bytes exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuxPow {
    pub coinbase_tx: Tx,
    pub parent_hash: Hash<32>,
    pub coinbase_branch: MerkleBranch,
    pub chain_branch: MerkleBranch,
    pub parent_header: BlockHeader,
}

impl WireDecode for AuxPow {
    fn decode(r: &mut Reader) -> Result<Self, Error> {
        Ok(Self {
            coinbase_tx: Tx::decode(r)?,
            parent_hash: Hash::new(r.read_array::<32>()?),
            coinbase_branch: MerkleBranch::decode(r)?,
            chain_branch: MerkleBranch::decode(r)?,
            parent_header: BlockHeader::decode(r)?,
        })
    }
}

impl WireEncode for AuxPow {
    fn encode(&self, w: &mut Vec<u8>) {
        self.coinbase_tx.encode(w);
        w.put_bytes(self.parent_hash.as_ref());
        self.coinbase_branch.encode(w);
        self.chain_branch.encode(w);
        self.parent_header.encode(w);
    }
}

/// A full block: header, optional merged-mining proof, transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub aux_pow: Option<AuxPow>,
    pub txs: Vec<Tx>,
}

impl Block {
    pub fn new(header: BlockHeader, txs: Vec<Tx>) -> Self {
        Self {
            header,
            aux_pow: None,
            txs,
        }
    }

    /// The wire-order block identifier.
    pub fn hash(&self) -> Hash<32> {
        self.header.hash()
    }

    /// Root of the merkle tree over the transaction hashes in block order.
    pub fn compute_merkle_root(&self) -> Hash<32> {
        let hashes: Vec<_> = self.txs.iter().map(Tx::hash).collect();
        merkle_root(&hashes)
    }

    /// Whether the header commits to the transactions it carries.
    pub fn merkle_root_matches(&self) -> bool {
        self.compute_merkle_root() == self.header.merkle_root
    }
}

impl WireDecode for Block {
    fn decode(r: &mut Reader) -> Result<Self, Error> {
        let header = BlockHeader::decode(r)?;

        let aux_pow = if header.has_aux_pow() {
            Some(AuxPow::decode(r)?)
        } else {
            None
        };

        let n_txs = r.read_varint()?;
        if n_txs > MAX_BLOCK_TXS {
            return Err(Error::TooManyTxs(n_txs));
        }

        let mut txs = Vec::with_capacity(n_txs.min(1024) as usize);
        for _ in 0..n_txs {
            txs.push(Tx::decode(r)?);
        }

        Ok(Self {
            header,
            aux_pow,
            txs,
        })
    }
}

impl WireEncode for Block {
    fn encode(&self, w: &mut Vec<u8>) {
        self.header.encode(w);

        if let Some(aux_pow) = &self.aux_pow {
            aux_pow.encode(w);
        }

        w.put_varint(self.txs.len() as u64);
        for tx in &self.txs {
            tx.encode(w);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use crate::tx::{OutPoint, TxIn, TxOut};
    use vireo_codec::{from_bytes, to_bytes};

    #[test]
    fn genesis_roundtrip() {
        let raw = hex::decode(Network::Mainnet.genesis_raw()).unwrap();
        let block: Block = from_bytes(&raw).unwrap();

        assert_eq!(block.header.version, 1);
        assert!(block.header.prev_block.is_zero());
        assert_eq!(block.header.time, 1_231_006_505);
        assert_eq!(block.header.bits, 0x1d00ffff);
        assert_eq!(block.header.nonce, 2_083_236_893);
        assert_eq!(block.txs.len(), 1);
        assert!(block.txs[0].is_coinbase());

        assert_eq!(
            block.hash().reversed().to_string(),
            "000000000019d6689c085ae165831e934ff763ae46a2a6c172b3f1b60a8ce26f"
        );

        // a single transaction is its own merkle root
        assert_eq!(block.header.merkle_root, block.txs[0].hash());
        assert!(block.merkle_root_matches());

        assert_eq!(to_bytes(&block), raw);
        assert_eq!(from_bytes::<Block>(&to_bytes(&block)).unwrap(), block);
    }

    fn dummy_tx(tag: u8) -> Tx {
        Tx::new(
            vec![TxIn::new(OutPoint::null(), vec![tag])],
            vec![TxOut::new(1, vec![0x51])],
        )
    }

    #[test]
    fn aux_pow_roundtrip() {
        let parent = BlockHeader {
            version: 1,
            prev_block: Hash::zero(),
            merkle_root: Hash::zero(),
            time: 1_321_974_183,
            bits: 0x1d00ffff,
            nonce: 42,
        };

        let header = BlockHeader {
            version: 1 | BlockHeader::VERSION_AUXPOW,
            prev_block: Hash::zero(),
            merkle_root: dummy_tx(1).hash(),
            time: 1_321_974_184,
            bits: 0x1d00ffff,
            nonce: 7,
        };

        let block = Block {
            header,
            aux_pow: Some(AuxPow {
                coinbase_tx: dummy_tx(9),
                parent_hash: parent.hash(),
                coinbase_branch: MerkleBranch {
                    hashes: vec![dummy_tx(2).hash(), dummy_tx(3).hash()],
                    side_mask: 0,
                },
                chain_branch: MerkleBranch {
                    hashes: vec![],
                    side_mask: 0,
                },
                parent_header: parent,
            }),
            txs: vec![dummy_tx(1)],
        };

        let raw = to_bytes(&block);
        let decoded: Block = from_bytes(&raw).unwrap();

        assert_eq!(decoded, block);
        assert_eq!(to_bytes(&decoded), raw);
    }

    #[test]
    fn too_many_txs_is_rejected() {
        let header = BlockHeader {
            version: 1,
            prev_block: Hash::zero(),
            merkle_root: Hash::zero(),
            time: 0,
            bits: 0x1d00ffff,
            nonce: 0,
        };

        let mut raw = to_bytes(&header);
        raw.put_varint(MAX_BLOCK_TXS + 1);

        let err = from_bytes::<Block>(&raw).unwrap_err();
        assert_eq!(err, Error::TooManyTxs(MAX_BLOCK_TXS + 1));
    }

    #[test]
    fn truncated_header_is_rejected() {
        let raw = hex::decode(Network::Mainnet.genesis_raw()).unwrap();
        let err = from_bytes::<Block>(&raw[..79]).unwrap_err();
        assert_eq!(err, Error::Truncated);
    }
}
