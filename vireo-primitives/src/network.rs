use vireo_crypto::hash::Hash;

use crate::block::Block;

/// Chain selection: per-network wire magic, address versions, seeds and
/// genesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

const GENESIS_RAW_MAINNET: &str = "0100000000000000000000000000000000000000000000000000000000000000000000003ba3edfd7a7b12b27ac72c3e67768f617fc81bc3888a51323a9fb8aa4b1e5e4a29ab5f49ffff001d1dac2b7c0101000000010000000000000000000000000000000000000000000000000000000000000000ffffffff4d04ffff001d0104455468652054696d65732030332f4a616e2f32303039204368616e63656c6c6f72206f6e206272696e6b206f66207365636f6e64206261696c6f757420666f722062616e6b73ffffffff0100f2052a01000000434104678afdb0fe5548271967f1a67130b7105cd6a828e03909a67962e0ea1f61deb649f6bc3f4cef38c4f35504e51ec112de5c384df7ba0b8d578a4c702b6bf11d5fac00000000";

impl Network {
    /// The four magic bytes opening every wire message.
    pub fn magic(&self) -> [u8; 4] {
        match self {
            Network::Mainnet => [0xF9, 0xBE, 0xB4, 0xD9],
            Network::Testnet => [0x0B, 0x11, 0x09, 0x07],
        }
    }

    /// Version byte for pay-to-pubkey-hash addresses.
    pub fn address_version(&self) -> u8 {
        match self {
            Network::Mainnet => 0x00,
            Network::Testnet => 0x6F,
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Network::Mainnet => 8333,
            Network::Testnet => 18333,
        }
    }

    pub fn dns_seeds(&self) -> &'static [&'static str] {
        match self {
            Network::Mainnet => &[
                "seed.bitcoin.sipa.be",
                "dnsseed.bluematt.me",
                "dnsseed.bitcoin.dashjr.org",
                "seed.bitcoinstats.com",
            ],
            Network::Testnet => &[
                "testnet-seed.bitcoin.jonasschnelli.ch",
                "seed.tbtc.petertodd.org",
            ],
        }
    }

    /// Canonical serialization of the genesis block.
    pub fn genesis_raw(&self) -> &'static str {
        // testnet reuses the mainnet body with different header fields,
        // see genesis_block
        GENESIS_RAW_MAINNET
    }

    /// The network's genesis block, fully decoded.
    pub fn genesis_block(&self) -> Block {
        let raw = hex::decode(self.genesis_raw()).expect("genesis constant");
        let mut block: Block = vireo_codec::from_bytes(&raw).expect("genesis constant");

        if let Network::Testnet = self {
            block.header.time = 1_296_688_602;
            block.header.nonce = 414_098_458;
        }

        block
    }

    pub fn genesis_hash(&self) -> Hash<32> {
        self.genesis_block().hash()
    }
}
