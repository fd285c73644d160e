//! Wire messages: the 24-byte envelope and the typed payloads behind it.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use byteorder::{BigEndian, ByteOrder};
use vireo_codec::{Error as CodecError, Reader, WireDecode, WireEncode, Writer};
use vireo_crypto::hash::{sha256d, Hash};
use vireo_primitives::{Block, BlockHeader, Network, Tx};

use crate::Error;

/// Protocol version this stack speaks.
pub const PROTOCOL_VERSION: u32 = 60001;

/// User agent advertised in the version handshake.
pub const USER_AGENT: &str = "/vireo:0.1.0/";

pub const HEADER_LEN: usize = 24;

/// Hard cap on a single payload, matching the reference relay limit.
pub const MAX_PAYLOAD: usize = 32 * 1024 * 1024;

/// The fixed envelope in front of every payload: magic, NUL-padded
/// command, payload length, payload checksum.
#[derive(Debug)]
pub struct Header {
    pub magic: [u8; 4],
    pub command: [u8; 12],
    pub length: u32,
    pub checksum: [u8; 4],
}

impl Header {
    pub fn command_str(&self) -> &str {
        let end = self
            .command
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(self.command.len());
        std::str::from_utf8(&self.command[..end]).unwrap_or("")
    }
}

impl From<&[u8]> for Header {
    fn from(value: &[u8]) -> Self {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&value[0..4]);

        let mut command = [0u8; 12];
        command.copy_from_slice(&value[4..16]);

        let length = byteorder::LittleEndian::read_u32(&value[16..20]);

        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&value[20..24]);

        Self {
            magic,
            command,
            length,
            checksum,
        }
    }
}

impl From<&Header> for [u8; 24] {
    fn from(value: &Header) -> Self {
        let mut out = [0u8; 24];
        out[0..4].copy_from_slice(&value.magic);
        out[4..16].copy_from_slice(&value.command);
        byteorder::LittleEndian::write_u32(&mut out[16..20], value.length);
        out[20..24].copy_from_slice(&value.checksum);
        out
    }
}

/// First four bytes of the double-SHA256 of the payload.
fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = sha256d(payload);
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest[..4]);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvKind {
    Tx,
    Block,
}

/// A `(kind, hash)` inventory identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InvEntry {
    pub kind: InvKind,
    pub hash: Hash<32>,
}

impl InvEntry {
    pub fn tx(hash: Hash<32>) -> Self {
        Self {
            kind: InvKind::Tx,
            hash,
        }
    }

    pub fn block(hash: Hash<32>) -> Self {
        Self {
            kind: InvKind::Block,
            hash,
        }
    }
}

impl WireDecode for InvEntry {
    fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        let kind = match r.read_u32()? {
            2 => InvKind::Block,
            // 0 is the error kind; anything newer degrades to tx
            _ => InvKind::Tx,
        };
        let hash = Hash::new(r.read_array::<32>()?);
        Ok(Self { kind, hash })
    }
}

impl WireEncode for InvEntry {
    fn encode(&self, w: &mut Vec<u8>) {
        w.put_u32(match self.kind {
            InvKind::Tx => 1,
            InvKind::Block => 2,
        });
        w.put_bytes(self.hash.as_ref());
    }
}

/// A network endpoint as embedded in version and addr payloads:
/// services, IPv6-mapped address big-endian, port big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetAddr {
    pub services: u64,
    pub ip: IpAddr,
    pub port: u16,
}

impl NetAddr {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            services: 1,
            ip: addr.ip(),
            port: addr.port(),
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl WireDecode for NetAddr {
    fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        let services = r.read_u64()?;
        let raw = r.read_array::<16>()?;
        let v6 = Ipv6Addr::from(raw);

        let ip = match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        };

        let mut port_raw = [0u8; 2];
        port_raw.copy_from_slice(r.read_bytes(2)?);
        let port = BigEndian::read_u16(&port_raw);

        Ok(Self { services, ip, port })
    }
}

impl WireEncode for NetAddr {
    fn encode(&self, w: &mut Vec<u8>) {
        w.put_u64(self.services);

        let v6 = match self.ip {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        w.put_bytes(&v6.octets());

        let mut port_raw = [0u8; 2];
        BigEndian::write_u16(&mut port_raw, self.port);
        w.put_bytes(&port_raw);
    }
}

/// An address-book entry as relayed in `addr` payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrEntry {
    /// Last-seen unix time claimed by the relaying peer.
    pub time: u32,
    pub addr: NetAddr,
}

impl WireDecode for AddrEntry {
    fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        Ok(Self {
            time: r.read_u32()?,
            addr: NetAddr::decode(r)?,
        })
    }
}

impl WireEncode for AddrEntry {
    fn encode(&self, w: &mut Vec<u8>) {
        w.put_u32(self.time);
        self.addr.encode(w);
    }
}

/// The version handshake payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    pub version: u32,
    pub services: u64,
    pub timestamp: i64,
    pub receiver: NetAddr,
    pub sender: NetAddr,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: u32,
}

impl WireDecode for VersionMessage {
    fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        Ok(Self {
            version: r.read_u32()?,
            services: r.read_u64()?,
            timestamp: r.read_i64()?,
            receiver: NetAddr::decode(r)?,
            sender: NetAddr::decode(r)?,
            nonce: r.read_u64()?,
            user_agent: String::from_utf8_lossy(r.read_var_bytes()?).into_owned(),
            start_height: r.read_u32()?,
        })
    }
}

impl WireEncode for VersionMessage {
    fn encode(&self, w: &mut Vec<u8>) {
        w.put_u32(self.version);
        w.put_u64(self.services);
        w.put_i64(self.timestamp);
        self.receiver.encode(w);
        self.sender.encode(w);
        w.put_u64(self.nonce);
        w.put_var_bytes(self.user_agent.as_bytes());
        w.put_u32(self.start_height);
    }
}

/// Block locator for `getblocks`/`getheaders`: newest-first known
/// hashes plus a stop hash (zero for "as many as you have").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locator {
    pub version: u32,
    pub have: Vec<Hash<32>>,
    pub stop: Hash<32>,
}

impl Locator {
    pub fn new(have: Vec<Hash<32>>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            have,
            stop: Hash::zero(),
        }
    }
}

impl WireDecode for Locator {
    fn decode(r: &mut Reader) -> Result<Self, CodecError> {
        let version = r.read_u32()?;
        let count = r.read_varint()?;

        let mut have = Vec::with_capacity(count.min(64) as usize);
        for _ in 0..count {
            have.push(Hash::new(r.read_array::<32>()?));
        }

        let stop = Hash::new(r.read_array::<32>()?);

        Ok(Self {
            version,
            have,
            stop,
        })
    }
}

impl WireEncode for Locator {
    fn encode(&self, w: &mut Vec<u8>) {
        w.put_u32(self.version);
        w.put_varint(self.have.len() as u64);
        for hash in &self.have {
            w.put_bytes(hash.as_ref());
        }
        w.put_bytes(self.stop.as_ref());
    }
}

fn decode_vec<T: WireDecode>(r: &mut Reader) -> Result<Vec<T>, CodecError> {
    let count = r.read_varint()?;
    let mut out = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        out.push(T::decode(r)?);
    }
    Ok(out)
}

fn encode_vec<T: WireEncode>(items: &[T], w: &mut Vec<u8>) {
    w.put_varint(items.len() as u64);
    for item in items {
        item.encode(w);
    }
}

/// Every command the node handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(VersionMessage),
    Verack,
    Inv(Vec<InvEntry>),
    GetData(Vec<InvEntry>),
    NotFound(Vec<InvEntry>),
    GetBlocks(Locator),
    GetHeaders(Locator),
    Headers(Vec<BlockHeader>),
    Block(Block),
    Tx(Tx),
    Addr(Vec<AddrEntry>),
    GetAddr,
    Ping(u64),
    Pong(u64),
}

impl Message {
    pub fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => "version",
            Message::Verack => "verack",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::NotFound(_) => "notfound",
            Message::GetBlocks(_) => "getblocks",
            Message::GetHeaders(_) => "getheaders",
            Message::Headers(_) => "headers",
            Message::Block(_) => "block",
            Message::Tx(_) => "tx",
            Message::Addr(_) => "addr",
            Message::GetAddr => "getaddr",
            Message::Ping(_) => "ping",
            Message::Pong(_) => "pong",
        }
    }

    fn encode_payload(&self) -> Vec<u8> {
        let mut payload = Vec::new();

        match self {
            Message::Version(version) => version.encode(&mut payload),
            Message::Verack | Message::GetAddr => {}
            Message::Inv(entries) | Message::GetData(entries) | Message::NotFound(entries) => {
                encode_vec(entries, &mut payload)
            }
            Message::GetBlocks(locator) | Message::GetHeaders(locator) => {
                locator.encode(&mut payload)
            }
            Message::Headers(headers) => {
                payload.put_varint(headers.len() as u64);
                for header in headers {
                    header.encode(&mut payload);
                    // headers entries carry an always-zero tx count
                    payload.put_varint(0);
                }
            }
            Message::Block(block) => block.encode(&mut payload),
            Message::Tx(tx) => tx.encode(&mut payload),
            Message::Addr(entries) => encode_vec(entries, &mut payload),
            Message::Ping(nonce) | Message::Pong(nonce) => payload.put_u64(*nonce),
        }

        payload
    }

    /// Decode a payload for a known command; `None` when the command is
    /// not one the node speaks.
    pub fn decode(command: &str, payload: &[u8]) -> Result<Option<Message>, CodecError> {
        let mut r = Reader::new(payload);

        let message = match command {
            "version" => Message::Version(VersionMessage::decode(&mut r)?),
            "verack" => Message::Verack,
            "inv" => Message::Inv(decode_vec(&mut r)?),
            "getdata" => Message::GetData(decode_vec(&mut r)?),
            "notfound" => Message::NotFound(decode_vec(&mut r)?),
            "getblocks" => Message::GetBlocks(Locator::decode(&mut r)?),
            "getheaders" => Message::GetHeaders(Locator::decode(&mut r)?),
            "headers" => {
                let count = r.read_varint()?;
                let mut headers = Vec::with_capacity(count.min(2048) as usize);
                for _ in 0..count {
                    headers.push(BlockHeader::decode(&mut r)?);
                    r.read_varint()?; // discard the tx count
                }
                Message::Headers(headers)
            }
            "block" => Message::Block(Block::decode(&mut r)?),
            "tx" => Message::Tx(Tx::decode(&mut r)?),
            "addr" => Message::Addr(decode_vec(&mut r)?),
            "getaddr" => Message::GetAddr,
            // BIP-31 nonce; pre-BIP pings have an empty payload
            "ping" => Message::Ping(if r.is_empty() { 0 } else { r.read_u64()? }),
            "pong" => Message::Pong(if r.is_empty() { 0 } else { r.read_u64()? }),
            _ => return Ok(None),
        };

        Ok(Some(message))
    }

    /// Envelope plus payload, ready for the socket.
    pub fn to_wire(&self, network: Network) -> Vec<u8> {
        let payload = self.encode_payload();

        let mut command = [0u8; 12];
        let name = self.command().as_bytes();
        command[..name.len()].copy_from_slice(name);

        let header = Header {
            magic: network.magic(),
            command,
            length: payload.len() as u32,
            checksum: checksum(&payload),
        };

        let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
        let raw: [u8; 24] = (&header).into();
        out.extend_from_slice(&raw);
        out.extend_from_slice(&payload);
        out
    }
}

/// A decoded frame: the command and its verified payload.
#[derive(Debug)]
pub struct Frame {
    pub command: String,
    pub payload: Vec<u8>,
}

/// Try to split one whole frame off the front of `buffer`.
///
/// Returns `Ok(None)` when more bytes are needed; on success the frame's
/// bytes are drained from the buffer.
pub fn try_frame(buffer: &mut Vec<u8>, network: Network) -> Result<Option<Frame>, Error> {
    if buffer.len() < HEADER_LEN {
        return Ok(None);
    }

    let header = Header::from(&buffer[..HEADER_LEN]);

    if header.magic != network.magic() {
        return Err(Error::BadMagic(header.magic));
    }

    let length = header.length as usize;
    if length > MAX_PAYLOAD {
        return Err(Error::OversizedPayload(length));
    }

    if buffer.len() < HEADER_LEN + length {
        return Ok(None);
    }

    let command = header.command_str().to_string();
    let payload: Vec<u8> = buffer
        .drain(..HEADER_LEN + length)
        .skip(HEADER_LEN)
        .collect();

    if checksum(&payload) != header.checksum {
        return Err(Error::BadChecksum(command));
    }

    Ok(Some(Frame { command, payload }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn sample_version() -> VersionMessage {
        VersionMessage {
            version: PROTOCOL_VERSION,
            services: 1,
            timestamp: 1_322_100_000,
            receiver: NetAddr {
                services: 1,
                ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
                port: 8333,
            },
            sender: NetAddr {
                services: 1,
                ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
                port: 8333,
            },
            nonce: 0xDEADBEEF,
            user_agent: USER_AGENT.to_string(),
            start_height: 0,
        }
    }

    fn roundtrip(message: Message) {
        let wire = message.to_wire(Network::Mainnet);

        let mut buffer = wire.clone();
        let frame = try_frame(&mut buffer, Network::Mainnet).unwrap().unwrap();
        assert!(buffer.is_empty());
        assert_eq!(frame.command, message.command());

        let decoded = Message::decode(&frame.command, &frame.payload)
            .unwrap()
            .unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn envelope_roundtrips_all_commands() {
        let genesis = Network::Mainnet.genesis_block();
        let tx = genesis.txs[0].clone();
        let hash = genesis.hash();

        roundtrip(Message::Version(sample_version()));
        roundtrip(Message::Verack);
        roundtrip(Message::Inv(vec![
            InvEntry::block(hash),
            InvEntry::tx(tx.hash()),
        ]));
        roundtrip(Message::GetData(vec![InvEntry::block(hash)]));
        roundtrip(Message::NotFound(vec![InvEntry::tx(tx.hash())]));
        roundtrip(Message::GetBlocks(Locator::new(vec![hash])));
        roundtrip(Message::GetHeaders(Locator::new(vec![hash])));
        roundtrip(Message::Headers(vec![genesis.header]));
        roundtrip(Message::Block(genesis.clone()));
        roundtrip(Message::Tx(tx));
        roundtrip(Message::Addr(vec![AddrEntry {
            time: 1_322_100_000,
            addr: NetAddr {
                services: 1,
                ip: IpAddr::V6(Ipv6Addr::LOCALHOST),
                port: 18333,
            },
        }]));
        roundtrip(Message::GetAddr);
        roundtrip(Message::Ping(7));
        roundtrip(Message::Pong(7));
    }

    #[test]
    fn partial_frames_wait_for_more() {
        let wire = Message::Ping(1).to_wire(Network::Mainnet);

        let mut buffer = wire[..HEADER_LEN - 1].to_vec();
        assert!(try_frame(&mut buffer, Network::Mainnet).unwrap().is_none());

        let mut buffer = wire[..HEADER_LEN + 2].to_vec();
        assert!(try_frame(&mut buffer, Network::Mainnet).unwrap().is_none());
    }

    #[test]
    fn two_frames_in_one_buffer() {
        let mut buffer = Message::Ping(1).to_wire(Network::Mainnet);
        buffer.extend(Message::Pong(1).to_wire(Network::Mainnet));

        let first = try_frame(&mut buffer, Network::Mainnet).unwrap().unwrap();
        assert_eq!(first.command, "ping");

        let second = try_frame(&mut buffer, Network::Mainnet).unwrap().unwrap();
        assert_eq!(second.command, "pong");
        assert!(buffer.is_empty());
    }

    #[test]
    fn foreign_magic_is_rejected() {
        let mut wire = Message::Ping(1).to_wire(Network::Testnet);
        let err = try_frame(&mut wire, Network::Mainnet).unwrap_err();
        assert!(matches!(err, Error::BadMagic(_)));
    }

    #[test]
    fn corrupt_payload_is_rejected() {
        let mut wire = Message::Ping(1).to_wire(Network::Mainnet);
        let last = wire.len() - 1;
        wire[last] ^= 0xFF;

        let err = try_frame(&mut wire, Network::Mainnet).unwrap_err();
        assert!(matches!(err, Error::BadChecksum(_)));
    }

    #[test]
    fn unknown_commands_decode_to_none() {
        assert_eq!(Message::decode("mempool", &[]).unwrap(), None);
    }

    #[test]
    fn netaddr_maps_ipv4() {
        let addr = NetAddr {
            services: 1,
            ip: IpAddr::V4(Ipv4Addr::new(192, 168, 1, 7)),
            port: 8333,
        };

        let raw = vireo_codec::to_bytes(&addr);
        assert_eq!(raw.len(), 26);
        // 10 zero bytes, 0xFFFF, then the v4 octets
        assert_eq!(&raw[8..20], &[0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xFF, 0xFF]);
        assert_eq!(&raw[20..24], &[192, 168, 1, 7]);
        // big-endian port
        assert_eq!(&raw[24..26], &[0x20, 0x8D]);

        let decoded: NetAddr = vireo_codec::from_bytes(&raw).unwrap();
        assert_eq!(decoded, addr);
    }
}
