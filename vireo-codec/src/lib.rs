//! Shared wire (de)serialization interface across all Vireo crates
//!
//! Everything on the Bitcoin wire is little-endian integers, length-prefixed
//! byte strings and variable-length integers. This crate provides the cursor
//! and buffer primitives plus the [`WireEncode`]/[`WireDecode`] traits that
//! the concrete types in `vireo-primitives` and `vireo-network` implement.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

/// Scripts embedded in transactions may not exceed this many bytes.
pub const MAX_SCRIPT_SIZE: usize = 10_000;

/// Upper bound on the transaction count a single block may declare.
pub const MAX_BLOCK_TXS: u64 = 65_536;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("input ended before the value was complete")]
    Truncated,

    #[error("variable-length integer is malformed")]
    MalformedVarInt,

    #[error("script of {0} bytes exceeds the {MAX_SCRIPT_SIZE} byte limit")]
    ScriptTooLarge(usize),

    #[error("block declares {0} transactions, more than the {MAX_BLOCK_TXS} allowed")]
    TooManyTxs(u64),

    #[error("{0} bytes left over after decoding")]
    TrailingBytes(usize),
}

/// A cursor over a borrowed byte buffer.
///
/// All `read_*` methods advance the cursor and fail with
/// [`Error::Truncated`] when the buffer runs out.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], Error> {
        if self.remaining() < n {
            return Err(Error::Truncated);
        }

        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], Error> {
        self.take(n)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], Error> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, Error> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32, Error> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64, Error> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    pub fn read_i64(&mut self) -> Result<i64, Error> {
        Ok(LittleEndian::read_i64(self.take(8)?))
    }

    /// Decode a Bitcoin variable-length integer.
    ///
    /// First byte below 0xFD is the value itself; 0xFD/0xFE/0xFF announce a
    /// 2/4/8 byte little-endian integer. Truncation inside the announced
    /// width is [`Error::MalformedVarInt`].
    pub fn read_varint(&mut self) -> Result<u64, Error> {
        let lead = self.read_u8()?;

        let value = match lead {
            0xFD => self.read_u16().map_err(|_| Error::MalformedVarInt)? as u64,
            0xFE => self.read_u32().map_err(|_| Error::MalformedVarInt)? as u64,
            0xFF => self.read_u64().map_err(|_| Error::MalformedVarInt)?,
            b => b as u64,
        };

        Ok(value)
    }

    /// A varint length prefix followed by that many raw bytes.
    pub fn read_var_bytes(&mut self) -> Result<&'a [u8], Error> {
        let len = self.read_varint()?;

        if len > self.remaining() as u64 {
            return Err(Error::Truncated);
        }

        self.take(len as usize)
    }
}

/// Mirrored `put_*` methods over a plain `Vec<u8>`.
///
/// Encoding the Bitcoin wire format cannot fail, so the sink is just a
/// growable buffer.
pub trait Writer {
    fn put_u8(&mut self, v: u8);
    fn put_u16(&mut self, v: u16);
    fn put_u32(&mut self, v: u32);
    fn put_u64(&mut self, v: u64);
    fn put_i64(&mut self, v: i64);
    fn put_bytes(&mut self, v: &[u8]);
    fn put_varint(&mut self, v: u64);
    fn put_var_bytes(&mut self, v: &[u8]);
}

impl Writer for Vec<u8> {
    fn put_u8(&mut self, v: u8) {
        self.push(v);
    }

    fn put_u16(&mut self, v: u16) {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, v);
        self.extend_from_slice(&buf);
    }

    fn put_u32(&mut self, v: u32) {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, v);
        self.extend_from_slice(&buf);
    }

    fn put_u64(&mut self, v: u64) {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, v);
        self.extend_from_slice(&buf);
    }

    fn put_i64(&mut self, v: i64) {
        let mut buf = [0u8; 8];
        LittleEndian::write_i64(&mut buf, v);
        self.extend_from_slice(&buf);
    }

    fn put_bytes(&mut self, v: &[u8]) {
        self.extend_from_slice(v);
    }

    /// Shortest-form varint encoding.
    fn put_varint(&mut self, v: u64) {
        match v {
            0..=0xFC => self.put_u8(v as u8),
            0xFD..=0xFFFF => {
                self.put_u8(0xFD);
                self.put_u16(v as u16);
            }
            0x1_0000..=0xFFFF_FFFF => {
                self.put_u8(0xFE);
                self.put_u32(v as u32);
            }
            _ => {
                self.put_u8(0xFF);
                self.put_u64(v);
            }
        }
    }

    fn put_var_bytes(&mut self, v: &[u8]) {
        self.put_varint(v.len() as u64);
        self.put_bytes(v);
    }
}

pub trait WireDecode: Sized {
    fn decode(r: &mut Reader) -> Result<Self, Error>;
}

pub trait WireEncode {
    fn encode(&self, w: &mut Vec<u8>);
}

/// Anything that can travel the wire in both directions.
pub trait Fragment: WireEncode + WireDecode {}

impl<T> Fragment for T where T: WireEncode + WireDecode {}

/// Encode a value into a fresh buffer.
pub fn to_bytes<T: WireEncode>(value: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    value.encode(&mut buf);
    buf
}

/// Decode a value that must span the whole input.
pub fn from_bytes<T: WireDecode>(bytes: &[u8]) -> Result<T, Error> {
    let mut reader = Reader::new(bytes);
    let value = T::decode(&mut reader)?;

    if !reader.is_empty() {
        return Err(Error::TrailingBytes(reader.remaining()));
    }

    Ok(value)
}
