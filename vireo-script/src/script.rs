use std::fmt;
use std::str::FromStr;

use vireo_crypto::hash::{hash160, Hash};

use crate::error::ParseError;
use crate::opcode;

/// One element of a parsed script: an opcode or the payload of a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    Op(u8),
    Data(Vec<u8>),
}

/// A parsed script, an ordered list of [`Chunk`]s.
///
/// Parsing from bytes is lossless for unknown opcodes; serialization
/// picks the shortest push form for data chunks.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Script {
    pub chunks: Vec<Chunk>,
}

impl Script {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }

    /// Walk the raw bytes left to right, splitting opcodes from push
    /// payloads. A push whose announced length runs past the end of the
    /// input is an error.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ParseError> {
        let mut chunks = Vec::new();
        let mut pos = 0;

        while pos < bytes.len() {
            let op = bytes[pos];
            pos += 1;

            let push_len = match op {
                1..=75 => Some(op as usize),
                opcode::OP_PUSHDATA1 => {
                    let len = *bytes.get(pos).ok_or(ParseError::TruncatedPush)? as usize;
                    pos += 1;
                    Some(len)
                }
                opcode::OP_PUSHDATA2 => {
                    let raw = bytes.get(pos..pos + 2).ok_or(ParseError::TruncatedPush)?;
                    pos += 2;
                    Some(u16::from_le_bytes([raw[0], raw[1]]) as usize)
                }
                opcode::OP_PUSHDATA4 => {
                    let raw = bytes.get(pos..pos + 4).ok_or(ParseError::TruncatedPush)?;
                    pos += 4;
                    Some(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize)
                }
                _ => None,
            };

            match push_len {
                Some(len) => {
                    let data = bytes.get(pos..pos + len).ok_or(ParseError::TruncatedPush)?;
                    pos += len;
                    chunks.push(Chunk::Data(data.to_vec()));
                }
                None => chunks.push(Chunk::Op(op)),
            }
        }

        Ok(Self { chunks })
    }

    /// Serialize back to script bytes, using the shortest push encoding
    /// for each data chunk.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();

        for chunk in &self.chunks {
            match chunk {
                Chunk::Op(op) => out.push(*op),
                Chunk::Data(data) => match data.len() {
                    0 => out.push(opcode::OP_0),
                    1..=75 => {
                        out.push(data.len() as u8);
                        out.extend_from_slice(data);
                    }
                    76..=0xFF => {
                        out.push(opcode::OP_PUSHDATA1);
                        out.push(data.len() as u8);
                        out.extend_from_slice(data);
                    }
                    0x100..=0xFFFF => {
                        out.push(opcode::OP_PUSHDATA2);
                        out.extend_from_slice(&(data.len() as u16).to_le_bytes());
                        out.extend_from_slice(data);
                    }
                    _ => {
                        out.push(opcode::OP_PUSHDATA4);
                        out.extend_from_slice(&(data.len() as u32).to_le_bytes());
                        out.extend_from_slice(data);
                    }
                },
            }
        }

        out
    }

    /// The standard template this script matches, if any.
    pub fn template(&self) -> Template {
        if let [Chunk::Op(opcode::OP_DUP), Chunk::Op(opcode::OP_HASH160), Chunk::Data(hash), Chunk::Op(opcode::OP_EQUALVERIFY), Chunk::Op(opcode::OP_CHECKSIG)] =
            self.chunks.as_slice()
        {
            if hash.len() == 20 {
                let mut bytes = [0u8; 20];
                bytes.copy_from_slice(hash);
                return Template::P2pkh(Hash::new(bytes));
            }
        }

        if let [Chunk::Data(pubkey), Chunk::Op(opcode::OP_CHECKSIG)] = self.chunks.as_slice() {
            if matches!(pubkey.len(), 33 | 65) {
                return Template::P2pk(pubkey.clone());
            }
        }

        if let Some(template) = self.multisig_template() {
            return template;
        }

        Template::NonStandard
    }

    fn multisig_template(&self) -> Option<Template> {
        let chunks = self.chunks.as_slice();

        if chunks.len() < 4 {
            return None;
        }

        let Chunk::Op(last) = &chunks[chunks.len() - 1] else {
            return None;
        };
        if *last != opcode::OP_CHECKMULTISIG {
            return None;
        }

        let Chunk::Op(m_op) = &chunks[0] else {
            return None;
        };
        let Chunk::Op(n_op) = &chunks[chunks.len() - 2] else {
            return None;
        };

        let m = opcode::small_int(*m_op).filter(|m| *m > 0)? as usize;
        let n = opcode::small_int(*n_op).filter(|n| *n > 0)? as usize;

        let keys: Vec<Vec<u8>> = chunks[1..chunks.len() - 2]
            .iter()
            .map(|chunk| match chunk {
                Chunk::Data(key) => Some(key.clone()),
                Chunk::Op(_) => None,
            })
            .collect::<Option<_>>()?;

        if keys.len() != n || m > n {
            return None;
        }

        Some(Template::Multisig { m, keys })
    }

    /// The hash160 digests a standard script pays to, in script order.
    pub fn payee_hashes(&self) -> Vec<Hash<20>> {
        match self.template() {
            Template::P2pkh(hash) => vec![hash],
            Template::P2pk(key) => vec![hash160(&key)],
            Template::Multisig { keys, .. } => keys.iter().map(|k| hash160(k)).collect(),
            Template::NonStandard => Vec::new(),
        }
    }
}

/// Standard output script shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Template {
    /// `OP_DUP OP_HASH160 <hash160> OP_EQUALVERIFY OP_CHECKSIG`
    P2pkh(Hash<20>),
    /// `<pubkey> OP_CHECKSIG`
    P2pk(Vec<u8>),
    /// `<m> <pubkey>… <n> OP_CHECKMULTISIG`
    Multisig { m: usize, keys: Vec<Vec<u8>> },
    NonStandard,
}

impl fmt::Display for Script {
    /// The canonical one-line notation: opcodes by name, data pushes as
    /// lowercase hex, unknown opcodes as `(opcode N)`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, chunk) in self.chunks.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }

            match chunk {
                Chunk::Op(op) => match opcode::name(*op) {
                    Some(name) => f.write_str(name)?,
                    None => write!(f, "(opcode {op})")?,
                },
                Chunk::Data(data) => f.write_str(&hex::encode(data))?,
            }
        }

        Ok(())
    }
}

impl FromStr for Script {
    type Err = ParseError;

    /// Inverse of the [`fmt::Display`] notation.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chunks = Vec::new();
        let mut tokens = s.split_whitespace().peekable();

        while let Some(token) = tokens.next() {
            if token == "(opcode" {
                let number = tokens.next().ok_or(ParseError::MalformedOpcodeToken)?;
                let number = number
                    .strip_suffix(')')
                    .ok_or(ParseError::MalformedOpcodeToken)?;
                let op: u8 = number
                    .parse()
                    .map_err(|_| ParseError::MalformedOpcodeToken)?;
                chunks.push(Chunk::Op(op));
                continue;
            }

            if let Some(op) = opcode::from_name(token) {
                chunks.push(Chunk::Op(op));
                continue;
            }

            match hex::decode(token) {
                Ok(data) => chunks.push(Chunk::Data(data)),
                Err(_) => return Err(ParseError::UnknownToken(token.to_string())),
            }
        }

        Ok(Self { chunks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_roundtrip() {
        let text = "2 OP_TOALTSTACK 0 OP_TOALTSTACK OP_TUCK OP_CHECKSIG OP_SWAP OP_HASH160 3cd1def404e12a85ead2b4d3f5f9f817fb0d46ef OP_EQUAL OP_BOOLAND OP_FROMALTSTACK OP_ADD";

        let script: Script = text.parse().unwrap();
        assert_eq!(script.to_string(), text);

        let reparsed: Script = script.to_string().parse().unwrap();
        assert_eq!(reparsed, script);
    }

    #[test]
    fn bytes_roundtrip_p2pkh() {
        let raw = hex::decode("76a91417977bca1b6287a5e6559c57ef4b6525e9d7ded688ac").unwrap();
        let script = Script::from_bytes(&raw).unwrap();

        assert_eq!(script.to_bytes(), raw);
        assert_eq!(
            script.to_string(),
            "OP_DUP OP_HASH160 17977bca1b6287a5e6559c57ef4b6525e9d7ded6 OP_EQUALVERIFY OP_CHECKSIG"
        );
    }

    #[test]
    fn unknown_opcode_is_lossless() {
        let script = Script::from_bytes(&[0xBA, 0x51]).unwrap();
        assert_eq!(
            script.chunks,
            vec![Chunk::Op(0xBA), Chunk::Op(opcode::OP_1)]
        );

        assert_eq!(script.to_string(), "(opcode 186) 1");
        let reparsed: Script = script.to_string().parse().unwrap();
        assert_eq!(reparsed, script);
        assert_eq!(reparsed.to_bytes(), vec![0xBA, 0x51]);
    }

    #[test]
    fn pushdata_forms() {
        // direct push
        let mut raw = vec![3u8, 0xAA, 0xBB, 0xCC];
        let script = Script::from_bytes(&raw).unwrap();
        assert_eq!(script.chunks, vec![Chunk::Data(vec![0xAA, 0xBB, 0xCC])]);
        assert_eq!(script.to_bytes(), raw);

        // PUSHDATA1 for 80 bytes
        let data = vec![0x42u8; 80];
        raw = vec![opcode::OP_PUSHDATA1, 80];
        raw.extend_from_slice(&data);
        let script = Script::from_bytes(&raw).unwrap();
        assert_eq!(script.chunks, vec![Chunk::Data(data)]);
        assert_eq!(script.to_bytes(), raw);

        // PUSHDATA2 for 300 bytes
        let data = vec![0x17u8; 300];
        raw = vec![opcode::OP_PUSHDATA2, 0x2C, 0x01];
        raw.extend_from_slice(&data);
        let script = Script::from_bytes(&raw).unwrap();
        assert_eq!(script.chunks, vec![Chunk::Data(data)]);
        assert_eq!(script.to_bytes(), raw);
    }

    #[test]
    fn truncated_push_is_rejected() {
        assert_eq!(
            Script::from_bytes(&[5, 0xAA]),
            Err(ParseError::TruncatedPush)
        );
        assert_eq!(
            Script::from_bytes(&[opcode::OP_PUSHDATA1]),
            Err(ParseError::TruncatedPush)
        );
    }

    #[test]
    fn p2pkh_template_requires_20_bytes() {
        let good = Script::new(vec![
            Chunk::Op(opcode::OP_DUP),
            Chunk::Op(opcode::OP_HASH160),
            Chunk::Data(vec![0x11; 20]),
            Chunk::Op(opcode::OP_EQUALVERIFY),
            Chunk::Op(opcode::OP_CHECKSIG),
        ]);
        assert!(matches!(good.template(), Template::P2pkh(_)));

        let bad = Script::new(vec![
            Chunk::Op(opcode::OP_DUP),
            Chunk::Op(opcode::OP_HASH160),
            Chunk::Data(vec![0x11; 19]),
            Chunk::Op(opcode::OP_EQUALVERIFY),
            Chunk::Op(opcode::OP_CHECKSIG),
        ]);
        assert_eq!(bad.template(), Template::NonStandard);
    }

    #[test]
    fn multisig_template() {
        let keys = [vec![0x02; 33], vec![0x03; 33], vec![0x04; 33]];

        let script = Script::new(vec![
            Chunk::Op(opcode::OP_2),
            Chunk::Data(keys[0].clone()),
            Chunk::Data(keys[1].clone()),
            Chunk::Data(keys[2].clone()),
            Chunk::Op(opcode::OP_3),
            Chunk::Op(opcode::OP_CHECKMULTISIG),
        ]);

        match script.template() {
            Template::Multisig { m, keys: found } => {
                assert_eq!(m, 2);
                assert_eq!(found.len(), 3);
            }
            other => panic!("unexpected template {other:?}"),
        }

        // m above n is not a valid template
        let script = Script::new(vec![
            Chunk::Op(opcode::OP_3),
            Chunk::Data(keys[0].clone()),
            Chunk::Data(keys[1].clone()),
            Chunk::Op(opcode::OP_2),
            Chunk::Op(opcode::OP_CHECKMULTISIG),
        ]);
        assert_eq!(script.template(), Template::NonStandard);
    }
}
