use vireo_codec::{Error, Reader, WireDecode, WireEncode, Writer, MAX_SCRIPT_SIZE};
use vireo_crypto::hash::{sha256d, Hash};

/// Reference to a specific output of a previous transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub hash: Hash<32>,
    pub index: u32,
}

impl OutPoint {
    pub const fn new(hash: Hash<32>, index: u32) -> Self {
        Self { hash, index }
    }

    /// The synthetic outpoint used by coinbase inputs.
    pub const fn null() -> Self {
        Self {
            hash: Hash::zero(),
            index: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.index == u32::MAX && self.hash.is_zero()
    }
}

impl WireDecode for OutPoint {
    fn decode(r: &mut Reader) -> Result<Self, Error> {
        let hash = Hash::new(r.read_array::<32>()?);
        let index = r.read_u32()?;
        Ok(Self { hash, index })
    }
}

impl WireEncode for OutPoint {
    fn encode(&self, w: &mut Vec<u8>) {
        w.put_bytes(self.hash.as_ref());
        w.put_u32(self.index);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    pub prev_out: OutPoint,
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxIn {
    pub const DEFAULT_SEQUENCE: u32 = u32::MAX;

    pub fn new(prev_out: OutPoint, script_sig: Vec<u8>) -> Self {
        Self {
            prev_out,
            script_sig,
            sequence: Self::DEFAULT_SEQUENCE,
        }
    }
}

fn read_script(r: &mut Reader) -> Result<Vec<u8>, Error> {
    let len = r.read_varint()? as usize;

    if len > MAX_SCRIPT_SIZE {
        return Err(Error::ScriptTooLarge(len));
    }

    Ok(r.read_bytes(len)?.to_vec())
}

impl WireDecode for TxIn {
    fn decode(r: &mut Reader) -> Result<Self, Error> {
        let prev_out = OutPoint::decode(r)?;
        let script_sig = read_script(r)?;
        let sequence = r.read_u32()?;

        Ok(Self {
            prev_out,
            script_sig,
            sequence,
        })
    }
}

impl WireEncode for TxIn {
    fn encode(&self, w: &mut Vec<u8>) {
        self.prev_out.encode(w);
        w.put_var_bytes(&self.script_sig);
        w.put_u32(self.sequence);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOut {
    /// Amount in the smallest unit, signed as on the wire.
    pub value: i64,
    pub pk_script: Vec<u8>,
}

impl TxOut {
    pub fn new(value: i64, pk_script: Vec<u8>) -> Self {
        Self { value, pk_script }
    }
}

impl WireDecode for TxOut {
    fn decode(r: &mut Reader) -> Result<Self, Error> {
        let value = r.read_i64()?;
        let pk_script = read_script(r)?;
        Ok(Self { value, pk_script })
    }
}

impl WireEncode for TxOut {
    fn encode(&self, w: &mut Vec<u8>) {
        w.put_i64(self.value);
        w.put_var_bytes(&self.pk_script);
    }
}

/// A Bitcoin transaction.
///
/// Immutable once hashed: the identifier is the double-SHA256 of the
/// canonical serialization, so any mutation changes identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tx {
    pub version: u32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Tx {
    pub fn new(inputs: Vec<TxIn>, outputs: Vec<TxOut>) -> Self {
        Self {
            version: 1,
            inputs,
            outputs,
            lock_time: 0,
        }
    }

    /// The wire-order transaction identifier.
    pub fn hash(&self) -> Hash<32> {
        sha256d(&vireo_codec::to_bytes(self))
    }

    /// A coinbase has exactly one input spending the null outpoint.
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prev_out.is_null()
    }
}

impl WireDecode for Tx {
    fn decode(r: &mut Reader) -> Result<Self, Error> {
        let version = r.read_u32()?;

        let n_inputs = r.read_varint()?;
        let mut inputs = Vec::with_capacity(n_inputs.min(1024) as usize);
        for _ in 0..n_inputs {
            inputs.push(TxIn::decode(r)?);
        }

        let n_outputs = r.read_varint()?;
        let mut outputs = Vec::with_capacity(n_outputs.min(1024) as usize);
        for _ in 0..n_outputs {
            outputs.push(TxOut::decode(r)?);
        }

        let lock_time = r.read_u32()?;

        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }
}

impl WireEncode for Tx {
    fn encode(&self, w: &mut Vec<u8>) {
        w.put_u32(self.version);

        w.put_varint(self.inputs.len() as u64);
        for input in &self.inputs {
            input.encode(w);
        }

        w.put_varint(self.outputs.len() as u64);
        for output in &self.outputs {
            output.encode(w);
        }

        w.put_u32(self.lock_time);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vireo_codec::{from_bytes, to_bytes};

    // tx 6359f0868171b1d194cbee1af2f16ea598ae8fad666d9b012c8ed2b79a236ec4,
    // block 100001, one input one output
    const RAW_TX: &str = "0100000001032e38e9c0a84c6046d687d10556dcacc41d275ec55fc00779ac88fdf357a187000000008c493046022100c352d3dd993a981beba4a63ad15c209275ca9470abfcd57da93b58e4eb5dce82022100840792bc1f456062819f15d33ee7055cf7b5ee1af1ebcc6028d9cdb1c3af7748014104f46db5e9d61a9dc27b8d64ad23e7383a4e6ca164593c2527c038c0857eb67ee8e825dca65046b82c9331586c82e0fd1f633f25f87c161bc6f8a630121df2b3d3ffffffff0200e32321000000001976a914c398efa9c392ba6013c5e04ee729755ef7f58b3288ac000fe208010000001976a914948c765a6914d43f2a7ac177da2c2f6b52de3d7c88ac00000000";

    #[test]
    fn roundtrip_known_tx() {
        let raw = hex::decode(RAW_TX).unwrap();
        let tx: Tx = from_bytes(&raw).unwrap();

        assert_eq!(tx.version, 1);
        assert_eq!(tx.inputs.len(), 1);
        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.lock_time, 0);
        assert_eq!(tx.outputs[0].value, 556_000_000);
        assert!(!tx.is_coinbase());

        assert_eq!(to_bytes(&tx), raw);
        assert_eq!(
            tx.hash().reversed().to_string(),
            "6359f0868171b1d194cbee1af2f16ea598ae8fad666d9b012c8ed2b79a236ec4"
        );
    }

    #[test]
    fn coinbase_detection() {
        let coinbase = Tx::new(
            vec![TxIn::new(OutPoint::null(), vec![0x04, 0xAA, 0xBB, 0xCC, 0xDD])],
            vec![TxOut::new(50_0000_0000, vec![0x51])],
        );
        assert!(coinbase.is_coinbase());

        let spend = Tx::new(
            vec![TxIn::new(OutPoint::new(coinbase.hash(), 0), vec![])],
            vec![TxOut::new(1, vec![0x51])],
        );
        assert!(!spend.is_coinbase());
    }

    #[test]
    fn oversized_script_is_rejected() {
        let mut raw = Vec::new();
        raw.put_u32(1);
        raw.put_varint(1);
        OutPoint::null().encode(&mut raw);
        raw.put_varint(10_001);
        raw.put_bytes(&vec![0u8; 10_001]);

        let err = from_bytes::<Tx>(&raw).unwrap_err();
        assert_eq!(err, vireo_codec::Error::ScriptTooLarge(10_001));
    }
}
