use crate::hash::Hash;
use cryptoxide::digest::Digest as _;
use cryptoxide::ripemd160::Ripemd160;
use cryptoxide::sha1::Sha1;
use cryptoxide::sha2::Sha256;

/// Streaming double-SHA256, the digest behind every Bitcoin identifier.
///
/// Feed the canonical serialization of a header or transaction through
/// [`Hasher::input`] and call [`Hasher::finalize`] to obtain the wire-order
/// identifier.
///
/// ```
/// # use vireo_crypto::hash::Hasher;
/// let mut hasher = Hasher::new();
/// hasher.input(b"hello");
/// let digest = hasher.finalize();
/// # assert_eq!(
/// #   "9595c9df90075148eb06860365df33584b75bff782a510c6cd4883a419833d50",
/// #   hex::encode(digest)
/// # );
/// ```
pub struct Hasher(Sha256);

impl Hasher {
    #[inline]
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    /// update the [`Hasher`] with the given input bytes
    #[inline]
    pub fn input(&mut self, bytes: &[u8]) {
        self.0.input(bytes);
    }

    /// consume the [`Hasher`] and return the double-SHA256 digest
    pub fn finalize(mut self) -> Hash<32> {
        let mut first = [0; 32];
        self.0.result(&mut first);

        let mut second = Sha256::new();
        second.input(&first);

        let mut out = [0; 32];
        second.result(&mut out);
        Hash::new(out)
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Single SHA-256 of the given bytes.
pub fn sha256(bytes: &[u8]) -> Hash<32> {
    let mut digest = Sha256::new();
    digest.input(bytes);

    let mut out = [0; 32];
    digest.result(&mut out);
    Hash::new(out)
}

/// Double SHA-256 of the given bytes.
pub fn sha256d(bytes: &[u8]) -> Hash<32> {
    let mut hasher = Hasher::new();
    hasher.input(bytes);
    hasher.finalize()
}

/// SHA-1 of the given bytes.
pub fn sha1(bytes: &[u8]) -> Hash<20> {
    let mut digest = Sha1::new();
    digest.input(bytes);

    let mut out = [0; 20];
    digest.result(&mut out);
    Hash::new(out)
}

/// RIPEMD-160 of the given bytes.
pub fn ripemd160(bytes: &[u8]) -> Hash<20> {
    let mut digest = Ripemd160::new();
    digest.input(bytes);

    let mut out = [0; 20];
    digest.result(&mut out);
    Hash::new(out)
}

/// RIPEMD-160 of the SHA-256 of the given bytes, the address digest.
pub fn hash160(bytes: &[u8]) -> Hash<20> {
    ripemd160(sha256(bytes).as_ref())
}
