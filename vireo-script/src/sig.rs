//! Real ECDSA signature verification for the interpreter callback.
//!
//! Only compiled with the `secp256k1` feature; the interpreter itself
//! never depends on curve arithmetic.

use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, SECP256K1};

/// A [`crate::eval_spend`] verifier checking DER signatures over the
/// given 32-byte signature hash.
///
/// The hash-type byte is accepted as-is; computing the digest for a
/// particular hash type is the caller's business.
pub fn verifier(sighash: [u8; 32]) -> impl FnMut(&[u8], &[u8], u8) -> bool {
    move |pubkey, der, _hash_type| {
        let Ok(pubkey) = PublicKey::from_slice(pubkey) else {
            return false;
        };
        let Ok(signature) = Signature::from_der(der) else {
            return false;
        };
        let Ok(message) = Message::from_digest_slice(&sighash) else {
            return false;
        };

        SECP256K1.verify_ecdsa(&message, &signature, &pubkey).is_ok()
    }
}
