mod hash;
mod hasher;

pub use hash::Hash;
pub use hasher::{hash160, ripemd160, sha1, sha256, sha256d, Hasher};
