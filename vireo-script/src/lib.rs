//! Bitcoin Script: chunk model, textual notation, stack interpreter and
//! standard-template address extraction
//!
//! The interpreter is consensus-critical; its semantics follow the
//! reference implementation. Signature verification is delegated to a
//! caller-supplied callback so this crate stays free of curve arithmetic
//! (an optional `secp256k1`-backed verifier ships behind the feature of
//! the same name).

pub mod address;
mod error;
mod interpreter;
mod num;
pub mod opcode;
mod script;
mod stack;

#[cfg(feature = "secp256k1")]
pub mod sig;

pub use error::{ExecError, ParseError};
pub use interpreter::{eval_script, eval_spend, Outcome, Rules, MAX_OPS_PER_SCRIPT};
pub use script::{Chunk, Script, Template};
pub use stack::{MAX_ELEMENT_SIZE, MAX_STACK_DEPTH};

/// Scripts above this size fail before execution starts.
///
/// Same figure the decoder enforces in vireo-codec.
pub const MAX_SCRIPT_SIZE: usize = 10_000;
