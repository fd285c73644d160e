//! Script execution.
//!
//! The engine walks raw script bytes with an explicit program counter and
//! dispatches on the opcode byte, so code-separator spans and push
//! payloads come straight from the wire representation.

use vireo_crypto::hash::{hash160, ripemd160, sha1, sha256, sha256d};

use crate::error::ExecError;
use crate::num;
use crate::opcode::*;
use crate::stack::Stack;
use crate::MAX_SCRIPT_SIZE;

/// Executed non-push opcodes allowed per script.
pub const MAX_OPS_PER_SCRIPT: usize = 201;

/// Maximum public keys a single OP_CHECKMULTISIG may name.
const MAX_MULTISIG_KEYS: i64 = 20;

/// Consensus-rule switches that have changed meaning over the protocol's
/// history.
#[derive(Debug, Clone, Copy)]
pub struct Rules {
    /// Execute OP_NOP2 as the BIP-17 hash commitment check instead of a
    /// no-op.
    pub check_hash_verify: bool,
}

impl Default for Rules {
    fn default() -> Self {
        Self {
            check_hash_verify: true,
        }
    }
}

/// The result of executing a script pair: a verdict, never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Valid,
    Invalid(ExecError),
}

impl Outcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, Outcome::Valid)
    }

    /// The diagnostic reason when invalid.
    pub fn reason(&self) -> Option<&ExecError> {
        match self {
            Outcome::Valid => None,
            Outcome::Invalid(reason) => Some(reason),
        }
    }
}

/// Execute the spending input's signature script followed by the spent
/// output's pubkey script, carrying the main stack across.
///
/// `verifier` receives `(pubkey, signature, hash_type)` with the trailing
/// hash-type byte already split off the wire signature, and decides
/// whether the signature is valid for the transaction being verified.
pub fn eval_spend<F>(script_sig: &[u8], pk_script: &[u8], rules: &Rules, mut verifier: F) -> Outcome
where
    F: FnMut(&[u8], &[u8], u8) -> bool,
{
    let mut stack = Stack::new();

    if let Err(reason) = Engine::new(rules, &mut stack, &mut verifier).run(script_sig) {
        return Outcome::Invalid(reason);
    }

    if let Err(reason) = Engine::new(rules, &mut stack, &mut verifier).run(pk_script) {
        return Outcome::Invalid(reason);
    }

    if stack.final_verdict() {
        Outcome::Valid
    } else {
        Outcome::Invalid(ExecError::FalseVerdict)
    }
}

/// Execute a single script on a fresh stack; the verdict is the
/// truthiness of the final top of stack.
pub fn eval_script<F>(script: &[u8], rules: &Rules, mut verifier: F) -> Outcome
where
    F: FnMut(&[u8], &[u8], u8) -> bool,
{
    let mut stack = Stack::new();

    if let Err(reason) = Engine::new(rules, &mut stack, &mut verifier).run(script) {
        return Outcome::Invalid(reason);
    }

    if stack.final_verdict() {
        Outcome::Valid
    } else {
        Outcome::Invalid(ExecError::FalseVerdict)
    }
}

struct Engine<'a, F> {
    rules: &'a Rules,
    stack: &'a mut Stack,
    verifier: &'a mut F,
    op_count: usize,
    /// Offset just past the most recent OP_CODESEPARATOR.
    last_separator: usize,
}

impl<'a, F> Engine<'a, F>
where
    F: FnMut(&[u8], &[u8], u8) -> bool,
{
    fn new(rules: &'a Rules, stack: &'a mut Stack, verifier: &'a mut F) -> Self {
        Self {
            rules,
            stack,
            verifier,
            op_count: 0,
            last_separator: 0,
        }
    }

    fn run(&mut self, script: &[u8]) -> Result<(), ExecError> {
        if script.len() > MAX_SCRIPT_SIZE {
            return Err(ExecError::ScriptTooLarge(script.len()));
        }

        // one bool per open OP_IF, true while that branch executes
        let mut branches: Vec<bool> = Vec::new();
        let mut pc = 0;

        while pc < script.len() {
            let op = script[pc];
            let op_pos = pc;
            pc += 1;

            let executing = branches.iter().all(|b| *b);

            if let Some(len) = push_length(script, &mut pc, op)? {
                let payload = script
                    .get(pc..pc + len)
                    .ok_or(ExecError::TruncatedPush)?;
                pc += len;

                if executing {
                    self.stack.push(payload.to_vec())?;
                }
                continue;
            }

            if !is_push(op) {
                self.op_count += 1;
                if self.op_count > MAX_OPS_PER_SCRIPT {
                    return Err(ExecError::TooManyOps);
                }
            }

            if is_disabled(op) {
                return Err(ExecError::DisabledOpcode(op));
            }

            match op {
                // conditionals are tracked even in dead branches
                OP_IF | OP_NOTIF => {
                    let taken = if executing {
                        let condition = self.stack.pop_bool()?;
                        if op == OP_IF {
                            condition
                        } else {
                            !condition
                        }
                    } else {
                        false
                    };
                    branches.push(taken);
                }
                OP_ELSE => {
                    let top = branches
                        .last_mut()
                        .ok_or(ExecError::UnbalancedConditional)?;
                    *top = !*top;
                }
                OP_ENDIF => {
                    branches.pop().ok_or(ExecError::UnbalancedConditional)?;
                }

                _ if !executing => {}

                OP_0 | OP_1NEGATE | OP_1..=OP_16 => {
                    // small_int covers exactly these bytes
                    self.stack.push_num(small_int(op).unwrap())?;
                }

                OP_NOP | OP_NOP1 | OP_NOP3..=OP_NOP10 => {}

                OP_NOP2 => {
                    if self.rules.check_hash_verify {
                        self.op_check_hash_verify(script, op_pos)?;
                    }
                }

                OP_VERIFY => {
                    if !self.stack.pop_bool()? {
                        return Err(ExecError::VerifyFailed);
                    }
                }
                OP_RETURN => return Err(ExecError::Return),

                OP_TOALTSTACK => self.stack.to_alt()?,
                OP_FROMALTSTACK => self.stack.from_alt()?,
                OP_DROP => {
                    self.stack.pop()?;
                }
                OP_2DROP => {
                    self.stack.pop()?;
                    self.stack.pop()?;
                }
                OP_DUP => {
                    let top = self.stack.peek(0)?.to_vec();
                    self.stack.push(top)?;
                }
                OP_2DUP => {
                    let a = self.stack.peek(1)?.to_vec();
                    let b = self.stack.peek(0)?.to_vec();
                    self.stack.push(a)?;
                    self.stack.push(b)?;
                }
                OP_3DUP => {
                    let a = self.stack.peek(2)?.to_vec();
                    let b = self.stack.peek(1)?.to_vec();
                    let c = self.stack.peek(0)?.to_vec();
                    self.stack.push(a)?;
                    self.stack.push(b)?;
                    self.stack.push(c)?;
                }
                OP_2OVER => {
                    let a = self.stack.peek(3)?.to_vec();
                    let b = self.stack.peek(2)?.to_vec();
                    self.stack.push(a)?;
                    self.stack.push(b)?;
                }
                OP_2ROT => {
                    let a = self.stack.remove(5)?;
                    let b = self.stack.remove(4)?;
                    self.stack.push(a)?;
                    self.stack.push(b)?;
                }
                OP_2SWAP => {
                    let a = self.stack.remove(3)?;
                    let b = self.stack.remove(2)?;
                    self.stack.push(a)?;
                    self.stack.push(b)?;
                }
                OP_IFDUP => {
                    let top = self.stack.peek(0)?.to_vec();
                    if num::is_truthy(&top) {
                        self.stack.push(top)?;
                    }
                }
                OP_DEPTH => {
                    let depth = self.stack.depth() as i64;
                    self.stack.push_num(depth)?;
                }
                OP_NIP => {
                    self.stack.remove(1)?;
                }
                OP_OVER => {
                    let under = self.stack.peek(1)?.to_vec();
                    self.stack.push(under)?;
                }
                OP_PICK | OP_ROLL => {
                    let n = self.stack.pop_num()?;
                    if n < 0 {
                        return Err(ExecError::StackUnderflow);
                    }
                    let n = n as usize;
                    if op == OP_PICK {
                        let element = self.stack.peek(n)?.to_vec();
                        self.stack.push(element)?;
                    } else {
                        let element = self.stack.remove(n)?;
                        self.stack.push(element)?;
                    }
                }
                OP_ROT => {
                    let third = self.stack.remove(2)?;
                    self.stack.push(third)?;
                }
                OP_SWAP => {
                    let top = self.stack.pop()?;
                    let under = self.stack.pop()?;
                    self.stack.push(top)?;
                    self.stack.push(under)?;
                }
                OP_TUCK => {
                    let top = self.stack.pop()?;
                    let under = self.stack.pop()?;
                    self.stack.push(top.clone())?;
                    self.stack.push(under)?;
                    self.stack.push(top)?;
                }
                OP_SIZE => {
                    let len = self.stack.peek(0)?.len() as i64;
                    self.stack.push_num(len)?;
                }

                OP_EQUAL | OP_EQUALVERIFY => {
                    let a = self.stack.pop()?;
                    let b = self.stack.pop()?;
                    let equal = a == b;
                    if op == OP_EQUALVERIFY {
                        if !equal {
                            return Err(ExecError::VerifyFailed);
                        }
                    } else {
                        self.stack.push_bool(equal)?;
                    }
                }

                OP_1ADD | OP_1SUB | OP_NEGATE | OP_ABS | OP_NOT | OP_0NOTEQUAL => {
                    let n = self.stack.pop_num()?;
                    let result = match op {
                        OP_1ADD => n + 1,
                        OP_1SUB => n - 1,
                        OP_NEGATE => -n,
                        OP_ABS => n.abs(),
                        OP_NOT => (n == 0) as i64,
                        _ => (n != 0) as i64,
                    };
                    self.stack.push_num(result)?;
                }

                OP_ADD | OP_SUB | OP_BOOLAND | OP_BOOLOR | OP_NUMEQUAL | OP_NUMEQUALVERIFY
                | OP_NUMNOTEQUAL | OP_LESSTHAN | OP_GREATERTHAN | OP_LESSTHANOREQUAL
                | OP_GREATERTHANOREQUAL | OP_MIN | OP_MAX => {
                    let b = self.stack.pop_num()?;
                    let a = self.stack.pop_num()?;
                    let result = match op {
                        OP_ADD => a + b,
                        OP_SUB => a - b,
                        OP_BOOLAND => (a != 0 && b != 0) as i64,
                        OP_BOOLOR => (a != 0 || b != 0) as i64,
                        OP_NUMEQUAL | OP_NUMEQUALVERIFY => (a == b) as i64,
                        OP_NUMNOTEQUAL => (a != b) as i64,
                        OP_LESSTHAN => (a < b) as i64,
                        OP_GREATERTHAN => (a > b) as i64,
                        OP_LESSTHANOREQUAL => (a <= b) as i64,
                        OP_GREATERTHANOREQUAL => (a >= b) as i64,
                        OP_MIN => a.min(b),
                        _ => a.max(b),
                    };

                    if op == OP_NUMEQUALVERIFY {
                        if result == 0 {
                            return Err(ExecError::VerifyFailed);
                        }
                    } else {
                        self.stack.push_num(result)?;
                    }
                }
                OP_WITHIN => {
                    let max = self.stack.pop_num()?;
                    let min = self.stack.pop_num()?;
                    let x = self.stack.pop_num()?;
                    self.stack.push_bool(min <= x && x < max)?;
                }

                OP_RIPEMD160 => {
                    let input = self.stack.pop()?;
                    self.stack.push(ripemd160(&input).as_ref().to_vec())?;
                }
                OP_SHA1 => {
                    let input = self.stack.pop()?;
                    self.stack.push(sha1(&input).as_ref().to_vec())?;
                }
                OP_SHA256 => {
                    let input = self.stack.pop()?;
                    self.stack.push(sha256(&input).as_ref().to_vec())?;
                }
                OP_HASH160 => {
                    let input = self.stack.pop()?;
                    self.stack.push(hash160(&input).as_ref().to_vec())?;
                }
                OP_HASH256 => {
                    let input = self.stack.pop()?;
                    self.stack.push(sha256d(&input).as_ref().to_vec())?;
                }

                OP_CODESEPARATOR => {
                    self.last_separator = pc;
                }

                OP_CHECKSIG | OP_CHECKSIGVERIFY => {
                    let pubkey = self.stack.pop()?;
                    let sig = self.stack.pop()?;
                    let valid = self.check_signature(&pubkey, &sig);

                    if op == OP_CHECKSIGVERIFY {
                        if !valid {
                            return Err(ExecError::VerifyFailed);
                        }
                    } else {
                        self.stack.push_bool(valid)?;
                    }
                }

                OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                    let valid = self.check_multisig()?;

                    if op == OP_CHECKMULTISIGVERIFY {
                        if !valid {
                            return Err(ExecError::VerifyFailed);
                        }
                    } else {
                        self.stack.push_bool(valid)?;
                    }
                }

                other => return Err(ExecError::BadOpcode(other)),
            }
        }

        if !branches.is_empty() {
            return Err(ExecError::UnbalancedConditional);
        }

        Ok(())
    }

    /// Split the trailing hash-type byte off the wire signature and ask
    /// the callback. An empty signature never verifies.
    fn check_signature(&mut self, pubkey: &[u8], sig: &[u8]) -> bool {
        let Some((hash_type, der)) = sig.split_last() else {
            return false;
        };

        (self.verifier)(pubkey, der, *hash_type)
    }

    /// Pop `<dummy> <sig…> <m> <pubkey…> <n>` and check that every
    /// signature matches some public key, in the same relative order.
    fn check_multisig(&mut self) -> Result<bool, ExecError> {
        let n = self.stack.pop_num()?;
        if !(0..=MAX_MULTISIG_KEYS).contains(&n) {
            return Err(ExecError::KeyCountOutOfRange);
        }

        let mut pubkeys = Vec::with_capacity(n as usize);
        for _ in 0..n {
            pubkeys.push(self.stack.pop()?);
        }
        pubkeys.reverse();

        let m = self.stack.pop_num()?;
        if !(0..=n).contains(&m) {
            return Err(ExecError::SigCountOutOfRange);
        }

        let mut sigs = Vec::with_capacity(m as usize);
        for _ in 0..m {
            sigs.push(self.stack.pop()?);
        }
        sigs.reverse();

        // the historical off-by-one: one extra element is consumed
        self.stack.pop()?;

        let mut key_cursor = pubkeys.iter();
        'sigs: for sig in &sigs {
            for pubkey in key_cursor.by_ref() {
                if self.check_signature(pubkey, sig) {
                    continue 'sigs;
                }
            }
            return Ok(false);
        }

        Ok(true)
    }

    /// BIP-17: the popped element must equal the hash160 of the script
    /// span from the last code separator up to this opcode.
    fn op_check_hash_verify(&mut self, script: &[u8], op_pos: usize) -> Result<(), ExecError> {
        let committed = self.stack.pop()?;
        let span = &script[self.last_separator..op_pos];

        if committed.as_slice() != hash160(span).as_ref() {
            return Err(ExecError::CheckHashMismatch);
        }

        Ok(())
    }
}

/// Payload length when `op` is a push opcode, advancing `pc` over any
/// inline length bytes.
fn push_length(script: &[u8], pc: &mut usize, op: u8) -> Result<Option<usize>, ExecError> {
    let len = match op {
        1..=75 => op as usize,
        OP_PUSHDATA1 => {
            let len = *script.get(*pc).ok_or(ExecError::TruncatedPush)? as usize;
            *pc += 1;
            len
        }
        OP_PUSHDATA2 => {
            let raw = script
                .get(*pc..*pc + 2)
                .ok_or(ExecError::TruncatedPush)?;
            *pc += 2;
            u16::from_le_bytes([raw[0], raw[1]]) as usize
        }
        OP_PUSHDATA4 => {
            let raw = script
                .get(*pc..*pc + 4)
                .ok_or(ExecError::TruncatedPush)?;
            *pc += 4;
            u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize
        }
        _ => return Ok(None),
    };

    Ok(Some(len))
}
