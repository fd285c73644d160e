//! Opcode bytes and their canonical names.

// push opcodes
pub const OP_0: u8 = 0x00;
pub const OP_PUSHDATA1: u8 = 0x4C;
pub const OP_PUSHDATA2: u8 = 0x4D;
pub const OP_PUSHDATA4: u8 = 0x4E;
pub const OP_1NEGATE: u8 = 0x4F;
pub const OP_RESERVED: u8 = 0x50;
pub const OP_1: u8 = 0x51;
pub const OP_2: u8 = 0x52;
pub const OP_3: u8 = 0x53;
pub const OP_4: u8 = 0x54;
pub const OP_5: u8 = 0x55;
pub const OP_6: u8 = 0x56;
pub const OP_7: u8 = 0x57;
pub const OP_8: u8 = 0x58;
pub const OP_9: u8 = 0x59;
pub const OP_10: u8 = 0x5A;
pub const OP_11: u8 = 0x5B;
pub const OP_12: u8 = 0x5C;
pub const OP_13: u8 = 0x5D;
pub const OP_14: u8 = 0x5E;
pub const OP_15: u8 = 0x5F;
pub const OP_16: u8 = 0x60;

// flow control
pub const OP_NOP: u8 = 0x61;
pub const OP_VER: u8 = 0x62;
pub const OP_IF: u8 = 0x63;
pub const OP_NOTIF: u8 = 0x64;
pub const OP_VERIF: u8 = 0x65;
pub const OP_VERNOTIF: u8 = 0x66;
pub const OP_ELSE: u8 = 0x67;
pub const OP_ENDIF: u8 = 0x68;
pub const OP_VERIFY: u8 = 0x69;
pub const OP_RETURN: u8 = 0x6A;

// stack
pub const OP_TOALTSTACK: u8 = 0x6B;
pub const OP_FROMALTSTACK: u8 = 0x6C;
pub const OP_2DROP: u8 = 0x6D;
pub const OP_2DUP: u8 = 0x6E;
pub const OP_3DUP: u8 = 0x6F;
pub const OP_2OVER: u8 = 0x70;
pub const OP_2ROT: u8 = 0x71;
pub const OP_2SWAP: u8 = 0x72;
pub const OP_IFDUP: u8 = 0x73;
pub const OP_DEPTH: u8 = 0x74;
pub const OP_DROP: u8 = 0x75;
pub const OP_DUP: u8 = 0x76;
pub const OP_NIP: u8 = 0x77;
pub const OP_OVER: u8 = 0x78;
pub const OP_PICK: u8 = 0x79;
pub const OP_ROLL: u8 = 0x7A;
pub const OP_ROT: u8 = 0x7B;
pub const OP_SWAP: u8 = 0x7C;
pub const OP_TUCK: u8 = 0x7D;

// splice (disabled)
pub const OP_CAT: u8 = 0x7E;
pub const OP_SUBSTR: u8 = 0x7F;
pub const OP_LEFT: u8 = 0x80;
pub const OP_RIGHT: u8 = 0x81;
pub const OP_SIZE: u8 = 0x82;

// bit logic
pub const OP_INVERT: u8 = 0x83;
pub const OP_AND: u8 = 0x84;
pub const OP_OR: u8 = 0x85;
pub const OP_XOR: u8 = 0x86;
pub const OP_EQUAL: u8 = 0x87;
pub const OP_EQUALVERIFY: u8 = 0x88;
pub const OP_RESERVED1: u8 = 0x89;
pub const OP_RESERVED2: u8 = 0x8A;

// arithmetic
pub const OP_1ADD: u8 = 0x8B;
pub const OP_1SUB: u8 = 0x8C;
pub const OP_2MUL: u8 = 0x8D;
pub const OP_2DIV: u8 = 0x8E;
pub const OP_NEGATE: u8 = 0x8F;
pub const OP_ABS: u8 = 0x90;
pub const OP_NOT: u8 = 0x91;
pub const OP_0NOTEQUAL: u8 = 0x92;
pub const OP_ADD: u8 = 0x93;
pub const OP_SUB: u8 = 0x94;
pub const OP_MUL: u8 = 0x95;
pub const OP_DIV: u8 = 0x96;
pub const OP_MOD: u8 = 0x97;
pub const OP_LSHIFT: u8 = 0x98;
pub const OP_RSHIFT: u8 = 0x99;
pub const OP_BOOLAND: u8 = 0x9A;
pub const OP_BOOLOR: u8 = 0x9B;
pub const OP_NUMEQUAL: u8 = 0x9C;
pub const OP_NUMEQUALVERIFY: u8 = 0x9D;
pub const OP_NUMNOTEQUAL: u8 = 0x9E;
pub const OP_LESSTHAN: u8 = 0x9F;
pub const OP_GREATERTHAN: u8 = 0xA0;
pub const OP_LESSTHANOREQUAL: u8 = 0xA1;
pub const OP_GREATERTHANOREQUAL: u8 = 0xA2;
pub const OP_MIN: u8 = 0xA3;
pub const OP_MAX: u8 = 0xA4;
pub const OP_WITHIN: u8 = 0xA5;

// crypto
pub const OP_RIPEMD160: u8 = 0xA6;
pub const OP_SHA1: u8 = 0xA7;
pub const OP_SHA256: u8 = 0xA8;
pub const OP_HASH160: u8 = 0xA9;
pub const OP_HASH256: u8 = 0xAA;
pub const OP_CODESEPARATOR: u8 = 0xAB;
pub const OP_CHECKSIG: u8 = 0xAC;
pub const OP_CHECKSIGVERIFY: u8 = 0xAD;
pub const OP_CHECKMULTISIG: u8 = 0xAE;
pub const OP_CHECKMULTISIGVERIFY: u8 = 0xAF;

// expansion
pub const OP_NOP1: u8 = 0xB0;
/// Historically repurposed as the BIP-17 hash commitment check.
pub const OP_NOP2: u8 = 0xB1;
pub const OP_CHECKHASHVERIFY: u8 = OP_NOP2;
pub const OP_NOP3: u8 = 0xB2;
pub const OP_NOP4: u8 = 0xB3;
pub const OP_NOP5: u8 = 0xB4;
pub const OP_NOP6: u8 = 0xB5;
pub const OP_NOP7: u8 = 0xB6;
pub const OP_NOP8: u8 = 0xB7;
pub const OP_NOP9: u8 = 0xB8;
pub const OP_NOP10: u8 = 0xB9;

/// Opcodes whose mere presence in a script makes it invalid.
pub fn is_disabled(op: u8) -> bool {
    matches!(
        op,
        OP_CAT
            | OP_SUBSTR
            | OP_LEFT
            | OP_RIGHT
            | OP_INVERT
            | OP_AND
            | OP_OR
            | OP_XOR
            | OP_2MUL
            | OP_2DIV
            | OP_MUL
            | OP_DIV
            | OP_MOD
            | OP_LSHIFT
            | OP_RSHIFT
    )
}

/// Whether the byte only moves data onto the stack.
///
/// Everything at or below `OP_16` is a push; only bytes above it count
/// against the per-script operation budget.
pub fn is_push(op: u8) -> bool {
    op <= OP_16
}

/// Canonical name used by the textual script notation.
///
/// The small-integer pushes print as bare numbers, matching the wider
/// ecosystem's notation. `None` for bytes with no assigned name.
pub fn name(op: u8) -> Option<&'static str> {
    let name = match op {
        OP_0 => "0",
        OP_PUSHDATA1 => "OP_PUSHDATA1",
        OP_PUSHDATA2 => "OP_PUSHDATA2",
        OP_PUSHDATA4 => "OP_PUSHDATA4",
        OP_1NEGATE => "-1",
        OP_RESERVED => "OP_RESERVED",
        OP_1 => "1",
        OP_2 => "2",
        OP_3 => "3",
        OP_4 => "4",
        OP_5 => "5",
        OP_6 => "6",
        OP_7 => "7",
        OP_8 => "8",
        OP_9 => "9",
        OP_10 => "10",
        OP_11 => "11",
        OP_12 => "12",
        OP_13 => "13",
        OP_14 => "14",
        OP_15 => "15",
        OP_16 => "16",
        OP_NOP => "OP_NOP",
        OP_VER => "OP_VER",
        OP_IF => "OP_IF",
        OP_NOTIF => "OP_NOTIF",
        OP_VERIF => "OP_VERIF",
        OP_VERNOTIF => "OP_VERNOTIF",
        OP_ELSE => "OP_ELSE",
        OP_ENDIF => "OP_ENDIF",
        OP_VERIFY => "OP_VERIFY",
        OP_RETURN => "OP_RETURN",
        OP_TOALTSTACK => "OP_TOALTSTACK",
        OP_FROMALTSTACK => "OP_FROMALTSTACK",
        OP_2DROP => "OP_2DROP",
        OP_2DUP => "OP_2DUP",
        OP_3DUP => "OP_3DUP",
        OP_2OVER => "OP_2OVER",
        OP_2ROT => "OP_2ROT",
        OP_2SWAP => "OP_2SWAP",
        OP_IFDUP => "OP_IFDUP",
        OP_DEPTH => "OP_DEPTH",
        OP_DROP => "OP_DROP",
        OP_DUP => "OP_DUP",
        OP_NIP => "OP_NIP",
        OP_OVER => "OP_OVER",
        OP_PICK => "OP_PICK",
        OP_ROLL => "OP_ROLL",
        OP_ROT => "OP_ROT",
        OP_SWAP => "OP_SWAP",
        OP_TUCK => "OP_TUCK",
        OP_CAT => "OP_CAT",
        OP_SUBSTR => "OP_SUBSTR",
        OP_LEFT => "OP_LEFT",
        OP_RIGHT => "OP_RIGHT",
        OP_SIZE => "OP_SIZE",
        OP_INVERT => "OP_INVERT",
        OP_AND => "OP_AND",
        OP_OR => "OP_OR",
        OP_XOR => "OP_XOR",
        OP_EQUAL => "OP_EQUAL",
        OP_EQUALVERIFY => "OP_EQUALVERIFY",
        OP_RESERVED1 => "OP_RESERVED1",
        OP_RESERVED2 => "OP_RESERVED2",
        OP_1ADD => "OP_1ADD",
        OP_1SUB => "OP_1SUB",
        OP_2MUL => "OP_2MUL",
        OP_2DIV => "OP_2DIV",
        OP_NEGATE => "OP_NEGATE",
        OP_ABS => "OP_ABS",
        OP_NOT => "OP_NOT",
        OP_0NOTEQUAL => "OP_0NOTEQUAL",
        OP_ADD => "OP_ADD",
        OP_SUB => "OP_SUB",
        OP_MUL => "OP_MUL",
        OP_DIV => "OP_DIV",
        OP_MOD => "OP_MOD",
        OP_LSHIFT => "OP_LSHIFT",
        OP_RSHIFT => "OP_RSHIFT",
        OP_BOOLAND => "OP_BOOLAND",
        OP_BOOLOR => "OP_BOOLOR",
        OP_NUMEQUAL => "OP_NUMEQUAL",
        OP_NUMEQUALVERIFY => "OP_NUMEQUALVERIFY",
        OP_NUMNOTEQUAL => "OP_NUMNOTEQUAL",
        OP_LESSTHAN => "OP_LESSTHAN",
        OP_GREATERTHAN => "OP_GREATERTHAN",
        OP_LESSTHANOREQUAL => "OP_LESSTHANOREQUAL",
        OP_GREATERTHANOREQUAL => "OP_GREATERTHANOREQUAL",
        OP_MIN => "OP_MIN",
        OP_MAX => "OP_MAX",
        OP_WITHIN => "OP_WITHIN",
        OP_RIPEMD160 => "OP_RIPEMD160",
        OP_SHA1 => "OP_SHA1",
        OP_SHA256 => "OP_SHA256",
        OP_HASH160 => "OP_HASH160",
        OP_HASH256 => "OP_HASH256",
        OP_CODESEPARATOR => "OP_CODESEPARATOR",
        OP_CHECKSIG => "OP_CHECKSIG",
        OP_CHECKSIGVERIFY => "OP_CHECKSIGVERIFY",
        OP_CHECKMULTISIG => "OP_CHECKMULTISIG",
        OP_CHECKMULTISIGVERIFY => "OP_CHECKMULTISIGVERIFY",
        OP_NOP1 => "OP_NOP1",
        OP_NOP2 => "OP_CHECKHASHVERIFY",
        OP_NOP3 => "OP_NOP3",
        OP_NOP4 => "OP_NOP4",
        OP_NOP5 => "OP_NOP5",
        OP_NOP6 => "OP_NOP6",
        OP_NOP7 => "OP_NOP7",
        OP_NOP8 => "OP_NOP8",
        OP_NOP9 => "OP_NOP9",
        OP_NOP10 => "OP_NOP10",
        _ => return None,
    };

    Some(name)
}

/// Inverse of [`name`], accepting `OP_NOP2` as an alias for the BIP-17
/// spelling.
pub fn from_name(token: &str) -> Option<u8> {
    if token == "OP_NOP2" {
        return Some(OP_NOP2);
    }

    (0u8..=0xB9).find(|op| name(*op) == Some(token))
}

/// The integer a small-int push opcode stands for, if it is one.
pub fn small_int(op: u8) -> Option<i64> {
    match op {
        OP_0 => Some(0),
        OP_1NEGATE => Some(-1),
        OP_1..=OP_16 => Some((op - OP_1 + 1) as i64),
        _ => None,
    }
}

/// The push opcode for a small integer in `-1..=16`.
pub fn from_small_int(n: i64) -> Option<u8> {
    match n {
        0 => Some(OP_0),
        -1 => Some(OP_1NEGATE),
        1..=16 => Some(OP_1 + (n as u8) - 1),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_roundtrip() {
        for op in 0u8..=0xB9 {
            if let Some(n) = name(op) {
                if !n.is_empty() {
                    assert_eq!(from_name(n), Some(op), "opcode {op:#x}");
                }
            }
        }
    }

    #[test]
    fn nop2_alias() {
        assert_eq!(from_name("OP_NOP2"), Some(OP_CHECKHASHVERIFY));
        assert_eq!(name(OP_NOP2), Some("OP_CHECKHASHVERIFY"));
    }

    #[test]
    fn small_ints() {
        assert_eq!(small_int(OP_0), Some(0));
        assert_eq!(small_int(OP_16), Some(16));
        assert_eq!(small_int(OP_1NEGATE), Some(-1));
        assert_eq!(small_int(OP_NOP), None);
        assert_eq!(from_small_int(5), Some(OP_5));
        assert_eq!(from_small_int(17), None);
    }
}
