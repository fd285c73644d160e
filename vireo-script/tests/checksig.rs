#![cfg(feature = "secp256k1")]

use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};
use vireo_crypto::hash::sha256;
use vireo_script::opcode::*;
use vireo_script::{eval_script, sig, ExecError, Outcome, Rules};

fn keypair(seed: u8) -> (SecretKey, PublicKey) {
    let secret = SecretKey::from_slice(&[seed; 32]).unwrap();
    let pubkey = PublicKey::from_secret_key(SECP256K1, &secret);
    (secret, pubkey)
}

fn wire_sig(secret: &SecretKey, digest: &[u8; 32]) -> Vec<u8> {
    let message = Message::from_digest_slice(digest).unwrap();
    let mut sig = SECP256K1
        .sign_ecdsa(&message, secret)
        .serialize_der()
        .to_vec();
    sig.push(0x01); // hash type
    sig
}

fn push(script: &mut Vec<u8>, data: &[u8]) {
    script.push(data.len() as u8);
    script.extend_from_slice(data);
}

#[test]
fn checksig_accepts_valid_signature() {
    let (secret, pubkey) = keypair(0x11);
    let digest = sha256(b"foobar");
    let wire = wire_sig(&secret, &digest);

    let mut script = Vec::new();
    push(&mut script, &wire);
    push(&mut script, &pubkey.serialize());
    script.push(OP_CHECKSIG);

    let outcome = eval_script(&script, &Rules::default(), sig::verifier(*digest));
    assert_eq!(outcome, Outcome::Valid);
}

#[test]
fn checksig_rejects_any_tampering() {
    let (secret, pubkey) = keypair(0x11);
    let digest = sha256(b"foobar");
    let wire = wire_sig(&secret, &digest);

    // flip a byte inside the DER signature
    let mut tampered = wire.clone();
    tampered[10] ^= 0x01;
    let mut script = Vec::new();
    push(&mut script, &tampered);
    push(&mut script, &pubkey.serialize());
    script.push(OP_CHECKSIG);
    assert_eq!(
        eval_script(&script, &Rules::default(), sig::verifier(*digest)),
        Outcome::Invalid(ExecError::FalseVerdict)
    );

    // a different public key
    let (_, other) = keypair(0x22);
    let mut script = Vec::new();
    push(&mut script, &wire);
    push(&mut script, &other.serialize());
    script.push(OP_CHECKSIG);
    assert_eq!(
        eval_script(&script, &Rules::default(), sig::verifier(*digest)),
        Outcome::Invalid(ExecError::FalseVerdict)
    );

    // a different signed digest
    let other_digest = sha256(b"foobaz");
    let mut script = Vec::new();
    push(&mut script, &wire);
    push(&mut script, &pubkey.serialize());
    script.push(OP_CHECKSIG);
    assert_eq!(
        eval_script(&script, &Rules::default(), sig::verifier(*other_digest)),
        Outcome::Invalid(ExecError::FalseVerdict)
    );
}

#[test]
fn two_of_three_multisig() {
    let (s1, k1) = keypair(0x11);
    let (s2, k2) = keypair(0x22);
    let (_, k3) = keypair(0x33);

    let digest = sha256(b"foobar");

    // 0 <sig1> <sig2> 2 <k1> <k2> <k3> 3 OP_CHECKMULTISIG
    let mut script = vec![OP_0];
    push(&mut script, &wire_sig(&s1, &digest));
    push(&mut script, &wire_sig(&s2, &digest));
    script.push(OP_2);
    push(&mut script, &k1.serialize());
    push(&mut script, &k2.serialize());
    push(&mut script, &k3.serialize());
    script.push(OP_3);
    script.push(OP_CHECKMULTISIG);

    let outcome = eval_script(&script, &Rules::default(), sig::verifier(*digest));
    assert_eq!(outcome, Outcome::Valid);
}
