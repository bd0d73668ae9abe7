//! Key derivation and proofs used by the handshake.

use medley_types::{Topic, WriterId};
use subtle::ConstantTimeEq;

const AUTH_KEY_CONTEXT: &str = "medley 2026-01-01 pairing auth key v1";

/// Derive the key the issuer keeps in place of the invite secret.
pub fn derive_auth_key(secret: &[u8; 32]) -> [u8; 32] {
    blake3::derive_key(AUTH_KEY_CONTEXT, secret)
}

/// Bytes the issuer signs with the ephemeral key: `topic || nonce`.
pub(crate) fn challenge_transcript(topic: &Topic, nonce: &[u8; 32]) -> Vec<u8> {
    let mut transcript = Vec::with_capacity(64);
    transcript.extend_from_slice(topic.as_bytes());
    transcript.extend_from_slice(nonce);
    transcript
}

/// Bytes the redeemer proves and signs: `nonce || writer_id`.
pub(crate) fn proof_transcript(nonce: &[u8; 32], writer: &WriterId) -> Vec<u8> {
    let mut transcript = Vec::with_capacity(64);
    transcript.extend_from_slice(nonce);
    transcript.extend_from_slice(writer.as_bytes());
    transcript
}

/// Proof of knowledge of the invite secret, bound to the nonce and the
/// redeemer's writer identity.
pub fn compute_proof(auth_key: &[u8; 32], nonce: &[u8; 32], writer: &WriterId) -> [u8; 32] {
    *blake3::keyed_hash(auth_key, &proof_transcript(nonce, writer)).as_bytes()
}

/// Check a proof in constant time.
pub fn verify_proof(
    auth_key: &[u8; 32],
    nonce: &[u8; 32],
    writer: &WriterId,
    proof: &[u8; 32],
) -> bool {
    let expected = compute_proof(auth_key, nonce, writer);
    expected.ct_eq(proof).into()
}

pub(crate) fn split_signature(signature: [u8; 64]) -> ([u8; 32], [u8; 32]) {
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&signature[..32]);
    s.copy_from_slice(&signature[32..]);
    (r, s)
}

pub(crate) fn join_signature(r: &[u8; 32], s: &[u8; 32]) -> [u8; 64] {
    let mut signature = [0u8; 64];
    signature[..32].copy_from_slice(r);
    signature[32..].copy_from_slice(s);
    signature
}
