//! Log entry types.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use medley_types::{EntryHash, WriterId};
use serde::{Deserialize, Serialize};

/// A single signed entry in a writer's log.
///
/// `hash` covers `(writer_id, seq, prev_hash, hlc, payload)`; the signature
/// covers `hash`. `prev_hash` of the entry at seq 0 is [`EntryHash::ZERO`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Writer that created this entry.
    pub writer_id: WriterId,
    /// Position in the writer's log, starting at 0.
    pub seq: u64,
    /// Hash of the entry at `seq - 1`.
    pub prev_hash: EntryHash,
    /// Hybrid logical clock timestamp, strictly increasing within a log.
    pub hlc: u64,
    /// The mutation being recorded.
    pub payload: EntryPayload,
    /// blake3 hash of the signed content.
    pub hash: EntryHash,
    /// ed25519 signature over the hash, stored as two 32-byte halves for
    /// serde compatibility.
    pub signature_r: [u8; 32],
    pub signature_s: [u8; 32],
}

/// A record-store mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryPayload {
    /// Store or overwrite a value.
    Put {
        /// Record key.
        key: String,
        /// Opaque value bytes.
        value: Vec<u8>,
    },
    /// Remove a key.
    Delete {
        /// Record key.
        key: String,
    },
    /// Admit a new writer.
    AddWriter {
        /// Identity being admitted.
        new_writer_id: WriterId,
        /// Writer granting access; must be the entry's author.
        granted_by: WriterId,
    },
    /// Revoke a writer.
    RemoveWriter {
        /// Identity being revoked.
        writer_id: WriterId,
        /// Writer revoking access; must be the entry's author.
        revoked_by: WriterId,
    },
}

impl EntryPayload {
    /// The record key touched by a data payload.
    pub fn key(&self) -> Option<&str> {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => Some(key),
            Self::AddWriter { .. } | Self::RemoveWriter { .. } => None,
        }
    }

    /// Whether this payload changes the writer set.
    pub fn is_membership(&self) -> bool {
        matches!(self, Self::AddWriter { .. } | Self::RemoveWriter { .. })
    }

    /// Short name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Put { .. } => "put",
            Self::Delete { .. } => "delete",
            Self::AddWriter { .. } => "add_writer",
            Self::RemoveWriter { .. } => "remove_writer",
        }
    }
}

/// Hashable content of a [`LogEntry`] (excludes `hash` and the signature).
#[derive(Serialize)]
struct HashableContent<'a> {
    writer_id: WriterId,
    seq: u64,
    prev_hash: EntryHash,
    hlc: u64,
    payload: &'a EntryPayload,
}

impl LogEntry {
    /// Compute the blake3 hash of the entry's content.
    pub fn compute_hash(
        writer_id: WriterId,
        seq: u64,
        prev_hash: EntryHash,
        hlc: u64,
        payload: &EntryPayload,
    ) -> EntryHash {
        let content = HashableContent {
            writer_id,
            seq,
            prev_hash,
            hlc,
            payload,
        };
        let bytes = postcard::to_allocvec(&content).expect("serialization should not fail");
        EntryHash::from_data(&bytes)
    }

    /// Verify that the stored hash matches the entry's content.
    pub fn verify_hash(&self) -> bool {
        let expected = Self::compute_hash(
            self.writer_id,
            self.seq,
            self.prev_hash,
            self.hlc,
            &self.payload,
        );
        self.hash == expected
    }

    /// Reconstruct the 64-byte signature from its two halves.
    pub fn signature_bytes(&self) -> [u8; 64] {
        let mut sig = [0u8; 64];
        sig[..32].copy_from_slice(&self.signature_r);
        sig[32..].copy_from_slice(&self.signature_s);
        sig
    }

    /// Verify the ed25519 signature over the hash.
    ///
    /// Returns `false` if the writer id is not a valid public key or the
    /// signature doesn't match.
    pub fn verify_signature(&self) -> bool {
        let Ok(verifying_key) = VerifyingKey::from_bytes(self.writer_id.as_bytes()) else {
            return false;
        };
        let signature = Signature::from_bytes(&self.signature_bytes());
        verifying_key
            .verify(self.hash.as_bytes(), &signature)
            .is_ok()
    }

    /// Create a new signed entry.
    pub fn new_signed(
        seq: u64,
        prev_hash: EntryHash,
        hlc: u64,
        payload: EntryPayload,
        signing_key: &SigningKey,
    ) -> Self {
        let writer_id = WriterId::from(signing_key.verifying_key().to_bytes());
        let hash = Self::compute_hash(writer_id, seq, prev_hash, hlc, &payload);
        let signature: Signature = signing_key.sign(hash.as_bytes());
        let sig_bytes = signature.to_bytes();
        let mut signature_r = [0u8; 32];
        let mut signature_s = [0u8; 32];
        signature_r.copy_from_slice(&sig_bytes[..32]);
        signature_s.copy_from_slice(&sig_bytes[32..]);

        Self {
            writer_id,
            seq,
            prev_hash,
            hlc,
            payload,
            hash,
            signature_r,
            signature_s,
        }
    }
}
