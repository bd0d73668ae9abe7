//! Protocol messages exchanged between Medley peers.
//!
//! All messages are serialized with postcard and sent as length-prefixed
//! frames over a [`Channel`](crate::Channel).

use std::collections::BTreeMap;

use medley_log::LogEntry;
use medley_types::{Topic, WriterId};
use serde::{Deserialize, Serialize};

/// Protocol messages exchanged between Medley peers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MedleyMessage {
    // ----- Replication -----
    /// Opens a round: the sender's log length per known writer.
    Digest {
        /// Writer -> number of entries held.
        lengths: BTreeMap<WriterId, u64>,
    },

    /// Ask for entries `[from_seq, to_seq)` of one writer's log.
    EntryRequest {
        writer: WriterId,
        from_seq: u64,
        to_seq: u64,
    },

    /// A chunk of a requested range, in sequence order.
    EntryBatch {
        writer: WriterId,
        entries: Vec<LogEntry>,
    },

    /// The requested range for `writer` has been fully sent.
    RangeEnd { writer: WriterId },

    /// The sender has received everything it asked for in this round.
    RoundDone,

    // ----- Pairing -----
    /// Redeemer opens the handshake for an invite topic.
    PairHello { topic: Topic },

    /// Issuer proves possession of the invite's ephemeral key by signing
    /// `topic || nonce`.
    ///
    /// The signature is carried as two 32-byte halves for serde.
    PairChallenge {
        nonce: [u8; 32],
        signature_r: [u8; 32],
        signature_s: [u8; 32],
    },

    /// Redeemer proves knowledge of the invite secret and ownership of its
    /// new writer key.
    PairProof {
        /// The redeemer's long-term writer identity.
        writer_id: WriterId,
        /// `keyed_hash(auth_key, nonce || writer_id)`.
        proof: [u8; 32],
        /// Writer key signature over the same transcript.
        signature_r: [u8; 32],
        signature_s: [u8; 32],
    },

    /// The issuer granted write access.
    PairAccepted {
        /// Root writer of the store being joined.
        root: WriterId,
        /// Writer that appended the grant.
        issuer: WriterId,
    },

    /// The issuer refused the redeemer.
    PairRejected { reason: RejectReason },
}

/// Why an issuer refused a pairing attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// The invite was already redeemed or burned.
    AlreadyUsed,
    /// The invite is past its expiry time.
    Expired,
    /// The proof did not match the invite secret.
    AuthenticationFailed,
    /// No invite is registered for the topic.
    UnknownInvite,
    /// The issuer failed while granting access.
    Internal(String),
}

impl MedleyMessage {
    /// Variant name, for logs and protocol errors.
    pub fn kind(&self) -> &'static str {
        match self {
            MedleyMessage::Digest { .. } => "Digest",
            MedleyMessage::EntryRequest { .. } => "EntryRequest",
            MedleyMessage::EntryBatch { .. } => "EntryBatch",
            MedleyMessage::RangeEnd { .. } => "RangeEnd",
            MedleyMessage::RoundDone => "RoundDone",
            MedleyMessage::PairHello { .. } => "PairHello",
            MedleyMessage::PairChallenge { .. } => "PairChallenge",
            MedleyMessage::PairProof { .. } => "PairProof",
            MedleyMessage::PairAccepted { .. } => "PairAccepted",
            MedleyMessage::PairRejected { .. } => "PairRejected",
        }
    }
}
