//! Error types for the log crate.

use medley_types::WriterId;

/// Errors that can occur during log operations.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// An externally supplied entry failed verification. The entry is
    /// dropped; the log is unchanged.
    #[error("invalid entry from {writer} at seq {seq}: {reason}")]
    InvalidEntry {
        /// Writer the entry claims to belong to.
        writer: WriterId,
        /// Sequence number the entry claims.
        seq: u64,
        /// Which check failed.
        reason: InvalidReason,
    },

    /// Append attempted with a key that does not own the log.
    #[error("log of {log} cannot be appended to by {signer}")]
    NotOwner {
        /// Owner of the log.
        log: WriterId,
        /// Identity that attempted the append.
        signer: WriterId,
    },

    /// A stored log failed its integrity checks on load. The log must not be
    /// used until an operator intervenes.
    #[error("stored log of {writer} is corrupted: {detail}")]
    Corrupted {
        /// Writer whose log is damaged.
        writer: WriterId,
        /// What was found.
        detail: String,
    },

    /// The log's head already carries the largest possible timestamp.
    #[error("log of {0} has no timestamp left past its head")]
    ClockExhausted(WriterId),

    /// The requested log is not known to this store.
    #[error("unknown writer log: {0}")]
    UnknownLog(WriterId),

    /// I/O error on a segment or index file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<postcard::Error> for LogError {
    fn from(e: postcard::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// The check an [`LogError::InvalidEntry`] failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidReason {
    /// Entry belongs to a different writer than the log.
    #[error("entry belongs to another writer")]
    WrongWriter,
    /// Sequence number is not the next one.
    #[error("expected seq {expected}, got {got}")]
    SeqGap { expected: u64, got: u64 },
    /// `prev_hash` does not match the current head.
    #[error("prev_hash does not match log head")]
    BrokenChain,
    /// Timestamp is not after the previous entry's.
    #[error("hlc does not advance past the previous entry")]
    ClockRegression,
    /// Stored hash does not match the entry content.
    #[error("hash mismatch")]
    BadHash,
    /// Signature does not verify against the writer key.
    #[error("bad signature")]
    BadSignature,
    /// A different entry already occupies this sequence number.
    #[error("conflicts with an existing entry at the same seq")]
    Conflict,
}
