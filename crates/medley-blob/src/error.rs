//! Error types for blob storage.

use medley_types::BlobRef;

#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("blob not found: {0}")]
    NotFound(BlobRef),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("blob store full: need {needed} bytes, only {available} available")]
    CapacityExceeded { needed: u64, available: u64 },

    /// Stored bytes no longer hash to their address. The blob is never
    /// returned to the caller.
    #[error("blob corruption detected: expected {expected}, actual hash {actual}")]
    Corrupt { expected: BlobRef, actual: BlobRef },
}
