//! Error types for network operations.

/// Errors that can occur while talking to a peer.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Underlying stream I/O failed.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A frame announced a length above the limit.
    #[error("message too large: {len} bytes (max {max})")]
    MessageTooLarge {
        /// Announced length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The stream ended in the middle of a frame, or while a reply was expected.
    #[error("stream closed")]
    StreamClosed,

    /// The peer sent a message that is not valid at this point.
    #[error("unexpected message: expected {expected}, got {got}")]
    Unexpected {
        /// What the protocol expected.
        expected: &'static str,
        /// Variant actually received.
        got: &'static str,
    },

    /// Nobody announced the topic within the connect timeout.
    #[error("no peer found for topic {0}")]
    PeerNotFound(String),

    /// Discovery is not configured for the requested direction.
    #[error("discovery error: {0}")]
    Discovery(String),
}

impl From<postcard::Error> for NetError {
    fn from(e: postcard::Error) -> Self {
        NetError::Serialization(e.to_string())
    }
}
