//! Error types for replication.

use medley_log::LogError;
use medley_net::NetError;

/// Errors that abort a sync round.
///
/// Invalid entries from the peer are not errors: they are reported in the
/// [`SyncReport`](crate::SyncReport) and only abort that writer's range.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The channel failed or the peer violated the protocol.
    #[error("channel error: {0}")]
    Channel(#[from] NetError),

    /// The local log store failed (I/O or corruption).
    #[error("log store error: {0}")]
    Log(#[from] LogError),

    /// The peer went silent in the middle of a round.
    #[error("peer silent for {0:?} during a sync round")]
    Timeout(std::time::Duration),
}
