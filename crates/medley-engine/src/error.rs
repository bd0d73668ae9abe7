//! Error types for the record store.

use std::path::PathBuf;

use medley_types::WriterId;

/// Errors surfaced by [`RecordStore`](crate::RecordStore) operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Log storage failed. `LogError::Corrupted` here means a local log is
    /// damaged and needs operator attention.
    #[error("log error: {0}")]
    Log(#[from] medley_log::LogError),

    /// A replication round failed. Safe to retry on a new channel.
    #[error("sync error: {0}")]
    Sync(#[from] medley_sync::SyncError),

    /// Issuing or redeeming an invite failed. The invite must be recreated.
    #[error("pairing error: {0}")]
    Pairing(#[from] medley_pairing::PairingError),

    /// Connecting to a peer failed.
    #[error("network error: {0}")]
    Net(#[from] medley_net::NetError),

    /// Attachment storage failed.
    #[error("blob error: {0}")]
    Blob(#[from] medley_blob::BlobError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The schema validator refused a local write.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// `create` or `unpaired` on a directory that already holds a store, or
    /// redeeming an invite on a store that already has a root.
    #[error("store already initialized")]
    AlreadyInitialized,

    /// `open` on a directory without a store.
    #[error("no store found at {0}")]
    NotInitialized(PathBuf),

    /// The operation needs a root writer and this store has not been paired.
    #[error("store is not paired yet")]
    NotPaired,

    /// The local writer lacks write access for this operation.
    #[error("writer {0} is not active")]
    NotActive(WriterId),

    /// Revoking a writer that is not a member.
    #[error("writer {0} is not a member")]
    UnknownWriter(WriterId),

    /// The root writer cannot be revoked.
    #[error("the root writer cannot be revoked")]
    RootNotRevocable,

    /// The identity file is unreadable or belongs to another store.
    #[error("invalid identity at {path}: {detail}")]
    InvalidIdentity { path: PathBuf, detail: String },
}
