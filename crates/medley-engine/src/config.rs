//! Configuration for a [`RecordStore`](crate::RecordStore).

use std::path::PathBuf;
use std::time::Duration;

use medley_log::WriterKey;
use medley_sync::SyncConfig;

/// Plain settings for opening a record store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory holding the identity, logs and blobs. `None` keeps
    /// everything in memory.
    pub data_dir: Option<PathBuf>,
    /// Use this identity instead of the persisted (or a freshly generated)
    /// one.
    pub identity: Option<WriterKey>,
    /// Replication tuning.
    pub sync: SyncConfig,
    /// Period of the sync timer in long-lived peer sessions.
    pub sync_interval: Duration,
    /// Lifetime of newly created invites.
    pub invite_ttl: Duration,
    /// Capacity of the in-memory blob store.
    pub blob_max_bytes: u64,
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self {
            data_dir: None,
            identity: None,
            sync: SyncConfig::default(),
            sync_interval: Duration::from_secs(10),
            invite_ttl: Duration::from_secs(15 * 60),
            blob_max_bytes: 256 * 1024 * 1024,
        }
    }

    pub fn persistent(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            ..Self::in_memory()
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}
