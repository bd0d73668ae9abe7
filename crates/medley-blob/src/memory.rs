//! In-memory blob backend.

use std::collections::HashMap;

use bytes::Bytes;
use medley_types::BlobRef;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::BlobError;
use crate::traits::{BlobStore, verify};

/// Blobs held in a map, capped at `max_bytes` in total.
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<BlobRef, Bytes>>,
    max_bytes: u64,
}

impl MemoryBlobStore {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            blobs: RwLock::new(HashMap::new()),
            max_bytes,
        }
    }

    /// Bytes currently held.
    pub fn used_bytes(&self) -> u64 {
        self.blobs.read().values().map(|b| b.len() as u64).sum()
    }

    #[cfg(test)]
    pub(crate) fn overwrite(&self, blob: BlobRef, data: Bytes) {
        self.blobs.write().insert(blob, data);
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, data: Bytes) -> Result<BlobRef, BlobError> {
        let blob = BlobRef::from_data(&data);
        let mut blobs = self.blobs.write();
        if blobs.contains_key(&blob) {
            return Ok(blob);
        }

        let used: u64 = blobs.values().map(|b| b.len() as u64).sum();
        let needed = data.len() as u64;
        if used + needed > self.max_bytes {
            return Err(BlobError::CapacityExceeded {
                needed,
                available: self.max_bytes.saturating_sub(used),
            });
        }

        debug!(blob = %blob.short(), size = data.len(), "stored blob in memory");
        blobs.insert(blob, data);
        Ok(blob)
    }

    async fn get(&self, blob: BlobRef) -> Result<Option<Bytes>, BlobError> {
        let Some(data) = self.blobs.read().get(&blob).cloned() else {
            return Ok(None);
        };
        verify(blob, &data)?;
        Ok(Some(data))
    }

    async fn delete(&self, blob: BlobRef) -> Result<(), BlobError> {
        if self.blobs.write().remove(&blob).is_some() {
            debug!(blob = %blob.short(), "deleted blob from memory");
        }
        Ok(())
    }

    async fn contains(&self, blob: BlobRef) -> Result<bool, BlobError> {
        Ok(self.blobs.read().contains_key(&blob))
    }

    async fn list(&self) -> Result<Vec<BlobRef>, BlobError> {
        Ok(self.blobs.read().keys().copied().collect())
    }
}
