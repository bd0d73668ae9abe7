use bytes::Bytes;
use medley_types::BlobRef;

use crate::error::BlobError;

/// Content-addressed blob storage.
///
/// The address is derived from the bytes, so `put` is idempotent and a `get`
/// that succeeds always returns exactly what was stored.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data` and return its address.
    async fn put(&self, data: Bytes) -> Result<BlobRef, BlobError>;

    /// Fetch a blob, verifying it against its address. `None` if absent.
    async fn get(&self, blob: BlobRef) -> Result<Option<Bytes>, BlobError>;

    /// Remove a blob. Removing an absent blob is not an error.
    async fn delete(&self, blob: BlobRef) -> Result<(), BlobError>;

    async fn contains(&self, blob: BlobRef) -> Result<bool, BlobError>;

    /// Every stored address, in no particular order.
    async fn list(&self) -> Result<Vec<BlobRef>, BlobError>;
}

/// Check `data` against the address it was requested under.
pub(crate) fn verify(expected: BlobRef, data: &[u8]) -> Result<(), BlobError> {
    let actual = BlobRef::from_data(data);
    if actual != expected {
        tracing::error!(%expected, %actual, "blob corruption detected on read");
        return Err(BlobError::Corrupt { expected, actual });
    }
    Ok(())
}
