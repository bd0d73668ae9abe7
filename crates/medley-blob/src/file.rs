//! File-backed blob store.
//!
//! One file per blob at `{base_dir}/{hex[0..2]}/{hex[2..4]}/{hex}`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use medley_types::BlobRef;
use tracing::debug;

use crate::error::BlobError;
use crate::traits::{BlobStore, verify};

/// Blob store rooted at a directory.
///
/// Writes go to a temporary file that is renamed into place, so a crash
/// never leaves a partial blob under its final name.
pub struct FileBlobStore {
    base_dir: PathBuf,
}

impl FileBlobStore {
    /// Open the store, creating `base_dir` if needed.
    pub fn open(base_dir: impl AsRef<Path>) -> Result<Self, BlobError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub(crate) fn blob_path(&self, blob: &BlobRef) -> PathBuf {
        let hex = blob.to_string();
        self.base_dir.join(&hex[0..2]).join(&hex[2..4]).join(&hex)
    }
}

#[async_trait::async_trait]
impl BlobStore for FileBlobStore {
    async fn put(&self, data: Bytes) -> Result<BlobRef, BlobError> {
        let blob = BlobRef::from_data(&data);
        let path = self.blob_path(&blob);
        if tokio::fs::try_exists(&path).await? {
            return Ok(blob);
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, &data).await?;
        tokio::fs::rename(&tmp_path, &path).await?;

        debug!(blob = %blob.short(), size = data.len(), "stored blob to file");
        Ok(blob)
    }

    async fn get(&self, blob: BlobRef) -> Result<Option<Bytes>, BlobError> {
        match tokio::fs::read(self.blob_path(&blob)).await {
            Ok(data) => {
                verify(blob, &data)?;
                Ok(Some(Bytes::from(data)))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, blob: BlobRef) -> Result<(), BlobError> {
        match tokio::fs::remove_file(self.blob_path(&blob)).await {
            Ok(()) => {
                debug!(blob = %blob.short(), "deleted blob file");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn contains(&self, blob: BlobRef) -> Result<bool, BlobError> {
        Ok(tokio::fs::try_exists(self.blob_path(&blob)).await?)
    }

    async fn list(&self) -> Result<Vec<BlobRef>, BlobError> {
        let mut blobs = Vec::new();

        // base/XX/YY/<hex>
        let mut level0 = tokio::fs::read_dir(&self.base_dir).await?;
        while let Some(d0) = level0.next_entry().await? {
            if !d0.file_type().await?.is_dir() {
                continue;
            }
            let mut level1 = tokio::fs::read_dir(d0.path()).await?;
            while let Some(d1) = level1.next_entry().await? {
                if !d1.file_type().await?.is_dir() {
                    continue;
                }
                let mut files = tokio::fs::read_dir(d1.path()).await?;
                while let Some(entry) = files.next_entry().await? {
                    if let Some(name) = entry.file_name().to_str()
                        && entry.file_type().await?.is_file()
                        && let Ok(blob) = name.parse::<BlobRef>()
                    {
                        blobs.push(blob);
                    }
                }
            }
        }
        Ok(blobs)
    }
}
