//! The local writer key, kept as 32 raw bytes next to the logs.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use medley_log::WriterKey;
use tracing::info;

use crate::error::StoreError;

const IDENTITY_FILE: &str = "identity.key";

pub(crate) fn path(dir: &Path) -> PathBuf {
    dir.join(IDENTITY_FILE)
}

pub(crate) fn load(dir: &Path) -> Result<Option<WriterKey>, StoreError> {
    let path = path(dir);
    let bytes = match std::fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let secret: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| StoreError::InvalidIdentity {
            path: path.clone(),
            detail: format!("expected 32 bytes, found {}", bytes.len()),
        })?;
    Ok(Some(WriterKey::from_bytes(&secret)))
}

/// Write the key atomically (temp file, then rename).
pub(crate) fn save(dir: &Path, key: &WriterKey) -> Result<(), StoreError> {
    std::fs::create_dir_all(dir)?;
    let path = path(dir);
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, key.to_bytes())?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))?;
    }
    std::fs::rename(&tmp, &path)?;
    info!(writer = %key.id().short(), path = %path.display(), "saved writer identity");
    Ok(())
}
