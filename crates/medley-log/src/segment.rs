//! Append-only segment files, one per writer log.
//!
//! A segment is a sequence of frames: a 4-byte big-endian length followed by
//! the postcard-encoded [`LogEntry`]. Every append is a single `write_all`
//! followed by `sync_data`, so a crash can leave at most one torn frame at
//! the tail, which is truncated on the next open.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use medley_types::WriterId;
use tracing::{debug, warn};

use crate::entry::LogEntry;
use crate::error::LogError;

/// Maximum encoded size of a single entry: 16 MB. Large attachments belong
/// in the blob store, not in the log.
pub(crate) const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// Open handle on a writer's segment file.
#[derive(Debug)]
pub(crate) struct SegmentFile {
    path: PathBuf,
    file: File,
}

impl SegmentFile {
    /// Open (or create) a segment and decode every complete frame in it.
    ///
    /// A truncated trailing frame is cut off. A complete frame that does not
    /// decode is reported as [`LogError::Corrupted`].
    pub(crate) fn open(path: &Path, writer: WriterId) -> Result<(Self, Vec<LogEntry>), LogError> {
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let mut entries = Vec::new();
        let mut offset = 0usize;

        while offset < bytes.len() {
            let remaining = bytes.len() - offset;
            if remaining < LEN_PREFIX {
                break;
            }
            let mut len_buf = [0u8; LEN_PREFIX];
            len_buf.copy_from_slice(&bytes[offset..offset + LEN_PREFIX]);
            let len = u32::from_be_bytes(len_buf) as usize;

            if len > MAX_FRAME_SIZE {
                return Err(LogError::Corrupted {
                    writer,
                    detail: format!("frame at offset {offset} claims {len} bytes"),
                });
            }
            if remaining < LEN_PREFIX + len {
                break;
            }

            let start = offset + LEN_PREFIX;
            let entry: LogEntry =
                postcard::from_bytes(&bytes[start..start + len]).map_err(|e| {
                    LogError::Corrupted {
                        writer,
                        detail: format!("undecodable frame at offset {offset}: {e}"),
                    }
                })?;
            entries.push(entry);
            offset = start + len;
        }

        if offset < bytes.len() {
            warn!(
                writer = %writer.short(),
                path = %path.display(),
                torn_bytes = bytes.len() - offset,
                "truncating torn frame at segment tail"
            );
            file.set_len(offset as u64)?;
            file.sync_data()?;
        }

        debug!(writer = %writer.short(), entries = entries.len(), "opened segment");

        Ok((
            Self {
                path: path.to_path_buf(),
                file,
            },
            entries,
        ))
    }

    /// Durably append one entry.
    pub(crate) fn append(&mut self, entry: &LogEntry) -> Result<(), LogError> {
        let payload = postcard::to_allocvec(entry)?;
        if payload.len() > MAX_FRAME_SIZE {
            return Err(LogError::Serialization(format!(
                "entry too large: {} bytes (max {MAX_FRAME_SIZE})",
                payload.len()
            )));
        }

        let mut frame = Vec::with_capacity(LEN_PREFIX + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(&payload);

        self.file.write_all(&frame)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Path of the segment on disk.
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}
