//! The set of all logs known to a peer, plus the resume index.
//!
//! On disk a store is a directory:
//!
//! ```text
//! <dir>/index.bin          postcard(LogIndex): root, local writer, writer -> {length, head_hash}
//! <dir>/logs/<hex>.seg     one segment per known writer (own log and replicas)
//! ```
//!
//! Local appends persist the index immediately. Replicated entries only
//! update it in memory until [`LogStore::flush_index`], which replication
//! calls once per batch. An index that lags its segments is safe: entries
//! past it are fully verified on the next open.
//!
//! A log that fails its integrity checks on open is quarantined rather than
//! failing the whole store: it is left on disk, reported by
//! [`LogStore::corrupted`], and refused for reads and appends.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use medley_types::{EntryHash, WriterId};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::entry::{EntryPayload, LogEntry};
use crate::error::LogError;
use crate::identity::WriterKey;
use crate::log::{WriterLog, check_successor};
use crate::segment::SegmentFile;

type Result<T> = std::result::Result<T, LogError>;

const INDEX_FILE: &str = "index.bin";
const LOG_DIR: &str = "logs";
const SEGMENT_EXT: &str = "seg";

/// Resume point of one log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Number of entries known durable.
    pub length: u64,
    /// Hash of the entry at `length - 1`.
    pub head_hash: EntryHash,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LogIndex {
    root: Option<WriterId>,
    local: Option<WriterId>,
    writers: BTreeMap<WriterId, IndexEntry>,
}

/// Every writer log a peer holds, keyed by writer.
pub struct LogStore {
    dir: Option<PathBuf>,
    logs: RwLock<BTreeMap<WriterId, Arc<WriterLog>>>,
    /// Logs that failed their integrity checks on open, with what was found.
    corrupted: BTreeMap<WriterId, String>,
    index: Mutex<LogIndex>,
    /// The in-memory index is ahead of `index.bin`.
    index_dirty: AtomicBool,
    appended: watch::Sender<u64>,
}

impl LogStore {
    /// Create a memory-only store.
    pub fn in_memory() -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            dir: None,
            logs: RwLock::new(BTreeMap::new()),
            corrupted: BTreeMap::new(),
            index: Mutex::new(LogIndex::default()),
            index_dirty: AtomicBool::new(false),
            appended,
        }
    }

    /// Open (or create) a persistent store in `dir`.
    ///
    /// Entries covered by the index are chain-checked against the recorded
    /// head without re-verifying signatures; entries past the index (written
    /// just before a crash) are fully verified. A log with any mismatch is
    /// quarantined; see [`LogStore::corrupted`].
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(dir.join(LOG_DIR))?;

        let index: LogIndex = match std::fs::read(dir.join(INDEX_FILE)) {
            Ok(bytes) => postcard::from_bytes(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LogIndex::default(),
            Err(e) => return Err(LogError::Io(e)),
        };

        let mut logs = BTreeMap::new();
        let mut corrupted = BTreeMap::new();

        for dirent in std::fs::read_dir(dir.join(LOG_DIR))? {
            let path = dirent?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SEGMENT_EXT) {
                continue;
            }
            let Some(writer) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<WriterId>().ok())
            else {
                continue;
            };

            let loaded = SegmentFile::open(&path, writer).and_then(|(segment, entries)| {
                validate_loaded(writer, &entries, index.writers.get(&writer))?;
                Ok(WriterLog::from_segment(writer, segment, entries))
            });
            match loaded {
                Ok(log) => {
                    logs.insert(writer, Arc::new(log));
                }
                Err(LogError::Corrupted { detail, .. }) => {
                    corrupted.insert(writer, detail);
                }
                Err(e) => return Err(e),
            }
        }

        for (writer, entry) in &index.writers {
            if entry.length > 0 && !logs.contains_key(writer) && !corrupted.contains_key(writer) {
                let detail = format!("segment missing, index records {} entries", entry.length);
                corrupted.insert(*writer, detail);
            }
        }
        for (writer, detail) in &corrupted {
            error!(writer = %writer.short(), %detail, "quarantined corrupted log");
        }

        info!(
            dir = %dir.display(),
            logs = logs.len(),
            corrupted = corrupted.len(),
            "opened log store"
        );

        let (appended, _) = watch::channel(0);
        let store = Self {
            dir: Some(dir),
            logs: RwLock::new(logs),
            corrupted,
            index: Mutex::new(index),
            index_dirty: AtomicBool::new(false),
            appended,
        };
        store.refresh_index()?;
        Ok(store)
    }

    // ----- Identity -----

    /// Root writer of this store, once known.
    pub fn root(&self) -> Option<WriterId> {
        self.index.lock().root
    }

    /// Record the root writer.
    pub fn set_root(&self, root: WriterId) -> Result<()> {
        let mut index = self.index.lock();
        index.root = Some(root);
        self.persist_index(&index)
    }

    /// Local writer of this store, once known.
    pub fn local(&self) -> Option<WriterId> {
        self.index.lock().local
    }

    /// Record the local writer and create its log.
    pub fn set_local(&self, local: WriterId) -> Result<Arc<WriterLog>> {
        {
            let mut index = self.index.lock();
            index.local = Some(local);
            self.persist_index(&index)?;
        }
        self.get_or_create(local)
    }

    // ----- Logs -----

    /// The log of `writer`, if known. Quarantined logs are not returned.
    pub fn log(&self, writer: &WriterId) -> Option<Arc<WriterLog>> {
        self.logs.read().get(writer).cloned()
    }

    /// Logs quarantined on open, with what their checks found.
    pub fn corrupted(&self) -> &BTreeMap<WriterId, String> {
        &self.corrupted
    }

    pub fn is_corrupted(&self, writer: &WriterId) -> bool {
        self.corrupted.contains_key(writer)
    }

    /// The log of `writer`, creating an empty replica if unknown.
    ///
    /// Fails with [`LogError::Corrupted`] for a quarantined log.
    pub fn get_or_create(&self, writer: WriterId) -> Result<Arc<WriterLog>> {
        if let Some(detail) = self.corrupted.get(&writer) {
            return Err(LogError::Corrupted {
                writer,
                detail: detail.clone(),
            });
        }
        if let Some(log) = self.log(&writer) {
            return Ok(log);
        }

        let mut logs = self.logs.write();
        if let Some(log) = logs.get(&writer) {
            return Ok(log.clone());
        }

        let log = match &self.dir {
            Some(dir) => {
                let path = segment_path(dir, &writer);
                let (segment, entries) = SegmentFile::open(&path, writer)?;
                validate_loaded(writer, &entries, None)?;
                debug!(writer = %writer.short(), path = %segment.path().display(), "created log segment");
                WriterLog::from_segment(writer, segment, entries)
            }
            None => WriterLog::in_memory(writer),
        };
        let log = Arc::new(log);
        logs.insert(writer, log.clone());
        Ok(log)
    }

    /// Sign and append to the local writer's own log.
    pub fn append_local(
        &self,
        key: &WriterKey,
        hlc: u64,
        payload: EntryPayload,
    ) -> Result<LogEntry> {
        let log = self.get_or_create(key.id())?;
        let entry = log.append(key, hlc, payload)?;
        self.record(&log);
        self.flush_index()?;
        self.appended.send_modify(|n| *n += 1);
        Ok(entry)
    }

    /// Append an entry received from a peer to its writer's replica.
    ///
    /// Returns `Ok(false)` for a duplicate. The index on disk is not
    /// updated until the next [`LogStore::flush_index`].
    pub fn apply_remote(&self, entry: &LogEntry) -> Result<bool> {
        let log = self.get_or_create(entry.writer_id)?;
        let applied = log.append_replica(entry)?;
        if applied {
            self.record(&log);
            self.appended.send_modify(|n| *n += 1);
        }
        Ok(applied)
    }

    /// Per-writer log lengths.
    pub fn digest(&self) -> BTreeMap<WriterId, u64> {
        self.logs
            .read()
            .iter()
            .map(|(w, log)| (*w, log.length()))
            .collect()
    }

    /// All known writers (whether or not they are active).
    pub fn writers(&self) -> Vec<WriterId> {
        self.logs.read().keys().copied().collect()
    }

    /// Snapshot of every entry of every log.
    pub fn all_entries(&self) -> Vec<LogEntry> {
        let logs: Vec<Arc<WriterLog>> = self.logs.read().values().cloned().collect();
        logs.iter().flat_map(|log| log.entries()).collect()
    }

    /// Total number of entries across all logs.
    pub fn entry_count(&self) -> u64 {
        self.logs.read().values().map(|log| log.length()).sum()
    }

    /// Receiver bumped on every successful append (local or remote).
    pub fn subscribe_appends(&self) -> watch::Receiver<u64> {
        self.appended.subscribe()
    }

    // ----- Index -----

    /// Write the index if it moved since it was last persisted.
    pub fn flush_index(&self) -> Result<()> {
        let index = self.index.lock();
        if !self.index_dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = self.persist_index(&index) {
            self.index_dirty.store(true, Ordering::Release);
            return Err(e);
        }
        Ok(())
    }

    /// Move the in-memory index to the head of `log`.
    fn record(&self, log: &WriterLog) {
        let Some(head) = log.head() else {
            return;
        };
        let mut index = self.index.lock();
        let entry = IndexEntry {
            length: head.length,
            head_hash: head.hash,
        };
        // A concurrent append may already have recorded a longer head.
        let stale = index
            .writers
            .get(&log.writer_id())
            .is_some_and(|e| e.length >= entry.length);
        if stale {
            return;
        }
        index.writers.insert(log.writer_id(), entry);
        self.index_dirty.store(true, Ordering::Release);
    }

    /// Bring the index up to date with entries recovered past it.
    fn refresh_index(&self) -> Result<()> {
        let logs: Vec<Arc<WriterLog>> = self.logs.read().values().cloned().collect();
        let mut index = self.index.lock();
        let mut changed = false;
        for log in logs {
            if let Some(head) = log.head() {
                let entry = IndexEntry {
                    length: head.length,
                    head_hash: head.hash,
                };
                if index.writers.get(&log.writer_id()) != Some(&entry) {
                    index.writers.insert(log.writer_id(), entry);
                    changed = true;
                }
            }
        }
        if changed {
            self.persist_index(&index)?;
        }
        Ok(())
    }

    /// Atomically replace the index file (write and sync a temp file, then
    /// rename it over the old one).
    fn persist_index(&self, index: &LogIndex) -> Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        let bytes = postcard::to_allocvec(index)?;
        let tmp = dir.join(format!("{INDEX_FILE}.tmp"));
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(&bytes)?;
        file.sync_data()?;
        drop(file);
        std::fs::rename(&tmp, dir.join(INDEX_FILE))?;
        debug!(writers = index.writers.len(), "persisted log index");
        Ok(())
    }
}

impl Drop for LogStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush_index() {
            warn!(error = %e, "could not persist log index on close");
        }
    }
}

fn segment_path(dir: &Path, writer: &WriterId) -> PathBuf {
    dir.join(LOG_DIR).join(format!("{writer}.{SEGMENT_EXT}"))
}

/// Validate entries read back from a segment.
fn validate_loaded(
    writer: WriterId,
    entries: &[LogEntry],
    indexed: Option<&IndexEntry>,
) -> Result<()> {
    let trusted = indexed.map_or(0, |e| e.length) as usize;

    if entries.len() < trusted {
        return Err(LogError::Corrupted {
            writer,
            detail: format!(
                "segment holds {} entries, index records {trusted}",
                entries.len()
            ),
        });
    }

    let mut prev: Option<&LogEntry> = None;
    for (i, entry) in entries.iter().enumerate() {
        check_successor(writer, prev, entry, i >= trusted).map_err(|reason| {
            LogError::Corrupted {
                writer,
                detail: format!("entry {i}: {reason}"),
            }
        })?;
        prev = Some(entry);
    }

    if let Some(indexed) = indexed
        && trusted > 0
        && entries[trusted - 1].hash != indexed.head_hash
    {
        return Err(LogError::Corrupted {
            writer,
            detail: "head hash does not match index".to_string(),
        });
    }

    Ok(())
}
