//! The fold engine: full rebuild and incremental apply.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use medley_log::{EntryPayload, LogEntry, LogStore};
use medley_types::WriterId;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::order::OrderKey;
use crate::validator::{AcceptAll, SchemaValidator};
use crate::view::{MaterializedView, ViewRecord};
use crate::writer_set::WriterSet;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Counters describing what the fold did with the entries it saw.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FoldStats {
    /// Entries folded (in order), whatever their effect.
    pub folded: u64,
    /// Entries ignored because the author was not active at their position.
    pub unauthorized: u64,
    /// Data entries rejected by the schema validator.
    pub invalid: u64,
    /// Full rebuilds performed.
    pub rebuilds: u64,
}

/// Notification sent after the view changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewChanged {
    /// View version after the change.
    pub version: u64,
    /// Keys whose record changed.
    pub keys: Vec<String>,
}

#[derive(Debug, Clone)]
struct FoldState {
    view: MaterializedView,
    writers: WriterSet,
    /// Next unfolded seq per writer.
    cursors: BTreeMap<WriterId, u64>,
    /// Greatest order key folded so far.
    last_key: Option<OrderKey>,
    stats: FoldStats,
}

impl FoldState {
    fn new(root: Option<WriterId>) -> Self {
        Self {
            view: MaterializedView::new(),
            writers: WriterSet::new(root),
            cursors: BTreeMap::new(),
            last_key: None,
            stats: FoldStats::default(),
        }
    }

    /// Fold every entry from scratch.
    fn from_entries(
        root: Option<WriterId>,
        mut entries: Vec<LogEntry>,
        validator: &dyn SchemaValidator,
    ) -> Self {
        entries.sort_by_key(OrderKey::of);
        let mut state = Self::new(root);
        for entry in &entries {
            state.fold(entry, validator);
        }
        state
    }

    /// Fold one entry at its position. Returns the data key it changed.
    fn fold(&mut self, entry: &LogEntry, validator: &dyn SchemaValidator) -> Option<String> {
        let at = OrderKey::of(entry);
        self.cursors.insert(entry.writer_id, entry.seq + 1);
        if self.last_key.is_none_or(|last| at > last) {
            self.last_key = Some(at);
        }
        self.stats.folded += 1;

        if !self.writers.is_active_at(&entry.writer_id, &at) {
            self.stats.unauthorized += 1;
            debug!(
                writer = %entry.writer_id.short(),
                seq = entry.seq,
                kind = entry.payload.kind(),
                "ignoring entry from inactive writer"
            );
            return None;
        }

        match &entry.payload {
            EntryPayload::Put { key, value } => {
                self.apply_data(entry, key, Some(value.clone()), validator)
            }
            EntryPayload::Delete { key } => self.apply_data(entry, key, None, validator),
            EntryPayload::AddWriter {
                new_writer_id,
                granted_by,
            } => {
                if *granted_by != entry.writer_id {
                    self.stats.unauthorized += 1;
                    warn!(writer = %entry.writer_id.short(), "AddWriter names a different grantor");
                } else if self.writers.grant(*new_writer_id, *granted_by, at) {
                    info!(writer = %new_writer_id.short(), by = %granted_by.short(), "writer added");
                }
                None
            }
            EntryPayload::RemoveWriter {
                writer_id,
                revoked_by,
            } => {
                if *revoked_by != entry.writer_id {
                    self.stats.unauthorized += 1;
                    warn!(writer = %entry.writer_id.short(), "RemoveWriter names a different revoker");
                } else if self.writers.revoke(*writer_id, at) {
                    info!(writer = %writer_id.short(), by = %revoked_by.short(), "writer revoked");
                }
                None
            }
        }
    }

    fn apply_data(
        &mut self,
        entry: &LogEntry,
        key: &str,
        value: Option<Vec<u8>>,
        validator: &dyn SchemaValidator,
    ) -> Option<String> {
        let errors = validator.validate(&entry.payload);
        if !errors.is_empty() {
            self.stats.invalid += 1;
            warn!(
                writer = %entry.writer_id.short(),
                seq = entry.seq,
                key,
                errors = ?errors,
                "entry rejected by schema validator"
            );
            return None;
        }
        let record = ViewRecord {
            value,
            writer_id: entry.writer_id,
            seq: entry.seq,
            hlc: entry.hlc,
        };
        self.view.apply(key, record).then(|| key.to_string())
    }
}

/// Fold `entries` into a view from scratch.
///
/// Pure function of the entry set: the input order does not matter.
pub fn materialize(
    root: Option<WriterId>,
    entries: impl IntoIterator<Item = LogEntry>,
    validator: &dyn SchemaValidator,
) -> (MaterializedView, WriterSet) {
    let state = FoldState::from_entries(root, entries.into_iter().collect(), validator);
    (state.view, state.writers)
}

/// Maintains the materialized view of a [`LogStore`].
///
/// Readers take the read lock only. Folds are serialized through a separate
/// mutex; a full rebuild runs off the read lock and swaps the result in.
pub struct ViewBuilder {
    root: RwLock<Option<WriterId>>,
    state: RwLock<FoldState>,
    fold_lock: Mutex<()>,
    validator: Arc<dyn SchemaValidator>,
    version: AtomicU64,
    changes: broadcast::Sender<ViewChanged>,
}

impl ViewBuilder {
    /// Builder with the accept-all validator.
    pub fn new(root: Option<WriterId>) -> Self {
        Self::with_validator(root, Arc::new(AcceptAll))
    }

    pub fn with_validator(root: Option<WriterId>, validator: Arc<dyn SchemaValidator>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            root: RwLock::new(root),
            state: RwLock::new(FoldState::new(root)),
            fold_lock: Mutex::new(()),
            validator,
            version: AtomicU64::new(0),
            changes,
        }
    }

    pub fn root(&self) -> Option<WriterId> {
        *self.root.read()
    }

    /// Set the root writer and rebuild from `logs`.
    pub fn set_root(&self, root: WriterId, logs: &LogStore) -> MaterializedView {
        *self.root.write() = Some(root);
        self.rebuild(logs)
    }

    pub fn validator(&self) -> &Arc<dyn SchemaValidator> {
        &self.validator
    }

    /// Discard the current fold and recompute it from every entry in `logs`.
    pub fn rebuild(&self, logs: &LogStore) -> MaterializedView {
        let _fold = self.fold_lock.lock();
        self.rebuild_locked(logs);
        self.snapshot()
    }

    /// Returns the keys whose record changed.
    fn rebuild_locked(&self, logs: &LogStore) -> Vec<String> {
        let root = self.root();
        let entries = logs.all_entries();
        let count = entries.len();
        let mut fresh = FoldState::from_entries(root, entries, self.validator.as_ref());

        let changed = {
            let mut state = self.state.write();
            fresh.stats.rebuilds = state.stats.rebuilds + 1;
            let changed = state.view.diff_keys(&fresh.view);
            *state = fresh;
            changed
        };
        debug!(entries = count, changed = changed.len(), "view rebuilt");
        self.publish(changed.clone());
        changed
    }

    /// Fold newly appended entries into the current view.
    ///
    /// Entries already folded are skipped, as are entries that do not
    /// directly follow the folded prefix of their log (a later call picks
    /// them up). A membership entry ordered before anything already folded
    /// changes authorization retroactively and triggers a full rebuild.
    /// Returns the keys whose record changed.
    pub fn apply_incremental(&self, logs: &LogStore, new_entries: &[LogEntry]) -> Vec<String> {
        let _fold = self.fold_lock.lock();
        self.apply_locked(logs, new_entries.to_vec())
    }

    /// Fold whatever `logs` holds beyond the folded prefix of each log.
    pub fn refresh(&self, logs: &LogStore) -> Vec<String> {
        let _fold = self.fold_lock.lock();
        let cursors = self.state.read().cursors.clone();
        let mut pending = Vec::new();
        for writer in logs.writers() {
            let Some(log) = logs.log(&writer) else {
                continue;
            };
            let from = cursors.get(&writer).copied().unwrap_or(0);
            pending.extend(log.range(from, log.length()));
        }
        self.apply_locked(logs, pending)
    }

    fn apply_locked(&self, logs: &LogStore, mut entries: Vec<LogEntry>) -> Vec<String> {
        entries.sort_by_key(|e| (e.writer_id, e.seq));
        entries.dedup_by_key(|e| (e.writer_id, e.seq));

        let mut state = self.state.write();
        let mut next: BTreeMap<WriterId, u64> = BTreeMap::new();
        entries.retain(|e| {
            let expected = next
                .entry(e.writer_id)
                .or_insert_with(|| state.cursors.get(&e.writer_id).copied().unwrap_or(0));
            if e.seq == *expected {
                *expected += 1;
                true
            } else {
                if e.seq > *expected {
                    debug!(
                        writer = %e.writer_id.short(),
                        seq = e.seq,
                        expected = *expected,
                        "deferring out-of-sequence entry"
                    );
                }
                false
            }
        });
        if entries.is_empty() {
            return Vec::new();
        }

        entries.sort_by_key(OrderKey::of);
        let rewrites_past = entries.iter().any(|e| {
            e.payload.is_membership() && state.last_key.is_some_and(|last| OrderKey::of(e) < last)
        });
        if rewrites_past {
            drop(state);
            debug!("membership change before folded position, rebuilding");
            return self.rebuild_locked(logs);
        }

        let mut changed: Vec<String> = entries
            .iter()
            .filter_map(|e| state.fold(e, self.validator.as_ref()))
            .collect();
        drop(state);

        changed.sort();
        changed.dedup();
        self.publish(changed.clone());
        changed
    }

    fn publish(&self, keys: Vec<String>) {
        if keys.is_empty() {
            return;
        }
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        // No subscribers is fine.
        let _ = self.changes.send(ViewChanged { version, keys });
    }

    /// Monotonic counter bumped on every view change.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ViewChanged> {
        self.changes.subscribe()
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.state.read().view.get(key).map(<[u8]>::to_vec)
    }

    pub fn record(&self, key: &str) -> Option<ViewRecord> {
        self.state.read().view.record(key).cloned()
    }

    pub fn scan(&self, prefix: &str) -> Vec<(String, Vec<u8>)> {
        self.state.read().view.scan(prefix)
    }

    /// Copy of the current view.
    pub fn snapshot(&self) -> MaterializedView {
        self.state.read().view.clone()
    }

    /// Copy of the current writer set.
    pub fn writer_set(&self) -> WriterSet {
        self.state.read().writers.clone()
    }

    pub fn is_active(&self, writer: &WriterId) -> bool {
        self.state.read().writers.is_active(writer)
    }

    pub fn key_count(&self) -> usize {
        self.state.read().view.len()
    }

    pub fn stats(&self) -> FoldStats {
        self.state.read().stats
    }
}
