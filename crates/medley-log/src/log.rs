//! A single writer's append-only log.

use medley_types::{EntryHash, WriterId};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::entry::{EntryPayload, LogEntry};
use crate::error::{InvalidReason, LogError};
use crate::identity::WriterKey;
use crate::segment::SegmentFile;

type Result<T> = std::result::Result<T, LogError>;

/// Length and last entry of a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHead {
    /// Number of entries in the log.
    pub length: u64,
    /// Hash of the last entry.
    pub hash: EntryHash,
    /// Timestamp of the last entry.
    pub hlc: u64,
}

/// Where appended entries are made durable.
enum Storage {
    Memory,
    Segment(SegmentFile),
}

/// Append-only, hash-chained log of one writer.
///
/// The owner appends through [`WriterLog::append`]; every other peer holds a
/// replica that only grows through [`WriterLog::append_replica`], which
/// verifies each entry before accepting it. Appends are serialized by the
/// storage lock and become visible to `length()`/`range()` only after they
/// are durable.
pub struct WriterLog {
    writer_id: WriterId,
    entries: RwLock<Vec<LogEntry>>,
    storage: Mutex<Storage>,
}

impl WriterLog {
    /// Create an empty, memory-only log.
    pub fn in_memory(writer_id: WriterId) -> Self {
        Self {
            writer_id,
            entries: RwLock::new(Vec::new()),
            storage: Mutex::new(Storage::Memory),
        }
    }

    /// Wrap a segment whose entries have already been validated.
    pub(crate) fn from_segment(
        writer_id: WriterId,
        segment: SegmentFile,
        entries: Vec<LogEntry>,
    ) -> Self {
        Self {
            writer_id,
            entries: RwLock::new(entries),
            storage: Mutex::new(Storage::Segment(segment)),
        }
    }

    /// The writer owning this log.
    pub fn writer_id(&self) -> WriterId {
        self.writer_id
    }

    /// Number of entries.
    pub fn length(&self) -> u64 {
        self.entries.read().len() as u64
    }

    /// Length and last entry, or `None` for an empty log.
    pub fn head(&self) -> Option<LogHead> {
        let entries = self.entries.read();
        entries.last().map(|e| LogHead {
            length: entries.len() as u64,
            hash: e.hash,
            hlc: e.hlc,
        })
    }

    /// Entry at `seq`, if present.
    pub fn get(&self, seq: u64) -> Option<LogEntry> {
        self.entries.read().get(seq as usize).cloned()
    }

    /// Snapshot of every entry.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.read().clone()
    }

    /// Lazy iterator over `[from, to)`, clamped to the current length.
    pub fn range(&self, from: u64, to: u64) -> LogRange<'_> {
        let end = to.min(self.length());
        LogRange {
            log: self,
            start: from.min(end),
            next: from.min(end),
            end,
        }
    }

    /// Sign and append a new entry. Only the owner's key may append.
    ///
    /// `hlc` is raised past the previous entry's timestamp if needed so the
    /// per-log timestamp order always follows `seq`.
    pub fn append(&self, signer: &WriterKey, hlc: u64, payload: EntryPayload) -> Result<LogEntry> {
        if signer.id() != self.writer_id {
            return Err(LogError::NotOwner {
                log: self.writer_id,
                signer: signer.id(),
            });
        }

        let mut storage = self.storage.lock();
        let (seq, prev_hash, floor) = match self.head() {
            Some(head) => {
                let floor = head
                    .hlc
                    .checked_add(1)
                    .ok_or(LogError::ClockExhausted(self.writer_id))?;
                (head.length, head.hash, floor)
            }
            None => (0, EntryHash::ZERO, 1),
        };
        let hlc = hlc.max(floor);

        let entry = LogEntry::new_signed(seq, prev_hash, hlc, payload, signer.signing_key());
        if let Storage::Segment(segment) = &mut *storage {
            segment.append(&entry)?;
        }
        self.entries.write().push(entry.clone());

        debug!(
            writer = %self.writer_id.short(),
            seq,
            kind = entry.payload.kind(),
            "appended log entry"
        );

        Ok(entry)
    }

    /// Whether `entry` would be accepted as the next entry of this log.
    pub fn verify(&self, entry: &LogEntry) -> bool {
        self.check_next(entry).is_ok()
    }

    /// Check `entry` against the current head.
    pub fn check_next(&self, entry: &LogEntry) -> Result<()> {
        let entries = self.entries.read();
        check_successor(self.writer_id, entries.last(), entry, true).map_err(|reason| {
            LogError::InvalidEntry {
                writer: entry.writer_id,
                seq: entry.seq,
                reason,
            }
        })
    }

    /// Append an entry received from a peer.
    ///
    /// Returns `Ok(false)` if the identical entry is already present.
    /// Anything that fails verification is rejected with
    /// [`LogError::InvalidEntry`] and leaves the log unchanged.
    pub fn append_replica(&self, entry: &LogEntry) -> Result<bool> {
        let mut storage = self.storage.lock();

        if let Some(existing) = self.get(entry.seq) {
            if existing.hash == entry.hash && existing.writer_id == entry.writer_id {
                return Ok(false);
            }
            warn!(
                writer = %self.writer_id.short(),
                seq = entry.seq,
                "rejecting entry that conflicts with stored entry"
            );
            return Err(LogError::InvalidEntry {
                writer: entry.writer_id,
                seq: entry.seq,
                reason: InvalidReason::Conflict,
            });
        }

        self.check_next(entry)?;

        if let Storage::Segment(segment) = &mut *storage {
            segment.append(entry)?;
        }
        self.entries.write().push(entry.clone());
        Ok(true)
    }
}

/// Check that `entry` directly follows `prev` in `writer`'s log.
pub(crate) fn check_successor(
    writer: WriterId,
    prev: Option<&LogEntry>,
    entry: &LogEntry,
    verify_signature: bool,
) -> std::result::Result<(), InvalidReason> {
    if entry.writer_id != writer {
        return Err(InvalidReason::WrongWriter);
    }

    let (expected_seq, expected_prev, prev_hlc) = match prev {
        Some(p) => (p.seq + 1, p.hash, p.hlc),
        None => (0, EntryHash::ZERO, 0),
    };
    if entry.seq != expected_seq {
        return Err(InvalidReason::SeqGap {
            expected: expected_seq,
            got: entry.seq,
        });
    }
    if entry.prev_hash != expected_prev {
        return Err(InvalidReason::BrokenChain);
    }
    if entry.hlc <= prev_hlc {
        return Err(InvalidReason::ClockRegression);
    }
    if !entry.verify_hash() {
        return Err(InvalidReason::BadHash);
    }
    if verify_signature && !entry.verify_signature() {
        return Err(InvalidReason::BadSignature);
    }
    Ok(())
}

/// Lazy, finite iterator over a slice of a [`WriterLog`].
///
/// Each step takes the log's read lock only long enough to clone one entry,
/// so a range can be held across network writes without blocking appends.
/// Cloning the range (or calling [`LogRange::restart`]) restarts it.
#[derive(Clone)]
pub struct LogRange<'a> {
    log: &'a WriterLog,
    start: u64,
    next: u64,
    end: u64,
}

impl LogRange<'_> {
    /// Rewind to the first entry of the range.
    pub fn restart(&mut self) {
        self.next = self.start;
    }

    /// Entries left to yield.
    pub fn remaining(&self) -> u64 {
        self.end - self.next
    }
}

impl Iterator for LogRange<'_> {
    type Item = LogEntry;

    fn next(&mut self) -> Option<LogEntry> {
        if self.next >= self.end {
            return None;
        }
        let entry = self.log.get(self.next)?;
        self.next += 1;
        Some(entry)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.remaining() as usize;
        (n, Some(n))
    }
}
