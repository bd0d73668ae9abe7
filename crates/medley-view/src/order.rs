//! Global linearization key.

use medley_log::LogEntry;
use medley_types::WriterId;
use serde::{Deserialize, Serialize};

/// Position of an entry in the global order.
///
/// Compared field by field: timestamp first, then writer identity bytes,
/// then sequence number. `seq` only matters for two entries of the same
/// writer, whose timestamps already differ, so it never overrides the first
/// two fields between different writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderKey {
    /// Hybrid logical clock timestamp embedded in the entry.
    pub hlc: u64,
    /// Author of the entry.
    pub writer: WriterId,
    /// Position in the author's log.
    pub seq: u64,
}

impl OrderKey {
    /// Order key of a log entry.
    pub fn of(entry: &LogEntry) -> Self {
        Self {
            hlc: entry.hlc,
            writer: entry.writer_id,
            seq: entry.seq,
        }
    }
}
