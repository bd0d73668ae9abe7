//! Last-writer-wins key-value view.

use std::collections::BTreeMap;

use medley_types::WriterId;
use serde::{Deserialize, Serialize};

use crate::order::OrderKey;

/// Winning record for one key.
///
/// A `Delete` leaves a tombstone (`value == None`) so that a delete can
/// still beat an older put that arrives later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewRecord {
    pub value: Option<Vec<u8>>,
    pub writer_id: WriterId,
    pub seq: u64,
    pub hlc: u64,
}

impl ViewRecord {
    pub fn order_key(&self) -> OrderKey {
        OrderKey {
            hlc: self.hlc,
            writer: self.writer_id,
            seq: self.seq,
        }
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// Wall-clock part of the timestamp, in milliseconds since the epoch.
    pub fn timestamp_millis(&self) -> u64 {
        self.hlc >> 16
    }
}

/// Key-value state produced by folding the logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaterializedView {
    records: BTreeMap<String, ViewRecord>,
}

impl MaterializedView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of `key`, or `None` if absent or deleted.
    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.records.get(key).and_then(|r| r.value.as_deref())
    }

    /// Winning record of `key`, tombstones included.
    pub fn record(&self, key: &str) -> Option<&ViewRecord> {
        self.records.get(key)
    }

    /// Live entries whose key starts with `prefix`, in key order.
    pub fn scan(&self, prefix: &str) -> Vec<(String, Vec<u8>)> {
        self.records
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter_map(|(k, r)| r.value.as_ref().map(|v| (k.clone(), v.clone())))
            .collect()
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.records.values().filter(|r| !r.is_tombstone()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records, tombstones included, in key order.
    pub fn records(&self) -> impl Iterator<Item = (&String, &ViewRecord)> {
        self.records.iter()
    }

    /// Digest over every record, for cheap convergence checks.
    pub fn state_hash(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        for (key, record) in &self.records {
            if let Ok(bytes) = postcard::to_allocvec(&(key, record)) {
                hasher.update(&bytes);
            }
        }
        hasher.finalize()
    }

    /// Install `record` for `key` if it is newer than the current winner.
    pub(crate) fn apply(&mut self, key: &str, record: ViewRecord) -> bool {
        match self.records.get(key) {
            Some(current) if current.order_key() >= record.order_key() => false,
            _ => {
                self.records.insert(key.to_string(), record);
                true
            }
        }
    }

    /// Keys whose record differs between `self` and `other`.
    pub(crate) fn diff_keys(&self, other: &MaterializedView) -> Vec<String> {
        let mut keys: Vec<String> = self
            .records
            .iter()
            .filter(|(k, r)| other.records.get(*k) != Some(*r))
            .map(|(k, _)| k.clone())
            .collect();
        keys.extend(
            other
                .records
                .keys()
                .filter(|k| !self.records.contains_key(*k))
                .cloned(),
        );
        keys.sort();
        keys
    }
}
