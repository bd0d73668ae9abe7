//! Tests for the log crate.

mod store_tests;

use crate::entry::EntryPayload;
use crate::identity::WriterKey;

/// Deterministic writer identity from a seed byte.
fn test_key(seed: u8) -> WriterKey {
    WriterKey::from_bytes(&[seed; 32])
}

fn put(key: &str, value: &str) -> EntryPayload {
    EntryPayload::Put {
        key: key.to_string(),
        value: value.as_bytes().to_vec(),
    }
}
