//! Tests for the view crate.


use medley_log::{EntryPayload, LogEntry, LogStore, WriterKey};
use medley_types::WriterId;

fn test_key(seed: u8) -> WriterKey {
    WriterKey::from_bytes(&[seed; 32])
}

fn put(key: &str, value: &str) -> EntryPayload {
    EntryPayload::Put {
        key: key.to_string(),
        value: value.as_bytes().to_vec(),
    }
}

fn delete(key: &str) -> EntryPayload {
    EntryPayload::Delete {
        key: key.to_string(),
    }
}

fn add_writer(by: &WriterKey, new: WriterId) -> EntryPayload {
    EntryPayload::AddWriter {
        new_writer_id: new,
        granted_by: by.id(),
    }
}

fn remove_writer(by: &WriterKey, writer: WriterId) -> EntryPayload {
    EntryPayload::RemoveWriter {
        writer_id: writer,
        revoked_by: by.id(),
    }
}

/// Signs entries for several writers into a scratch store.
struct Authoring {
    store: LogStore,
}

impl Authoring {
    fn new() -> Self {
        Self {
            store: LogStore::in_memory(),
        }
    }

    fn write(&self, key: &WriterKey, hlc: u64, payload: EntryPayload) -> LogEntry {
        self.store.append_local(key, hlc, payload).unwrap()
    }
}
