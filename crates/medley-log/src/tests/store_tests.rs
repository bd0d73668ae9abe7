//! Tests for LogStore persistence and the resume index.

use std::io::Write;

use super::{put, test_key};
use crate::error::LogError;
use crate::store::LogStore;

#[test]
fn test_in_memory_digest_tracks_lengths() {
    let store = LogStore::in_memory();
    let a = test_key(1);
    let b = test_key(2);

    store.append_local(&a, 10, put("x", "1")).unwrap();
    store.append_local(&a, 20, put("y", "2")).unwrap();
    store.get_or_create(b.id()).unwrap();

    let digest = store.digest();
    assert_eq!(digest.get(&a.id()), Some(&2));
    assert_eq!(digest.get(&b.id()), Some(&0));
    assert_eq!(store.entry_count(), 2);
}

#[test]
fn test_apply_remote_creates_replica() {
    let origin = LogStore::in_memory();
    let peer = LogStore::in_memory();
    let a = test_key(1);

    let e = origin.append_local(&a, 10, put("x", "1")).unwrap();
    assert!(peer.apply_remote(&e).unwrap());
    assert!(!peer.apply_remote(&e).unwrap());
    assert_eq!(peer.log(&a.id()).unwrap().length(), 1);
}

#[test]
fn test_append_notifies_subscribers() {
    let store = LogStore::in_memory();
    let a = test_key(1);
    let rx = store.subscribe_appends();

    store.append_local(&a, 10, put("x", "1")).unwrap();
    assert!(rx.has_changed().unwrap());
}

#[test]
fn test_reopen_restores_logs_and_identity() {
    let dir = tempfile::tempdir().unwrap();
    let a = test_key(1);
    let b = test_key(2);

    let remote = LogStore::in_memory();
    let rb = remote.append_local(&b, 5, put("r", "1")).unwrap();

    {
        let store = LogStore::open(dir.path()).unwrap();
        store.set_local(a.id()).unwrap();
        store.set_root(a.id()).unwrap();
        store.append_local(&a, 10, put("x", "1")).unwrap();
        store.append_local(&a, 20, put("y", "2")).unwrap();
        store.apply_remote(&rb).unwrap();
    }

    let store = LogStore::open(dir.path()).unwrap();
    assert_eq!(store.local(), Some(a.id()));
    assert_eq!(store.root(), Some(a.id()));
    assert_eq!(store.log(&a.id()).unwrap().length(), 2);
    assert_eq!(store.log(&b.id()).unwrap().length(), 1);

    // Appending after reopen continues the chain.
    let e = store.append_local(&a, 30, put("z", "3")).unwrap();
    assert_eq!(e.seq, 2);
}

#[test]
fn test_torn_tail_is_truncated() {
    let dir = tempfile::tempdir().unwrap();
    let a = test_key(1);

    {
        let store = LogStore::open(dir.path()).unwrap();
        store.append_local(&a, 10, put("x", "1")).unwrap();
    }

    // Simulate a crash halfway through writing the next frame.
    let seg = dir.path().join("logs").join(format!("{}.seg", a.id()));
    let mut file = std::fs::OpenOptions::new().append(true).open(&seg).unwrap();
    file.write_all(&[0, 0, 0, 50, 1, 2, 3]).unwrap();
    drop(file);

    let store = LogStore::open(dir.path()).unwrap();
    assert_eq!(store.log(&a.id()).unwrap().length(), 1);
    store.append_local(&a, 20, put("y", "2")).unwrap();

    let store = LogStore::open(dir.path()).unwrap();
    assert_eq!(store.log(&a.id()).unwrap().length(), 2);
}

#[test]
fn test_missing_entries_quarantine_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let a = test_key(1);

    {
        let store = LogStore::open(dir.path()).unwrap();
        store.append_local(&a, 10, put("x", "1")).unwrap();
        store.append_local(&a, 20, put("y", "2")).unwrap();
    }

    // Drop the segment contents behind the index's back.
    let seg = dir.path().join("logs").join(format!("{}.seg", a.id()));
    std::fs::write(&seg, b"").unwrap();

    let store = LogStore::open(dir.path()).unwrap();
    assert!(store.is_corrupted(&a.id()));
    assert!(store.log(&a.id()).is_none());
    assert!(!store.digest().contains_key(&a.id()));
}

#[test]
fn test_tampered_log_is_quarantined_and_others_survive() {
    let dir = tempfile::tempdir().unwrap();
    let a = test_key(1);
    let b = test_key(2);

    let remote = LogStore::in_memory();
    let rb = remote.append_local(&b, 5, put("r", "1")).unwrap();
    {
        let store = LogStore::open(dir.path()).unwrap();
        store.append_local(&a, 10, put("x", "AAAA")).unwrap();
        store.apply_remote(&rb).unwrap();
    }

    let seg = dir.path().join("logs").join(format!("{}.seg", a.id()));
    let mut bytes = std::fs::read(&seg).unwrap();
    let pos = bytes.windows(4).position(|w| w == b"AAAA").unwrap();
    bytes[pos] = b'B';
    std::fs::write(&seg, bytes).unwrap();

    let store = LogStore::open(dir.path()).unwrap();
    let detail = store.corrupted().get(&a.id()).unwrap();
    assert!(detail.contains("entry 0"), "{detail}");
    assert_eq!(store.log(&b.id()).unwrap().length(), 1);
    assert_eq!(store.entry_count(), 1);

    // Refused for appends, local or replicated, until an operator steps in.
    assert!(matches!(
        store.append_local(&a, 20, put("y", "2")),
        Err(LogError::Corrupted { .. })
    ));
    let fresh = LogStore::in_memory();
    let ra = fresh.append_local(&a, 10, put("x", "AAAA")).unwrap();
    assert!(matches!(store.apply_remote(&ra), Err(LogError::Corrupted { .. })));
    // The damaged segment is left in place.
    assert!(seg.exists());
}

#[test]
fn test_replicated_entries_reach_the_index_on_flush() {
    let dir = tempfile::tempdir().unwrap();
    let b = test_key(2);
    let index = dir.path().join("index.bin");

    let remote = LogStore::in_memory();
    let entries: Vec<_> = (0..10)
        .map(|i| remote.append_local(&b, 10 + i, put("k", "v")).unwrap())
        .collect();

    let store = LogStore::open(dir.path()).unwrap();
    store.set_local(test_key(1).id()).unwrap();
    let before = std::fs::read(&index).unwrap();
    for entry in &entries {
        assert!(store.apply_remote(entry).unwrap());
    }
    assert_eq!(std::fs::read(&index).unwrap(), before, "index rewritten per entry");

    store.flush_index().unwrap();
    let flushed = std::fs::read(&index).unwrap();
    assert_ne!(flushed, before);
    store.flush_index().unwrap();
    assert_eq!(std::fs::read(&index).unwrap(), flushed);
    drop(store);

    let store = LogStore::open(dir.path()).unwrap();
    assert_eq!(store.log(&b.id()).unwrap().length(), 10);
    assert!(store.corrupted().is_empty());
}

#[test]
fn test_unflushed_replicas_are_recovered_on_open() {
    let dir = tempfile::tempdir().unwrap();
    let b = test_key(2);

    let remote = LogStore::in_memory();
    let e0 = remote.append_local(&b, 10, put("k", "1")).unwrap();
    let e1 = remote.append_local(&b, 20, put("k", "2")).unwrap();

    {
        let store = LogStore::open(dir.path()).unwrap();
        store.apply_remote(&e0).unwrap();
        store.flush_index().unwrap();
        store.apply_remote(&e1).unwrap();
        // Crash: the index never hears about e1.
        std::mem::forget(store);
    }

    let store = LogStore::open(dir.path()).unwrap();
    assert_eq!(store.log(&b.id()).unwrap().length(), 2);
    assert!(store.corrupted().is_empty());
}
