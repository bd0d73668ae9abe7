//! Integration test: convergence.
//!
//! The view is a pure function of the entry set. Folding the same entries in
//! any order that respects each writer's sequence, applying them twice, or
//! spreading them across peers in any sync pattern ends in the same view.

use std::collections::VecDeque;
use std::time::Duration;

use medley_log::{EntryPayload, LogEntry, LogStore, WriterLog};
use medley_tests::{Mesh, sync_pair, test_key};
use medley_view::{AcceptAll, ViewBuilder, materialize};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// =========================================================================
// Fixtures
// =========================================================================

fn put(key: &str, value: &str) -> EntryPayload {
    EntryPayload::Put {
        key: key.to_string(),
        value: value.as_bytes().to_vec(),
    }
}

/// Three writers editing overlapping keys. Writer 1 is the root, admits 2
/// and 3, and revokes 3 half way through.
fn history() -> Vec<Vec<LogEntry>> {
    let (root, alice, bob) = (test_key(1), test_key(2), test_key(3));
    let root_log = WriterLog::in_memory(root.id());
    let alice_log = WriterLog::in_memory(alice.id());
    let bob_log = WriterLog::in_memory(bob.id());

    let mut hlc = 1_000u64 << 16;
    let mut next = || {
        hlc += 7;
        hlc
    };

    let grant = |id| EntryPayload::AddWriter {
        new_writer_id: id,
        granted_by: root.id(),
    };
    root_log.append(&root, next(), put("allergies", "none")).unwrap();
    root_log.append(&root, next(), grant(alice.id())).unwrap();
    root_log.append(&root, next(), grant(bob.id())).unwrap();

    alice_log.append(&alice, next(), put("allergies", "penicillin")).unwrap();
    bob_log.append(&bob, next(), put("bp", "120/80")).unwrap();
    alice_log.append(&alice, next(), put("bp", "118/79")).unwrap();
    bob_log.append(&bob, next(), put("notes", "follow up in 2w")).unwrap();

    root_log
        .append(
            &root,
            next(),
            EntryPayload::RemoveWriter {
                writer_id: bob.id(),
                revoked_by: root.id(),
            },
        )
        .unwrap();

    // Ignored: bob is no longer active here.
    bob_log.append(&bob, next(), put("bp", "200/120")).unwrap();
    alice_log
        .append(
            &alice,
            next(),
            EntryPayload::Delete {
                key: "notes".to_string(),
            },
        )
        .unwrap();
    root_log.append(&root, next(), put("meds", "ibuprofen")).unwrap();

    vec![root_log.entries(), alice_log.entries(), bob_log.entries()]
}

/// A random merge of the per-writer sequences that keeps each in order.
fn interleave(logs: &[Vec<LogEntry>], rng: &mut StdRng) -> Vec<LogEntry> {
    let mut queues: Vec<VecDeque<LogEntry>> =
        logs.iter().map(|l| l.iter().cloned().collect()).collect();
    let mut out = Vec::new();
    loop {
        let live: Vec<usize> = (0..queues.len()).filter(|&i| !queues[i].is_empty()).collect();
        if live.is_empty() {
            return out;
        }
        let pick = live[rng.gen_range(0..live.len())];
        out.extend(queues[pick].pop_front());
    }
}

// =========================================================================
// Order independence
// =========================================================================

#[test]
fn test_fold_is_order_independent() {
    let logs = history();
    let all: Vec<LogEntry> = logs.iter().flatten().cloned().collect();
    let root = Some(test_key(1).id());
    let (reference, writers) = materialize(root, all.clone(), &AcceptAll);

    assert_eq!(reference.get("allergies"), Some(&b"penicillin"[..]));
    assert_eq!(reference.get("bp"), Some(&b"118/79"[..]));
    assert_eq!(reference.get("notes"), None);
    assert_eq!(reference.get("meds"), Some(&b"ibuprofen"[..]));
    assert!(!writers.is_active(&test_key(3).id()));

    let mut rng = StdRng::seed_from_u64(0x5eed);
    for round in 0..50 {
        let order = interleave(&logs, &mut rng);
        let (view, _) = materialize(root, order, &AcceptAll);
        assert_eq!(
            view.state_hash(),
            reference.state_hash(),
            "interleaving {round} produced a different view"
        );
    }

    // Fully reversed input as well.
    let mut reversed = all;
    reversed.reverse();
    let (view, _) = materialize(root, reversed, &AcceptAll);
    assert_eq!(view.state_hash(), reference.state_hash());
}

#[test]
fn test_incremental_fold_matches_rebuild_in_any_arrival_order() {
    let logs = history();
    let root = test_key(1).id();
    let (reference, _) = materialize(Some(root), logs.iter().flatten().cloned(), &AcceptAll);

    let mut rng = StdRng::seed_from_u64(42);
    for round in 0..25 {
        let store = LogStore::in_memory();
        let view = ViewBuilder::new(Some(root));
        for entry in interleave(&logs, &mut rng) {
            store.apply_remote(&entry).unwrap();
            view.apply_incremental(&store, &[entry]);
        }
        assert_eq!(
            view.snapshot().state_hash(),
            reference.state_hash(),
            "incremental fold {round} diverged"
        );
    }
}

// =========================================================================
// Idempotence
// =========================================================================

#[test]
fn test_applying_a_batch_twice_changes_nothing() {
    let logs = history();
    let root = test_key(1).id();
    let batch: Vec<LogEntry> = logs.iter().flatten().cloned().collect();

    let store = LogStore::in_memory();
    let view = ViewBuilder::new(Some(root));
    for entry in &batch {
        assert!(store.apply_remote(entry).unwrap());
    }
    view.refresh(&store);
    let once = view.snapshot().state_hash();
    let version = view.version();

    for entry in &batch {
        assert!(!store.apply_remote(entry).unwrap(), "duplicate was re-applied");
    }
    assert!(view.apply_incremental(&store, &batch).is_empty());
    assert!(view.refresh(&store).is_empty());

    assert_eq!(view.snapshot().state_hash(), once);
    assert_eq!(view.version(), version);
    assert_eq!(store.entry_count(), batch.len() as u64);
}

#[tokio::test]
async fn test_repeated_sync_is_idempotent() {
    let mesh = Mesh::new(2).await;
    mesh.peer(0).put("k", "v").unwrap();
    mesh.peer(1).put("j", "w").unwrap();

    let (first_a, first_b) = mesh.sync(0, 1).await;
    assert_eq!(first_a.applied + first_b.applied, 2);
    let hash = mesh.peer(0).view().snapshot().state_hash();

    let (again_a, again_b) = mesh.sync(0, 1).await;
    assert_eq!(again_a.applied, 0);
    assert_eq!(again_b.applied, 0);
    assert_eq!(again_a.served + again_b.served, 0);
    assert_eq!(mesh.peer(0).view().snapshot().state_hash(), hash);
    mesh.assert_converged();
}

// =========================================================================
// Round trip
// =========================================================================

#[tokio::test]
async fn test_put_is_readable_locally_then_remotely() {
    let mesh = Mesh::new(2).await;

    mesh.peer(0).put("vitals/hr", "72").unwrap();
    assert_eq!(mesh.peer(0).get("vitals/hr"), Some(b"72".to_vec()));
    assert_eq!(mesh.peer(1).get("vitals/hr"), None);

    mesh.sync(0, 1).await;
    assert_eq!(mesh.peer(1).get("vitals/hr"), Some(b"72".to_vec()));

    mesh.peer(1).put("vitals/temp", "36.8").unwrap();
    mesh.sync(1, 0).await;
    assert_eq!(mesh.peer(0).get("vitals/temp"), Some(b"36.8".to_vec()));
}

// =========================================================================
// Multi-peer
// =========================================================================

#[tokio::test]
async fn test_five_peers_converge_after_concurrent_writes() {
    let mesh = Mesh::new(5).await;

    for i in 0..mesh.len() {
        for n in 0..10 {
            mesh.peer(i).put(&format!("peer{i}/{n:02}"), format!("{i}:{n}")).unwrap();
        }
        // Everybody also fights over one shared key.
        mesh.peer(i).put("shared", format!("from {i}")).unwrap();
    }

    mesh.sync_all().await;
    mesh.assert_converged();

    for i in 0..mesh.len() {
        let peer = mesh.peer(i);
        assert_eq!(peer.scan("peer").len(), 50, "peer {i} is missing records");
        assert_eq!(peer.get("peer3/07"), Some(b"3:7".to_vec()));
    }
    let winner = mesh.peer(0).view().record("shared").unwrap();
    assert!(mesh.peer(0).writers().iter().any(|(w, _)| *w == winner.writer_id));
}

#[tokio::test]
async fn test_chain_topology_converges() {
    // 0 <-> 1 <-> 2 <-> 3, no direct link between the ends.
    let mesh = Mesh::new(4).await;
    mesh.peer(0).put("left", "0").unwrap();
    mesh.peer(3).put("right", "3").unwrap();

    for _ in 0..3 {
        for i in 0..3 {
            mesh.sync(i, i + 1).await;
        }
    }

    assert_eq!(mesh.peer(3).get("left"), Some(b"0".to_vec()));
    assert_eq!(mesh.peer(0).get("right"), Some(b"3".to_vec()));
    mesh.assert_converged();
}

#[tokio::test]
async fn test_offline_edits_merge_deterministically() {
    let mesh = Mesh::new(3).await;
    mesh.sync_all().await;

    // Peers edit while disconnected.
    mesh.peer(1).put("plan", "physio").unwrap();
    tokio::time::sleep(Duration::from_millis(2)).await;
    mesh.peer(2).put("plan", "surgery").unwrap();
    mesh.peer(1).delete("draft").unwrap();
    mesh.peer(0).put("draft", "keep?").unwrap();

    // Partial merges first, then everything.
    mesh.sync(1, 0).await;
    assert_eq!(mesh.peer(0).get("plan"), Some(b"physio".to_vec()));
    mesh.sync_all().await;
    mesh.assert_converged();

    // The later order key wins everywhere.
    for i in 0..3 {
        assert_eq!(mesh.peer(i).get("plan"), Some(b"surgery".to_vec()));
    }
    let draft = mesh.peer(0).view().record("draft").unwrap();
    let expected = if draft.writer_id == mesh.id(0) {
        Some(b"keep?".to_vec())
    } else {
        None
    };
    assert_eq!(mesh.peer(2).get("draft"), expected);
}

#[tokio::test]
async fn test_sync_with_empty_peer_ships_full_history() {
    let mesh = Mesh::new(2).await;
    for n in 0..200 {
        mesh.peer(0).put(&format!("k{n:03}"), vec![n as u8; 64]).unwrap();
    }
    mesh.sync(0, 1).await;

    let late = medley_engine::RecordStore::unpaired(medley_tests::config(50)).unwrap();
    medley_tests::pair(mesh.peer(1), &late).await;
    assert_eq!(late.scan("k").len(), 200);
    sync_pair(mesh.peer(0), &late).await;
    assert_eq!(
        late.view().snapshot().state_hash(),
        mesh.peer(0).view().snapshot().state_hash()
    );
}
