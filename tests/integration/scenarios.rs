//! Integration test: end-to-end scenarios between two peers, A and B.

use medley_engine::RecordStore;
use medley_net::MemoryDiscovery;
use medley_tests::{config, init_tracing, metadata, sync_pair};

/// A writes, B joins, B overwrites, both converge on B's value.
#[tokio::test]
async fn test_join_then_overwrite_converges() {
    init_tracing();
    let a = RecordStore::create(config(1)).unwrap();
    a.put("k1", "v1").unwrap();

    let b = RecordStore::unpaired(config(2)).unwrap();
    let token = a.create_invite(metadata("B")).unwrap();
    let discovery = MemoryDiscovery::new();
    let (accepted, joined) = tokio::join!(
        a.wait_for_redeemer(&token, &discovery),
        b.redeem_invite(&token, &discovery),
    );
    assert_eq!(accepted.unwrap(), b.local_id());
    joined.unwrap();

    sync_pair(&a, &b).await;
    assert_eq!(b.get("k1"), Some(b"v1".to_vec()));

    let v1 = a.view().record("k1").unwrap();
    let v2 = b.put("k1", "v2").unwrap();
    assert!(v2.hlc > v1.hlc, "B's write must order after A's");

    sync_pair(&a, &b).await;
    assert_eq!(a.get("k1"), Some(b"v2".to_vec()));
    assert_eq!(b.get("k1"), Some(b"v2".to_vec()));
}

/// A revokes B; B's later write is absent everywhere.
#[tokio::test]
async fn test_revoked_write_is_absent_on_both_peers() {
    init_tracing();
    let a = RecordStore::create(config(1)).unwrap();
    let b = RecordStore::unpaired(config(2)).unwrap();
    let token = a.create_invite(metadata("B")).unwrap();
    let discovery = MemoryDiscovery::new();
    let (accepted, joined) = tokio::join!(
        a.wait_for_redeemer(&token, &discovery),
        b.redeem_invite(&token, &discovery),
    );
    accepted.unwrap();
    joined.unwrap();

    a.revoke_writer(b.local_id()).unwrap();
    sync_pair(&a, &b).await;

    b.put("k2", "x").unwrap();
    sync_pair(&a, &b).await;

    assert_eq!(a.get("k2"), None);
    assert_eq!(b.get("k2"), None);
    assert_eq!(
        a.view().snapshot().state_hash(),
        b.view().snapshot().state_hash()
    );
}
