//! Integration test: revocation.
//!
//! A revoked writer keeps its log, and peers keep replicating it, but
//! nothing it writes after the revocation position reaches any view.

use std::time::Duration;

use medley_engine::StoreError;
use medley_tests::Mesh;

#[tokio::test]
async fn test_writes_after_revocation_never_reach_the_view() {
    let mesh = Mesh::new(3).await;
    let (root, revoked, bystander) = (0, 1, 2);
    mesh.peer(revoked).put("bp", "120/80").unwrap();
    mesh.sync_all().await;

    mesh.peer(root).revoke_writer(mesh.id(revoked)).unwrap();
    // The revoked peer has not heard yet and keeps writing.
    tokio::time::sleep(Duration::from_millis(5)).await;
    mesh.peer(revoked).put("bp", "90/60").unwrap();
    mesh.peer(revoked).put("k2", "x").unwrap();

    // Locally the writes still look fine to the revoked peer.
    assert_eq!(mesh.peer(revoked).get("k2"), Some(b"x".to_vec()));

    mesh.sync_all().await;
    mesh.assert_converged();

    for i in [root, revoked, bystander] {
        let peer = mesh.peer(i);
        assert_eq!(peer.get("k2"), None, "peer {i} shows a revoked write");
        assert_eq!(peer.get("bp"), Some(b"120/80".to_vec()), "peer {i}");
        // The entries themselves are retained.
        assert_eq!(peer.logs().log(&mesh.id(revoked)).unwrap().length(), 3);
    }
    assert!(!mesh.peer(revoked).status().local_active);
}

#[tokio::test]
async fn test_revoked_writer_loses_membership_rights() {
    let mesh = Mesh::new(2).await;
    mesh.peer(0).revoke_writer(mesh.id(1)).unwrap();
    mesh.sync(0, 1).await;

    assert!(matches!(
        mesh.peer(1).create_invite(medley_tests::metadata("friend")),
        Err(StoreError::NotActive(w)) if w == mesh.id(1)
    ));
    assert!(matches!(
        mesh.peer(1).revoke_writer(mesh.id(0)),
        Err(StoreError::NotActive(_))
    ));
}

#[tokio::test]
async fn test_writers_admitted_by_a_revoked_writer_keep_access() {
    let mut mesh = Mesh::new(2).await;
    let grandchild = mesh.add_peer_via(1).await;
    mesh.sync_all().await;

    mesh.peer(0).revoke_writer(mesh.id(1)).unwrap();
    mesh.sync_all().await;

    // The grant was made while peer 1 was active, so it stands.
    mesh.peer(grandchild).put("still", "here").unwrap();
    mesh.sync_all().await;
    mesh.assert_converged();
    assert_eq!(mesh.peer(0).get("still"), Some(b"here".to_vec()));
    assert!(mesh.peer(0).view().is_active(&mesh.id(grandchild)));
    assert!(!mesh.peer(0).view().is_active(&mesh.id(1)));
}

#[tokio::test]
async fn test_regranted_writer_is_active_again() {
    let mesh = Mesh::new(3).await;
    let writer = mesh.id(1);
    mesh.peer(0).revoke_writer(writer).unwrap();
    mesh.sync_all().await;
    mesh.peer(1).put("while-revoked", "x").unwrap();

    // Already paired stores cannot redeem a fresh invite.
    let token = mesh.peer(0).create_invite(medley_tests::metadata("again")).unwrap();
    let discovery = medley_net::MemoryDiscovery::new();
    assert!(matches!(
        mesh.peer(1).redeem_invite(&token, &discovery).await,
        Err(StoreError::AlreadyInitialized)
    ));

    // Peer 2, not the root, re-admits the writer directly.
    mesh.sync_all().await;
    mesh.peer(2).add_writer(writer).unwrap();
    mesh.sync_all().await;
    tokio::time::sleep(Duration::from_millis(2)).await;
    mesh.peer(1).put("after", "y").unwrap();
    mesh.sync_all().await;
    mesh.assert_converged();

    assert!(mesh.peer(0).view().is_active(&writer));
    assert_eq!(mesh.peer(0).get("after"), Some(b"y".to_vec()));
    assert_eq!(mesh.peer(0).get("while-revoked"), None);
}
