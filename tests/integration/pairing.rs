//! Integration test: pairing.
//!
//! Invites are single use, expire, and every admitted writer can bring in
//! more writers. Membership spreads to peers that were not part of the
//! handshake.

use std::time::Duration;

use medley_engine::{RecordStore, StoreConfig, StoreError};
use medley_net::MemoryDiscovery;
use medley_pairing::{PairingError, PairingState};
use medley_tests::{Mesh, config, metadata};

#[tokio::test]
async fn test_invite_cannot_be_redeemed_twice() {
    let mesh = Mesh::new(1).await;
    let issuer = mesh.peer(0);
    let token = issuer.create_invite(metadata("clinic")).unwrap();
    let discovery = MemoryDiscovery::new();

    let first = RecordStore::unpaired(config(10)).unwrap();
    let (accepted, joined) = tokio::join!(
        issuer.wait_for_redeemer(&token, &discovery),
        first.redeem_invite(&token, &discovery),
    );
    assert_eq!(accepted.unwrap(), joined.unwrap());

    let second = RecordStore::unpaired(config(11)).unwrap();
    let (accepted, joined) = tokio::join!(
        issuer.wait_for_redeemer(&token, &discovery),
        second.redeem_invite(&token, &discovery),
    );
    assert!(matches!(
        accepted,
        Err(StoreError::Pairing(PairingError::InviteAlreadyUsed))
    ));
    assert!(matches!(
        joined,
        Err(StoreError::Pairing(PairingError::InviteAlreadyUsed))
    ));

    // The second redeemer was never admitted anywhere.
    assert_eq!(second.root(), None);
    assert!(
        !issuer
            .writers()
            .iter()
            .any(|(w, _)| *w == second.local_id())
    );
}

#[tokio::test]
async fn test_each_invite_admits_one_writer() {
    let mut mesh = Mesh::new(1).await;
    for _ in 0..4 {
        mesh.add_peer().await;
    }
    mesh.sync_all().await;

    let status = mesh.peer(0).status();
    assert_eq!(status.writer_count, 5);
    assert_eq!(status.active_invites, 0);
    for i in 0..mesh.len() {
        assert!(mesh.peer(i).status().local_active, "peer {i} lacks write access");
    }
    let summaries = mesh.peer(0).list_invites();
    assert_eq!(summaries.len(), 4);
    assert!(
        summaries
            .iter()
            .all(|s| s.state == PairingState::WriterAdded)
    );
}

#[tokio::test]
async fn test_membership_reaches_peers_outside_the_handshake() {
    let mut mesh = Mesh::new(2).await;
    // Peer 1 (not the root) admits peer 2.
    let newcomer = mesh.add_peer_via(1).await;
    assert_eq!(mesh.peer(newcomer).root(), Some(mesh.id(0)));

    // The root has not heard of the newcomer yet.
    assert!(!mesh.peer(0).view().is_active(&mesh.id(newcomer)));
    mesh.peer(newcomer).put("intake", "done").unwrap();
    mesh.sync(newcomer, 0).await;

    // Grant and data arrive together and apply in order.
    assert!(mesh.peer(0).view().is_active(&mesh.id(newcomer)));
    assert_eq!(mesh.peer(0).get("intake"), Some(b"done".to_vec()));

    let (_, info) = mesh
        .peer(0)
        .writers()
        .into_iter()
        .find(|(w, _)| *w == mesh.id(newcomer))
        .unwrap();
    assert_eq!(info.added_by, Some(mesh.id(1)));
}

#[tokio::test]
async fn test_expired_invite_is_refused_by_both_sides() {
    let issuer = RecordStore::create(StoreConfig {
        invite_ttl: Duration::from_millis(20),
        ..config(1)
    })
    .unwrap();
    let token = issuer.create_invite(metadata("late")).unwrap();
    tokio::time::sleep(Duration::from_millis(40)).await;

    let discovery = MemoryDiscovery::with_timeout(Duration::from_millis(200));
    let redeemer = RecordStore::unpaired(config(2)).unwrap();
    let (accepted, joined) = tokio::join!(
        issuer.wait_for_redeemer(&token, &discovery),
        redeemer.redeem_invite(&token, &discovery),
    );
    assert!(matches!(
        accepted,
        Err(StoreError::Pairing(PairingError::InviteExpired))
    ));
    assert!(matches!(
        joined,
        Err(StoreError::Pairing(PairingError::InviteExpired))
    ));
    assert_eq!(issuer.status().writer_count, 1);
}

#[tokio::test]
async fn test_tampered_token_is_rejected() {
    let mesh = Mesh::new(1).await;
    let issuer = mesh.peer(0);
    let token = issuer.create_invite(metadata("x")).unwrap();

    // Flip one character in the middle of the token.
    let mut chars: Vec<char> = token.chars().collect();
    let mid = chars.len() / 2;
    chars[mid] = if chars[mid] == 'A' { 'B' } else { 'A' };
    let tampered: String = chars.into_iter().collect();

    let redeemer = RecordStore::unpaired(config(2)).unwrap();
    let discovery = MemoryDiscovery::with_timeout(Duration::from_millis(200));
    let result = redeemer.redeem_invite(&tampered, &discovery).await;
    assert!(result.is_err());
    assert_eq!(redeemer.root(), None);
}
