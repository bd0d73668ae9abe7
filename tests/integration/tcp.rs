//! Integration test: pairing and replication over real TCP sockets.

use std::net::SocketAddr;
use std::time::Duration;

use medley_engine::RecordStore;
use medley_net::{TcpDiscovery, connect_tcp};
use medley_tests::{Mesh, config, init_tracing, metadata, wait_for_value};
use tokio::net::TcpListener;
use tokio::sync::watch;

const TIMEOUT: Duration = Duration::from_secs(5);

/// A loopback address nobody is listening on right now.
async fn free_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

#[tokio::test]
async fn test_pairing_over_tcp() {
    init_tracing();
    let issuer = RecordStore::create(config(1)).unwrap();
    issuer.put("history", "appendectomy 2019").unwrap();
    let redeemer = RecordStore::unpaired(config(2)).unwrap();

    let addr = free_addr().await;
    let token = issuer.create_invite(metadata("tcp")).unwrap();
    let listen = TcpDiscovery::listen(addr);
    let dial = TcpDiscovery::dial(addr).with_timeout(TIMEOUT);
    let (accepted, joined) = tokio::join!(
        issuer.wait_for_redeemer(&token, &listen),
        redeemer.redeem_invite(&token, &dial),
    );

    assert_eq!(accepted.unwrap(), redeemer.local_id());
    joined.unwrap();
    assert_eq!(redeemer.root(), Some(issuer.local_id()));
    assert_eq!(
        redeemer.get("history"),
        Some(b"appendectomy 2019".to_vec())
    );
}

#[tokio::test]
async fn test_one_shot_sync_against_a_serving_peer() {
    let mesh = Mesh::new(2).await;
    mesh.peer(0).put("served", "yes").unwrap();
    let server = mesh.serve_tcp(0).await;

    mesh.peer(1).put("dialed", "yes").unwrap();
    let mut channel = connect_tcp(server.addr, TIMEOUT).await.unwrap();
    let report = mesh.peer(1).sync(&mut channel).await.unwrap();
    drop(channel);

    assert_eq!(report.applied, 1);
    assert_eq!(report.served, 1);
    assert_eq!(mesh.peer(1).get("served"), Some(b"yes".to_vec()));
    wait_for_value(mesh.peer(0), "dialed", Some("yes"), TIMEOUT).await;

    server.stop().await;
}

#[tokio::test]
async fn test_long_lived_sessions_stream_writes_both_ways() {
    let mesh = Mesh::new(3).await;
    let server = mesh.serve_tcp(0).await;
    let (stop, shutdown) = watch::channel(false);

    // Peers 1 and 2 each keep a session open with peer 0.
    let mut clients = Vec::new();
    for i in [1, 2] {
        let store = mesh.shared(i);
        let channel = connect_tcp(server.addr, TIMEOUT).await.unwrap();
        let shutdown = shutdown.clone();
        clients.push(tokio::spawn(async move {
            store.replicate(channel, shutdown).await
        }));
    }

    mesh.peer(0).put("from-root", "0").unwrap();
    wait_for_value(mesh.peer(1), "from-root", Some("0"), TIMEOUT).await;
    wait_for_value(mesh.peer(2), "from-root", Some("0"), TIMEOUT).await;

    // Peer 1's write reaches peer 2 through peer 0.
    mesh.peer(1).put("from-one", "1").unwrap();
    wait_for_value(mesh.peer(2), "from-one", Some("1"), TIMEOUT).await;

    mesh.peer(2).delete("from-root").unwrap();
    wait_for_value(mesh.peer(1), "from-root", None, TIMEOUT).await;

    stop.send(true).unwrap();
    for client in clients {
        let stats = client.await.unwrap().unwrap();
        assert!(stats.rounds >= 1);
    }
    server.stop().await;
    mesh.assert_converged();
}

#[tokio::test]
async fn test_dial_without_listener_fails_cleanly() {
    let addr = free_addr().await;
    let redeemer = RecordStore::unpaired(config(3)).unwrap();
    let issuer = RecordStore::create(config(4)).unwrap();
    let token = issuer.create_invite(metadata("nobody home")).unwrap();

    let discovery = TcpDiscovery::dial(addr).with_timeout(Duration::from_millis(200));
    assert!(redeemer.redeem_invite(&token, &discovery).await.is_err());
    assert_eq!(redeemer.root(), None);
}
