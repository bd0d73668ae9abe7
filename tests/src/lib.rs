//! Shared test harness for Medley integration tests.
//!
//! Provides [`Mesh`]: N in-process peers sharing one record store. Peer 0
//! creates the store; every other peer is admitted through a real invite
//! handshake over [`MemoryDiscovery`]. Sync rounds run over in-memory
//! channels, and [`Mesh::serve_tcp`] puts a peer behind a real socket.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use medley_engine::{RecordStore, StoreConfig};
use medley_log::WriterKey;
use medley_net::{Channel, MemoryDiscovery};
use medley_pairing::InviteMetadata;
use medley_sync::SyncReport;
use medley_types::WriterId;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Deterministic identity for peer `seed`.
pub fn test_key(seed: u8) -> WriterKey {
    WriterKey::from_bytes(&[seed; 32])
}

/// In-memory store settings owned by `test_key(seed)`.
pub fn config(seed: u8) -> StoreConfig {
    StoreConfig {
        identity: Some(test_key(seed)),
        sync_interval: Duration::from_millis(50),
        ..StoreConfig::in_memory()
    }
}

pub fn metadata(label: &str) -> InviteMetadata {
    InviteMetadata {
        label: label.to_string(),
        role: Some("provider".to_string()),
    }
}

/// Route `tracing` output through the test writer. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Admit an unpaired store into `issuer`'s store over in-memory discovery.
pub async fn pair(issuer: &RecordStore, redeemer: &RecordStore) -> WriterId {
    let token = issuer.create_invite(metadata("peer")).unwrap();
    let discovery = MemoryDiscovery::new();
    let (accepted, joined) = tokio::join!(
        issuer.wait_for_redeemer(&token, &discovery),
        redeemer.redeem_invite(&token, &discovery),
    );
    let writer = accepted.unwrap();
    assert_eq!(joined.unwrap(), writer);
    writer
}

/// One bidirectional sync round between two stores.
pub async fn sync_pair(a: &RecordStore, b: &RecordStore) -> (SyncReport, SyncReport) {
    let (mut a_chan, mut b_chan) = Channel::memory_pair();
    let (ra, rb) = tokio::join!(a.sync(&mut a_chan), b.sync(&mut b_chan));
    (ra.unwrap(), rb.unwrap())
}

// =========================================================================
// Mesh
// =========================================================================

/// In-process peers sharing one record store.
pub struct Mesh {
    peers: Vec<Arc<RecordStore>>,
    next_seed: u8,
}

impl Mesh {
    /// Create a store on peer 0 and admit `n - 1` more peers through it.
    pub async fn new(n: usize) -> Self {
        assert!(n >= 1, "a mesh needs at least one peer");
        init_tracing();
        let root = RecordStore::create(config(1)).unwrap();
        let mut mesh = Self {
            peers: vec![Arc::new(root)],
            next_seed: 2,
        };
        for _ in 1..n {
            mesh.add_peer().await;
        }
        mesh
    }

    /// Admit a new peer through peer 0. Returns its index.
    pub async fn add_peer(&mut self) -> usize {
        self.add_peer_via(0).await
    }

    /// Admit a new peer through `issuer`. Returns its index.
    pub async fn add_peer_via(&mut self, issuer: usize) -> usize {
        let seed = self.next_seed;
        self.next_seed += 1;
        let redeemer = RecordStore::unpaired(config(seed)).unwrap();
        pair(&self.peers[issuer], &redeemer).await;
        self.peers.push(Arc::new(redeemer));
        self.peers.len() - 1
    }

    pub fn peer(&self, i: usize) -> &RecordStore {
        &self.peers[i]
    }

    pub fn shared(&self, i: usize) -> Arc<RecordStore> {
        self.peers[i].clone()
    }

    pub fn id(&self, i: usize) -> WriterId {
        self.peers[i].local_id()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// One sync round between peers `a` and `b`.
    pub async fn sync(&self, a: usize, b: usize) -> (SyncReport, SyncReport) {
        sync_pair(&self.peers[a], &self.peers[b]).await
    }

    /// Sync every pair of peers until everyone holds every entry.
    pub async fn sync_all(&self) {
        for _ in 0..2 {
            for a in 0..self.len() {
                for b in (a + 1)..self.len() {
                    self.sync(a, b).await;
                }
            }
        }
    }

    /// Assert every peer holds the same logs and the same view.
    pub fn assert_converged(&self) {
        let digest = self.peers[0].logs().digest();
        let hash = self.peers[0].view().snapshot().state_hash();
        for (i, peer) in self.peers.iter().enumerate().skip(1) {
            assert_eq!(peer.logs().digest(), digest, "peer {i} log digest differs");
            assert_eq!(
                peer.view().snapshot().state_hash(),
                hash,
                "peer {i} view differs"
            );
        }
    }

    /// Serve peer `i` on a loopback socket until the returned handle is
    /// stopped. Every accepted connection gets a long-lived session.
    pub async fn serve_tcp(&self, i: usize) -> TcpPeer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, shutdown) = watch::channel(false);
        let store = self.shared(i);

        let task = tokio::spawn(async move {
            let mut sessions = Vec::new();
            let mut shutdown_rx = shutdown.clone();
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, remote)) = accepted else { break };
                        let channel = Channel::new(stream, remote.to_string());
                        let (store, shutdown) = (store.clone(), shutdown.clone());
                        sessions.push(tokio::spawn(async move {
                            let _ = store.replicate(channel, shutdown).await;
                        }));
                    }
                }
            }
            for session in sessions {
                let _ = session.await;
            }
        });

        TcpPeer { addr, stop, task }
    }
}

/// A peer served over TCP by [`Mesh::serve_tcp`].
pub struct TcpPeer {
    pub addr: SocketAddr,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TcpPeer {
    /// Stop accepting and wait for open sessions to wind down.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

/// Poll `store` until `key` holds `expected`, or panic after `timeout`.
pub async fn wait_for_value(
    store: &RecordStore,
    key: &str,
    expected: Option<&str>,
    timeout: Duration,
) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let current = store.get(key);
        if current.as_deref() == expected.map(str::as_bytes) {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "timed out waiting for {key} = {expected:?}, have {:?}",
                current.map(|v| String::from_utf8_lossy(&v).into_owned()),
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
