//! Long-running replication for `medleyd serve`.
//!
//! Accepts peer connections on the listen address and keeps an outgoing
//! session open with every configured peer, redialing after failures. Each
//! connection is its own [`PeerSession`](medley_sync::PeerSession) task.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use medley_engine::RecordStore;
use medley_net::{Channel, connect_tcp};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

const DIAL_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_REDIAL_DELAY: Duration = Duration::from_secs(60);

/// Serve until `shutdown` flips to `true`.
pub async fn serve(
    store: Arc<RecordStore>,
    listener: TcpListener,
    peers: Vec<SocketAddr>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let mut sessions = JoinSet::new();
    for peer in peers {
        sessions.spawn(dial_loop(store.clone(), peer, shutdown.clone()));
    }

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => {
                let (stream, addr) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                let _ = stream.set_nodelay(true);
                info!(peer = %addr, "peer connected");
                let channel = Channel::new(stream, addr.to_string());
                let (store, shutdown) = (store.clone(), shutdown.clone());
                sessions.spawn(async move {
                    run_session(&store, channel, shutdown).await;
                });
            }
            // Reap finished sessions so the set does not grow unbounded.
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
        }
    }

    info!(
        sessions = sessions.len(),
        connected = store.connected_peers(),
        "waiting for peer sessions to stop"
    );
    while sessions.join_next().await.is_some() {}
    Ok(())
}

async fn run_session(store: &RecordStore, channel: Channel, shutdown: watch::Receiver<bool>) {
    let peer = channel.peer().to_string();
    let result = store.replicate(channel, shutdown).await;
    let connected = store.connected_peers();
    match result {
        Ok(stats) => info!(
            %peer,
            rounds = stats.rounds,
            applied = stats.applied,
            served = stats.served,
            connected,
            "session closed"
        ),
        Err(e) => warn!(%peer, error = %e, connected, "session failed"),
    }
}

/// Keep a session with `peer` open, redialing with exponential backoff.
async fn dial_loop(store: Arc<RecordStore>, peer: SocketAddr, mut shutdown: watch::Receiver<bool>) {
    let base = store.config().sync_interval.min(MAX_REDIAL_DELAY);
    let mut delay = base;
    while !*shutdown.borrow() {
        match connect_tcp(peer, DIAL_TIMEOUT).await {
            Ok(channel) => {
                info!(%peer, "connected to peer");
                delay = base;
                run_session(&store, channel, shutdown.clone()).await;
            }
            Err(e) => {
                debug!(%peer, error = %e, retry_in = ?delay, "peer unreachable");
                delay = (delay * 2).min(MAX_REDIAL_DELAY);
            }
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}
