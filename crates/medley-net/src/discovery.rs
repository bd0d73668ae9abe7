//! Rendezvous between an invite issuer and a redeemer.
//!
//! The issuer announces the invite topic and waits; the redeemer connects
//! to whoever announced it. What comes back is a plain [`Channel`]: the
//! pairing handshake on top authenticates both sides, so discovery itself
//! does not have to.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use medley_types::Topic;
use parking_lot::Mutex;
use tokio::io::DuplexStream;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info};

use crate::channel::Channel;
use crate::error::NetError;

/// How peers sharing a topic reach each other.
#[async_trait::async_trait]
pub trait Discovery: Send + Sync {
    /// Announce `topic` and wait for one peer to connect.
    async fn accept(&self, topic: &Topic) -> Result<Channel, NetError>;

    /// Connect to the peer that announced `topic`.
    async fn connect(&self, topic: &Topic) -> Result<Channel, NetError>;
}

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REDIAL_DELAY: Duration = Duration::from_millis(50);

/// In-process discovery over `tokio::io::duplex` pipes.
///
/// Clones share the same rendezvous table, so handing one clone to each
/// simulated peer connects them.
#[derive(Clone)]
pub struct MemoryDiscovery {
    inner: Arc<MemoryInner>,
    connect_timeout: Duration,
}

struct MemoryInner {
    waiting: Mutex<HashMap<Topic, oneshot::Sender<DuplexStream>>>,
    announced: watch::Sender<u64>,
}

impl MemoryDiscovery {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_timeout(connect_timeout: Duration) -> Self {
        let (announced, _) = watch::channel(0);
        Self {
            inner: Arc::new(MemoryInner {
                waiting: Mutex::new(HashMap::new()),
                announced,
            }),
            connect_timeout,
        }
    }

    /// Whether someone is currently waiting on `topic`.
    pub fn is_announced(&self, topic: &Topic) -> bool {
        self.inner.waiting.lock().contains_key(topic)
    }
}

impl Default for MemoryDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Discovery for MemoryDiscovery {
    async fn accept(&self, topic: &Topic) -> Result<Channel, NetError> {
        let (tx, rx) = oneshot::channel();
        self.inner.waiting.lock().insert(*topic, tx);
        self.inner.announced.send_modify(|n| *n += 1);
        debug!(topic = %topic.short(), "announced topic");

        let stream = rx.await.map_err(|_| NetError::StreamClosed)?;
        Ok(Channel::new(stream, format!("memory:{}", topic.short())))
    }

    async fn connect(&self, topic: &Topic) -> Result<Channel, NetError> {
        let mut announced = self.inner.announced.subscribe();
        let attempt = async {
            loop {
                let waiting = self.inner.waiting.lock().remove(topic);
                if let Some(tx) = waiting {
                    let (ours, theirs) = tokio::io::duplex(64 * 1024);
                    // A dropped acceptor leaves a dead sender behind; keep waiting.
                    if tx.send(theirs).is_ok() {
                        return Ok(Channel::new(ours, format!("memory:{}", topic.short())));
                    }
                }
                if announced.changed().await.is_err() {
                    return Err(NetError::StreamClosed);
                }
            }
        };
        tokio::time::timeout(self.connect_timeout, attempt)
            .await
            .map_err(|_| NetError::PeerNotFound(topic.to_string()))?
    }
}

/// Discovery over plain TCP with statically configured addresses.
///
/// The topic is not used for routing: `accept` listens on `listen_addr`
/// and `connect` dials `peer_addr`. The pairing handshake rejects a peer
/// that answers for the wrong topic.
#[derive(Debug, Clone)]
pub struct TcpDiscovery {
    listen_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
    connect_timeout: Duration,
}

impl TcpDiscovery {
    /// Issuer side: accept on `addr`.
    pub fn listen(addr: SocketAddr) -> Self {
        Self {
            listen_addr: Some(addr),
            peer_addr: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Redeemer side: dial `addr`.
    pub fn dial(addr: SocketAddr) -> Self {
        Self {
            listen_addr: None,
            peer_addr: Some(addr),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

/// Dial a peer over TCP and wrap the connection in a [`Channel`].
pub async fn connect_tcp(addr: SocketAddr, timeout: Duration) -> Result<Channel, NetError> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| NetError::PeerNotFound(addr.to_string()))??;
    stream.set_nodelay(true)?;
    debug!(%addr, "connected to peer");
    Ok(Channel::new(stream, addr.to_string()))
}

#[async_trait::async_trait]
impl Discovery for TcpDiscovery {
    async fn accept(&self, topic: &Topic) -> Result<Channel, NetError> {
        let addr = self
            .listen_addr
            .ok_or_else(|| NetError::Discovery("no listen address configured".into()))?;
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, topic = %topic.short(), "waiting for peer");
        let (stream, remote) = listener.accept().await?;
        stream.set_nodelay(true)?;
        debug!(%remote, "peer connected");
        Ok(Channel::new(stream, remote.to_string()))
    }

    async fn connect(&self, topic: &Topic) -> Result<Channel, NetError> {
        let addr = self
            .peer_addr
            .ok_or_else(|| NetError::Discovery("no peer address configured".into()))?;
        debug!(%addr, topic = %topic.short(), "dialing peer");
        // The issuer may not be listening yet.
        let attempt = async {
            loop {
                match TcpStream::connect(addr).await {
                    Err(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
                        tokio::time::sleep(REDIAL_DELAY).await;
                    }
                    other => return other,
                }
            }
        };
        let stream = tokio::time::timeout(self.connect_timeout, attempt)
            .await
            .map_err(|_| NetError::PeerNotFound(addr.to_string()))??;
        stream.set_nodelay(true)?;
        Ok(Channel::new(stream, addr.to_string()))
    }
}
