//! [`RecordStore`]: the façade over logs, view, replication and pairing.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use medley_blob::{BlobRef, BlobStore, FileBlobStore, MemoryBlobStore};
use medley_log::{EntryPayload, LogEntry, LogStore, WriterKey};
use medley_net::{Channel, Discovery};
use medley_pairing::{
    InviteMetadata, InviteRegistry, InviteSummary, InviteToken, PairingError, PairingState,
    finish_accept, read_hello, redeem, reject, respond_to,
};
use medley_sync::{PeerSession, ReplicationEngine, SessionStats, SyncReport};
use medley_types::{HybridClock, Topic, WriterId, now_millis};
use medley_view::{MaterializedView, SchemaValidator, ViewBuilder, ViewChanged, WriterInfo};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::identity;

type Result<T> = std::result::Result<T, StoreError>;

const LOG_DIR: &str = "log";
const BLOB_DIR: &str = "blobs";

/// Summary of a store, as reported by [`RecordStore::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStatus {
    /// The local writer.
    pub local: WriterId,
    /// Root writer, once paired.
    pub root: Option<WriterId>,
    /// Whether the local writer currently has write access.
    pub local_active: bool,
    /// Active writers.
    pub writer_count: usize,
    /// Logs held locally, including those of revoked writers.
    pub known_logs: usize,
    /// Entries across every known log.
    pub entry_count: u64,
    /// Live keys in the view.
    pub key_count: usize,
    /// Invites that can still be redeemed.
    pub active_invites: usize,
    /// Current view version.
    pub view_version: u64,
    /// Replication sessions currently open with peers.
    pub connected_peers: usize,
    /// Logs quarantined because they failed their integrity checks.
    pub corrupted_logs: Vec<WriterId>,
}

/// One peer's replica of a Medley store.
///
/// All operations take `&self`; wrap the store in an `Arc` to serve several
/// peers at once.
pub struct RecordStore {
    key: WriterKey,
    logs: Arc<LogStore>,
    view: Arc<ViewBuilder>,
    replication: ReplicationEngine,
    invites: InviteRegistry,
    blobs: Arc<dyn BlobStore>,
    clock: HybridClock,
    /// Serializes tick + append on the local log.
    append_lock: Mutex<()>,
    /// Open [`RecordStore::replicate`] sessions.
    sessions: AtomicUsize,
    config: StoreConfig,
}

/// Counts one open replication session for as long as it lives.
struct SessionGuard<'a>(&'a AtomicUsize);

impl<'a> SessionGuard<'a> {
    fn enter(sessions: &'a AtomicUsize) -> Self {
        sessions.fetch_add(1, Ordering::AcqRel);
        Self(sessions)
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl RecordStore {
    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Initialize a new store with the local writer as its root.
    pub fn create(config: StoreConfig) -> Result<Self> {
        let store = Self::init(config)?;
        let local = store.key.id();
        store.logs.set_root(local)?;
        store.view.set_root(local, &store.logs);
        info!(root = %local.short(), "created store");
        Ok(store)
    }

    /// Create a fresh identity that is not a member of any store yet.
    ///
    /// The result can only redeem an invite; it learns its root from the
    /// issuer.
    pub fn unpaired(config: StoreConfig) -> Result<Self> {
        let store = Self::init(config)?;
        info!(writer = %store.key.id().short(), "created unpaired identity");
        Ok(store)
    }

    /// Resume a persisted store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let Some(dir) = config.data_dir.clone() else {
            return Err(StoreError::NotInitialized("<memory>".into()));
        };
        let persisted = identity::load(&dir)?;
        let key = match (config.identity.clone(), persisted) {
            (Some(given), Some(saved)) if given.id() != saved.id() => {
                return Err(StoreError::InvalidIdentity {
                    path: identity::path(&dir),
                    detail: format!("store belongs to {}", saved.id().short()),
                });
            }
            (_, Some(saved)) => saved,
            (_, None) => return Err(StoreError::NotInitialized(dir)),
        };

        let logs = LogStore::open(dir.join(LOG_DIR))?;
        if let Some(local) = logs.local()
            && local != key.id()
        {
            return Err(StoreError::InvalidIdentity {
                path: identity::path(&dir),
                detail: format!("logs belong to {}", local.short()),
            });
        }
        logs.set_local(key.id())?;

        let store = Self::assemble(config, key, logs)?;
        store.view.rebuild(&store.logs);
        info!(
            writer = %store.key.id().short(),
            root = ?store.root().map(|r| r.short()),
            entries = store.logs.entry_count(),
            corrupted = store.logs.corrupted().len(),
            "opened store"
        );
        Ok(store)
    }

    /// Replace the schema validator and refold the view with it.
    pub fn with_validator(self, validator: Arc<dyn SchemaValidator>) -> Self {
        let view = Arc::new(ViewBuilder::with_validator(self.logs.root(), validator));
        view.rebuild(&self.logs);
        let replication = ReplicationEngine::new(self.logs.clone(), self.config.sync.clone())
            .with_view(view.clone());
        Self {
            view,
            replication,
            ..self
        }
    }

    /// Set up a brand-new identity and its empty log.
    fn init(config: StoreConfig) -> Result<Self> {
        let key = config.identity.clone().unwrap_or_else(WriterKey::generate);
        let logs = match &config.data_dir {
            Some(dir) => {
                if identity::load(dir)?.is_some() {
                    return Err(StoreError::AlreadyInitialized);
                }
                identity::save(dir, &key)?;
                LogStore::open(dir.join(LOG_DIR))?
            }
            None => LogStore::in_memory(),
        };
        logs.set_local(key.id())?;
        Self::assemble(config, key, logs)
    }

    fn assemble(config: StoreConfig, key: WriterKey, logs: LogStore) -> Result<Self> {
        let logs = Arc::new(logs);
        let view = Arc::new(ViewBuilder::new(logs.root()));
        let replication =
            ReplicationEngine::new(logs.clone(), config.sync.clone()).with_view(view.clone());
        let blobs: Arc<dyn BlobStore> = match &config.data_dir {
            Some(dir) => Arc::new(FileBlobStore::open(dir.join(BLOB_DIR))?),
            None => Arc::new(MemoryBlobStore::new(config.blob_max_bytes)),
        };

        let store = Self {
            key,
            logs,
            view,
            replication,
            invites: InviteRegistry::new(),
            blobs,
            clock: HybridClock::new(),
            append_lock: Mutex::new(()),
            sessions: AtomicUsize::new(0),
            config,
        };
        store.witness_logs();
        Ok(store)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn local_id(&self) -> WriterId {
        self.key.id()
    }

    pub fn root(&self) -> Option<WriterId> {
        self.logs.root()
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.config.data_dir.as_deref()
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn logs(&self) -> &Arc<LogStore> {
        &self.logs
    }

    pub fn view(&self) -> &Arc<ViewBuilder> {
        &self.view
    }

    pub fn invites(&self) -> &InviteRegistry {
        &self.invites
    }

    // ------------------------------------------------------------------
    // Records
    // ------------------------------------------------------------------

    /// Write `value` under `key`.
    ///
    /// The entry is appended even when the local writer has been revoked;
    /// it is kept in the log but does not affect any view.
    pub fn put(&self, key: &str, value: impl Into<Vec<u8>>) -> Result<LogEntry> {
        let payload = EntryPayload::Put {
            key: key.to_string(),
            value: value.into(),
        };
        let errors = self.view.validator().validate(&payload);
        if !errors.is_empty() {
            return Err(StoreError::Validation(errors));
        }
        self.append(payload)
    }

    /// Delete `key`. Leaves a tombstone in the view.
    pub fn delete(&self, key: &str) -> Result<LogEntry> {
        self.append(EntryPayload::Delete {
            key: key.to_string(),
        })
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.view.get(key)
    }

    /// Live records under `prefix`, sorted by key, from one snapshot.
    pub fn scan(&self, prefix: &str) -> Vec<(String, Vec<u8>)> {
        self.view.scan(prefix)
    }

    pub fn status(&self) -> StoreStatus {
        let local = self.local_id();
        let writers = self.view.writer_set();
        StoreStatus {
            local,
            root: self.root(),
            local_active: writers.is_active(&local),
            writer_count: writers.active_count(),
            known_logs: self.logs.writers().len(),
            entry_count: self.logs.entry_count(),
            key_count: self.view.key_count(),
            active_invites: self.invites.active_count(now_millis()),
            view_version: self.view.version(),
            connected_peers: self.connected_peers(),
            corrupted_logs: self.logs.corrupted().keys().copied().collect(),
        }
    }

    /// Replication sessions currently open with peers.
    pub fn connected_peers(&self) -> usize {
        self.sessions.load(Ordering::Acquire)
    }

    /// Every writer the store knows a membership record for.
    pub fn writers(&self) -> Vec<(WriterId, WriterInfo)> {
        self.view
            .writer_set()
            .writers()
            .map(|(id, info)| (*id, info.clone()))
            .collect()
    }

    /// Receive a [`ViewChanged`] after every change to the view.
    pub fn subscribe(&self) -> broadcast::Receiver<ViewChanged> {
        self.view.subscribe()
    }

    /// Refold the view from every log.
    pub fn rebuild_view(&self) -> MaterializedView {
        self.view.rebuild(&self.logs)
    }

    fn append(&self, payload: EntryPayload) -> Result<LogEntry> {
        if self.root().is_none() {
            return Err(StoreError::NotPaired);
        }
        let local = self.local_id();
        if !self.view.is_active(&local) {
            warn!(
                writer = %local.short(),
                kind = payload.kind(),
                "local writer is not active; entry will not affect the view"
            );
        }

        // Folding under the same lock keeps local entries reaching the view
        // in seq order; an entry folded out of order would be deferred.
        let _append = self.append_lock.lock();
        self.witness_logs();
        let entry = self.logs.append_local(&self.key, self.clock.tick(), payload)?;
        let changed = self
            .view
            .apply_incremental(&self.logs, std::slice::from_ref(&entry));
        debug!(seq = entry.seq, kind = entry.payload.kind(), changed = changed.len(), "appended");
        Ok(entry)
    }

    /// Move the clock past every entry of an active writer received so far,
    /// so local writes order after what this peer has already seen.
    ///
    /// Logs of writers outside the writer set are not trusted to move the
    /// clock, and neither are heads too far ahead of the wall clock.
    fn witness_logs(&self) {
        let writers = self.view.writer_set();
        for writer in self.logs.writers() {
            if !writers.is_active(&writer) {
                continue;
            }
            let Some(head) = self.logs.log(&writer).and_then(|log| log.head()) else {
                continue;
            };
            if !self.clock.witness(head.hlc) {
                debug!(
                    writer = %writer.short(),
                    ahead_ms = HybridClock::physical_millis(head.hlc).saturating_sub(now_millis()),
                    "ignoring timestamp too far in the future"
                );
            }
        }
    }

    // ------------------------------------------------------------------
    // Membership
    // ------------------------------------------------------------------

    /// Revoke `writer`'s write access. Its entries stay in the log for
    /// audit; those ordered after the revocation no longer count.
    pub fn revoke_writer(&self, writer: WriterId) -> Result<LogEntry> {
        self.require_active()?;
        if Some(writer) == self.root() {
            return Err(StoreError::RootNotRevocable);
        }
        if !self.view.is_active(&writer) {
            return Err(StoreError::UnknownWriter(writer));
        }
        let entry = self.append(EntryPayload::RemoveWriter {
            writer_id: writer,
            revoked_by: self.local_id(),
        })?;
        info!(writer = %writer.short(), "revoked writer");
        Ok(entry)
    }

    /// Grant `writer` write access directly, without an invite. Used by
    /// pairing, and to re-admit a writer that was revoked earlier.
    pub fn add_writer(&self, writer: WriterId) -> Result<LogEntry> {
        let issuer = self.require_active()?;
        let entry = self.append(EntryPayload::AddWriter {
            new_writer_id: writer,
            granted_by: issuer,
        })?;
        info!(writer = %writer.short(), "granted write access");
        Ok(entry)
    }

    fn require_active(&self) -> Result<WriterId> {
        if self.root().is_none() {
            return Err(StoreError::NotPaired);
        }
        let local = self.local_id();
        if !self.view.is_active(&local) {
            return Err(StoreError::NotActive(local));
        }
        Ok(local)
    }

    // ------------------------------------------------------------------
    // Pairing
    // ------------------------------------------------------------------

    /// Issue a single-use invite and return its token string.
    pub fn create_invite(&self, metadata: InviteMetadata) -> Result<String> {
        let issuer = self.require_active()?;
        let root = self.root().ok_or(StoreError::NotPaired)?;
        let expires_at = now_millis() + self.config.invite_ttl.as_millis() as u64;
        let token = self.invites.create(issuer, root, expires_at, metadata);
        Ok(token.encode())
    }

    /// Invites issued by this store.
    pub fn list_invites(&self) -> Vec<InviteSummary> {
        self.invites.expire_stale(now_millis());
        self.invites.list()
    }

    /// Listen on the invite's topic and admit the first redeemer.
    ///
    /// Gives up with `InviteExpired` when the invite expires first.
    pub async fn wait_for_redeemer(
        &self,
        token: &str,
        discovery: &dyn Discovery,
    ) -> Result<WriterId> {
        let token = InviteToken::decode(token)?;
        match self.invites.state(&token.topic) {
            None => return Err(PairingError::UnknownInvite.into()),
            Some(PairingState::InviteCreated) => self.invites.mark_waiting(&token.topic)?,
            // Still answer, so a replay is told why it failed.
            Some(state) => debug!(?state, "listening for an invite that is no longer open"),
        }

        // Bounded until the redeemer says hello. The key exchange that
        // follows is bounded by the claimed invite itself.
        let remaining = Duration::from_millis(token.expires_at.saturating_sub(now_millis()));
        let greeted = tokio::time::timeout(remaining, async {
            let mut channel = discovery.accept(&token.topic).await?;
            let topic = read_hello(&mut channel).await?;
            Ok::<_, StoreError>((channel, topic))
        })
        .await;
        let (mut channel, topic) = match greeted {
            Ok(greeted) => greeted?,
            Err(_) => {
                self.invites.expire(&token.topic)?;
                return Err(PairingError::InviteExpired.into());
            }
        };
        self.admit(&mut channel, topic).await
    }

    /// Issuer side of the handshake on an already connected channel.
    ///
    /// On success the new writer is granted access, told the root, and
    /// brought up to date with one sync round.
    pub async fn accept_pairing(&self, channel: &mut Channel) -> Result<WriterId> {
        let topic = read_hello(channel).await?;
        self.admit(channel, topic).await
    }

    async fn admit(&self, channel: &mut Channel, topic: Topic) -> Result<WriterId> {
        let verified = respond_to(channel, &self.invites, topic, now_millis()).await?;

        // One instant decides admission, so the grant and the registry agree.
        let now = now_millis();
        if let Err(e) = self.invites.ensure_unexpired(&verified.topic, now) {
            warn!(writer = %verified.writer.short(), "invite expired before access was granted");
            reject(channel, &self.invites, &verified, &e).await?;
            return Err(e.into());
        }
        if let Err(e) = self.add_writer(verified.writer) {
            warn!(writer = %verified.writer.short(), error = %e, "could not grant access");
            let failure = PairingError::Rejected(e.to_string());
            reject(channel, &self.invites, &verified, &failure).await?;
            return Err(e);
        }

        let root = self.root().ok_or(StoreError::NotPaired)?;
        finish_accept(channel, &self.invites, &verified, root, self.local_id(), now).await?;
        let report = self.replication.sync(channel, Some(verified.writer)).await?;
        info!(
            writer = %verified.writer.short(),
            served = report.served,
            "writer admitted"
        );
        Ok(verified.writer)
    }

    /// Redeem an invite token as this (unpaired) store's writer.
    ///
    /// Returns the local writer id, now a member of the issuer's store.
    pub async fn redeem_invite(&self, token: &str, discovery: &dyn Discovery) -> Result<WriterId> {
        if self.root().is_some() {
            return Err(StoreError::AlreadyInitialized);
        }
        let token = InviteToken::decode(token)?;
        if token.is_expired(now_millis()) {
            return Err(PairingError::InviteExpired.into());
        }

        let mut channel = discovery.connect(&token.topic).await?;
        let outcome = redeem(&mut channel, &token, &self.key, now_millis()).await?;

        self.logs.set_root(outcome.root)?;
        self.view.set_root(outcome.root, &self.logs);
        let report = self.replication.sync(&mut channel, Some(outcome.issuer)).await?;
        info!(
            root = %outcome.root.short(),
            applied = report.applied,
            "joined store"
        );
        Ok(self.local_id())
    }

    // ------------------------------------------------------------------
    // Replication
    // ------------------------------------------------------------------

    /// Run one sync round with the peer on `channel`.
    pub async fn sync(&self, channel: &mut Channel) -> Result<SyncReport> {
        Ok(self.replication.sync(channel, None).await?)
    }

    /// Replicate with the peer on `channel` until `shutdown` flips to `true`
    /// or the peer hangs up.
    pub async fn replicate(
        &self,
        channel: Channel,
        shutdown: watch::Receiver<bool>,
    ) -> Result<SessionStats> {
        let _live = SessionGuard::enter(&self.sessions);
        let mut session = PeerSession::new(channel, None);
        Ok(session
            .run(&self.replication, self.config.sync_interval, shutdown)
            .await?)
    }

    // ------------------------------------------------------------------
    // Attachments
    // ------------------------------------------------------------------

    pub async fn put_blob(&self, data: impl Into<Bytes>) -> Result<BlobRef> {
        Ok(self.blobs.put(data.into()).await?)
    }

    pub async fn get_blob(&self, blob: BlobRef) -> Result<Option<Bytes>> {
        Ok(self.blobs.get(blob).await?)
    }
}
