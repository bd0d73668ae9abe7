//! Long-lived replication with one peer.

use std::time::Duration;

use medley_net::{Channel, MedleyMessage, NetError};
use medley_types::WriterId;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::engine::{ReplicationEngine, SyncReport};
use crate::error::SyncError;

/// Running totals of a [`PeerSession`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub rounds: u64,
    pub applied: u64,
    pub served: u64,
    pub rejected: u64,
}

impl SessionStats {
    fn record(&mut self, report: &SyncReport) {
        self.rounds += 1;
        self.applied += report.applied;
        self.served += report.served;
        self.rejected += report.rejected.len() as u64;
    }
}

enum Trigger {
    Local,
    Remote(std::collections::BTreeMap<WriterId, u64>),
}

/// One connection to one peer, replicating until shut down.
pub struct PeerSession {
    channel: Channel,
    remote: Option<WriterId>,
    stats: SessionStats,
}

impl PeerSession {
    pub fn new(channel: Channel, remote: Option<WriterId>) -> Self {
        Self {
            channel,
            remote,
            stats: SessionStats::default(),
        }
    }

    pub fn remote(&self) -> Option<WriterId> {
        self.remote
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Run a single round started from this side.
    pub async fn sync_once(&mut self, engine: &ReplicationEngine) -> Result<SyncReport, SyncError> {
        let report = engine.sync(&mut self.channel, self.remote).await?;
        self.stats.record(&report);
        Ok(report)
    }

    /// Replicate until `shutdown` flips to `true` or the peer hangs up.
    ///
    /// A round starts on every `interval` tick, whenever the local store
    /// gains entries, and whenever the peer opens one.
    pub async fn run(
        &mut self,
        engine: &ReplicationEngine,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<SessionStats, SyncError> {
        let mut appends = engine.logs().subscribe_appends();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(peer = %self.channel.peer(), "peer session started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            let trigger = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = ticker.tick() => Trigger::Local,
                changed = appends.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    Trigger::Local
                }
                // Cancel-safe: a partial frame stays buffered in the reader.
                message = self.channel.recv() => match message? {
                    None => {
                        debug!(peer = %self.channel.peer(), "peer closed the session");
                        break;
                    }
                    Some(MedleyMessage::Digest { lengths }) => Trigger::Remote(lengths),
                    Some(other) => {
                        return Err(NetError::Unexpected {
                            expected: "Digest",
                            got: other.kind(),
                        }
                        .into());
                    }
                },
            };

            let seen = *appends.borrow_and_update();
            let report = match trigger {
                Trigger::Local => engine.sync(&mut self.channel, self.remote).await?,
                Trigger::Remote(lengths) => {
                    engine
                        .round(&mut self.channel, self.remote, Some(lengths))
                        .await?
                }
            };
            self.stats.record(&report);
            // Entries applied by this round bumped the counter and need no
            // round of their own. Anything else that landed meanwhile (local
            // writes, entries from other sessions) does.
            let current = *appends.borrow_and_update();
            if current != seen + report.applied {
                appends.mark_changed();
            }
        }

        // Best effort: the peer may already be gone.
        let _ = self.channel.writer_mut().shutdown().await;
        info!(
            peer = %self.channel.peer(),
            rounds = self.stats.rounds,
            applied = self.stats.applied,
            "peer session ended"
        );
        Ok(self.stats)
    }
}
