//! Sync rounds over a [`Channel`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use medley_log::{LogError, LogStore};
use medley_net::{Channel, FrameReader, FrameWriter, MedleyMessage, NetError};
use medley_types::WriterId;
use medley_view::ViewBuilder;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::SyncError;

/// Tuning knobs for replication.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Maximum entries per `EntryBatch`.
    pub batch_size: usize,
    /// Longest silence tolerated from the peer inside a round.
    pub round_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            round_timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of one sync round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Entries appended to local replicas.
    pub applied: u64,
    /// Entries applied, per writer.
    pub per_writer: BTreeMap<WriterId, u64>,
    /// Writers whose range was aborted, with the reason.
    pub rejected: BTreeMap<WriterId, String>,
    /// Entries sent to the peer.
    pub served: u64,
}

/// Work for the writing half of a round.
enum Job {
    Send(MedleyMessage),
    Serve { writer: WriterId, from: u64, to: u64 },
}

/// Runs replication rounds against the local [`LogStore`].
pub struct ReplicationEngine {
    logs: Arc<LogStore>,
    view: Option<Arc<ViewBuilder>>,
    config: SyncConfig,
}

impl ReplicationEngine {
    pub fn new(logs: Arc<LogStore>, config: SyncConfig) -> Self {
        Self {
            logs,
            view: None,
            config,
        }
    }

    /// Fold applied entries into `view` at the end of every round.
    pub fn with_view(mut self, view: Arc<ViewBuilder>) -> Self {
        self.view = Some(view);
        self
    }

    pub fn logs(&self) -> &Arc<LogStore> {
        &self.logs
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Run one full round, starting it from this side.
    ///
    /// `remote` only labels log lines.
    pub async fn sync(
        &self,
        channel: &mut Channel,
        remote: Option<WriterId>,
    ) -> Result<SyncReport, SyncError> {
        self.round(channel, remote, None).await
    }

    /// Run one round. `opening` is the peer's digest when the peer started
    /// the round and its `Digest` has already been read.
    pub async fn round(
        &self,
        channel: &mut Channel,
        remote: Option<WriterId>,
        opening: Option<BTreeMap<WriterId, u64>>,
    ) -> Result<SyncReport, SyncError> {
        let peer = match remote {
            Some(w) => w.short(),
            None => channel.peer().to_string(),
        };
        let (reader, writer) = channel.halves();
        let (jobs, queue) = mpsc::unbounded_channel();

        let (mut report, served) = tokio::try_join!(
            self.read_round(reader, jobs, opening),
            self.write_round(writer, queue),
        )?;
        report.served = served;

        if report.applied > 0
            && let Some(view) = &self.view
        {
            view.refresh(&self.logs);
        }
        if report.applied > 0 || !report.rejected.is_empty() {
            info!(
                peer = %peer,
                applied = report.applied,
                served = report.served,
                rejected = report.rejected.len(),
                "sync round complete"
            );
        } else {
            debug!(peer = %peer, served = report.served, "sync round complete, nothing new");
        }
        Ok(report)
    }

    /// Reading half: drives the round state machine, queues replies.
    async fn read_round(
        &self,
        reader: &mut FrameReader,
        jobs: mpsc::UnboundedSender<Job>,
        opening: Option<BTreeMap<WriterId, u64>>,
    ) -> Result<SyncReport, SyncError> {
        let mut round = RoundState::default();
        let queue = |job: Job| jobs.send(job).map_err(|_| SyncError::Channel(NetError::StreamClosed));

        queue(Job::Send(MedleyMessage::Digest {
            lengths: self.logs.digest(),
        }))?;
        if let Some(lengths) = opening {
            for job in round.on_digest(&self.logs, lengths) {
                queue(job)?;
            }
        }

        while !round.finished() {
            let message = tokio::time::timeout(self.config.round_timeout, reader.expect())
                .await
                .map_err(|_| SyncError::Timeout(self.config.round_timeout))??;

            match message {
                MedleyMessage::Digest { lengths } => {
                    if round.got_digest {
                        return Err(unexpected("EntryBatch or RangeEnd", "Digest"));
                    }
                    for job in round.on_digest(&self.logs, lengths) {
                        queue(job)?;
                    }
                }
                MedleyMessage::EntryRequest {
                    writer,
                    from_seq,
                    to_seq,
                } => queue(Job::Serve {
                    writer,
                    from: from_seq,
                    to: to_seq,
                })?,
                MedleyMessage::EntryBatch { writer, entries } => {
                    round.on_batch(&self.logs, writer, entries)?;
                }
                MedleyMessage::RangeEnd { writer } => {
                    if let Some(job) = round.on_range_end(writer) {
                        queue(job)?;
                    }
                }
                MedleyMessage::RoundDone => round.got_done = true,
                other => return Err(unexpected("a sync message", other.kind())),
            }
        }
        Ok(round.report)
    }

    /// Writing half: sends queued messages and streams requested ranges.
    async fn write_round(
        &self,
        writer: &mut FrameWriter,
        mut queue: mpsc::UnboundedReceiver<Job>,
    ) -> Result<u64, SyncError> {
        let mut served = 0;
        while let Some(job) = queue.recv().await {
            match job {
                Job::Send(message) => writer.send(&message).await?,
                Job::Serve { writer: id, from, to } => {
                    served += self.serve_range(writer, id, from, to).await?;
                }
            }
        }
        Ok(served)
    }

    /// Stream `[from, to)` of `id`'s log in batches, then `RangeEnd`.
    async fn serve_range(
        &self,
        writer: &mut FrameWriter,
        id: WriterId,
        from: u64,
        to: u64,
    ) -> Result<u64, SyncError> {
        let mut sent = 0;
        if let Some(log) = self.logs.log(&id) {
            let mut range = log.range(from, to);
            loop {
                let batch: Vec<_> = range.by_ref().take(self.config.batch_size.max(1)).collect();
                if batch.is_empty() {
                    break;
                }
                sent += batch.len() as u64;
                writer
                    .send(&MedleyMessage::EntryBatch {
                        writer: id,
                        entries: batch,
                    })
                    .await?;
            }
        }
        writer.send(&MedleyMessage::RangeEnd { writer: id }).await?;
        debug!(writer = %id.short(), from, to, sent, "served range");
        Ok(sent)
    }
}

fn unexpected(expected: &'static str, got: &'static str) -> SyncError {
    SyncError::Channel(NetError::Unexpected { expected, got })
}

/// Receiving-side bookkeeping of one round.
#[derive(Default)]
struct RoundState {
    got_digest: bool,
    got_done: bool,
    sent_done: bool,
    /// Requested writers still waiting for `RangeEnd`.
    outstanding: BTreeSet<WriterId>,
    /// Writers whose range failed verification this round.
    aborted: BTreeSet<WriterId>,
    report: SyncReport,
}

impl RoundState {
    fn finished(&self) -> bool {
        self.sent_done && self.got_done
    }

    /// Request every log suffix the peer has and we lack.
    fn on_digest(&mut self, logs: &LogStore, theirs: BTreeMap<WriterId, u64>) -> Vec<Job> {
        self.got_digest = true;
        let mine = logs.digest();
        let mut jobs = Vec::new();
        for (writer, their_len) in theirs {
            if logs.is_corrupted(&writer) {
                debug!(writer = %writer.short(), "not requesting a quarantined log");
                continue;
            }
            let my_len = mine.get(&writer).copied().unwrap_or(0);
            if their_len > my_len {
                self.outstanding.insert(writer);
                jobs.push(Job::Send(MedleyMessage::EntryRequest {
                    writer,
                    from_seq: my_len,
                    to_seq: their_len,
                }));
            }
        }
        if self.outstanding.is_empty() {
            self.sent_done = true;
            jobs.push(Job::Send(MedleyMessage::RoundDone));
        }
        jobs
    }

    /// Apply one batch, then persist the index once for all of it.
    fn on_batch(
        &mut self,
        logs: &LogStore,
        writer: WriterId,
        entries: Vec<medley_log::LogEntry>,
    ) -> Result<(), SyncError> {
        let applied = self.apply_batch(logs, writer, entries);
        logs.flush_index()?;
        applied
    }

    fn apply_batch(
        &mut self,
        logs: &LogStore,
        writer: WriterId,
        entries: Vec<medley_log::LogEntry>,
    ) -> Result<(), SyncError> {
        if self.aborted.contains(&writer) {
            return Ok(());
        }
        for entry in entries {
            if entry.writer_id != writer {
                self.abort(writer, format!("batch carries an entry of {}", entry.writer_id.short()));
                return Ok(());
            }
            match logs.apply_remote(&entry) {
                Ok(true) => {
                    self.report.applied += 1;
                    *self.report.per_writer.entry(writer).or_default() += 1;
                }
                Ok(false) => {}
                Err(e @ LogError::InvalidEntry { .. }) => {
                    self.abort(writer, e.to_string());
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn on_range_end(&mut self, writer: WriterId) -> Option<Job> {
        self.outstanding.remove(&writer);
        if self.got_digest && self.outstanding.is_empty() && !self.sent_done {
            self.sent_done = true;
            return Some(Job::Send(MedleyMessage::RoundDone));
        }
        None
    }

    fn abort(&mut self, writer: WriterId, reason: String) {
        warn!(writer = %writer.short(), %reason, "rejecting range from peer");
        self.aborted.insert(writer);
        self.report.rejected.insert(writer, reason);
    }
}
