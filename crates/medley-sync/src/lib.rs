//! Replication of writer logs between two connected peers.
//!
//! A sync round exchanges per-writer log lengths ([`Digest`]), requests the
//! missing suffix of every log the peer holds more of, and streams those
//! suffixes back in bounded batches. Either side may start a round and the
//! protocol is symmetric. The [`ReplicationEngine`] runs single rounds; a
//! [`PeerSession`] keeps one connection alive and runs rounds on a timer, on
//! local appends, and whenever the peer starts one.
//!
//! [`Digest`]: medley_net::MedleyMessage::Digest

mod engine;
mod error;
mod session;

pub use engine::{ReplicationEngine, SyncConfig, SyncReport};
pub use error::SyncError;
pub use session::{PeerSession, SessionStats};
