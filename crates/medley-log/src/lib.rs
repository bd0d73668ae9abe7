//! Per-writer, append-only, hash-chained and signed logs.
//!
//! Every writer owns exactly one [`WriterLog`]. Each [`LogEntry`] carries its
//! sequence number, the hash of the previous entry, a hybrid logical clock
//! timestamp, and an ed25519 signature by the writer, so a replica of the log
//! is tamper-evident and totally ordered without trusting the peer that
//! delivered it.
//!
//! The [`LogStore`] holds every log a peer knows about (its own plus
//! replicas) and the small index file that lets a peer resume without
//! re-verifying every signature on startup.

mod entry;
mod error;
mod identity;
mod log;
mod segment;
mod store;

#[cfg(test)]
mod tests;

pub use entry::{EntryPayload, LogEntry};
pub use error::{InvalidReason, LogError};
pub use identity::{WriterKey, verify_detached};
pub use log::{LogHead, LogRange, WriterLog};
pub use store::{IndexEntry, LogStore};
