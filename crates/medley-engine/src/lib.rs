//! The record store: one peer's view of a shared Medley store.
//!
//! [`RecordStore`] owns the local writer identity, every known log, the
//! materialized view, the invite registry and the attachment store, and
//! exposes the operations an application needs: reads and writes, status,
//! inviting and revoking writers, and replicating with peers.

pub mod config;
pub mod error;
mod identity;
pub mod store;

pub use config::StoreConfig;
pub use error::StoreError;
pub use store::{RecordStore, StoreStatus};

#[cfg(test)]
mod tests;
