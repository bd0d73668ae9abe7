//! Deterministic materialization of writer logs.
//!
//! All entries of all known logs are linearized by their [`OrderKey`]
//! `(hlc, writer_id, seq)`. Folding in that order yields the
//! [`WriterSet`] at every position and a last-writer-wins
//! [`MaterializedView`]. Two peers holding the same set of entries compute
//! the same view, no matter in which order the entries reached them.
//!
//! The [`ViewBuilder`] keeps the current fold behind a read/write lock,
//! applies newly arrived entries incrementally, and falls back to a full
//! rebuild when a membership change lands in the already-folded past.

mod builder;
mod order;
mod validator;
mod view;
mod writer_set;

#[cfg(test)]
mod tests;

pub use builder::{FoldStats, ViewBuilder, ViewChanged, materialize};
pub use order::OrderKey;
pub use validator::{AcceptAll, SchemaValidator};
pub use view::{MaterializedView, ViewRecord};
pub use writer_set::{WriterInfo, WriterSet};
