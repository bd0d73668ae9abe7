//! Tests for the medley-engine crate.

mod helpers;
