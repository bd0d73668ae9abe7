//! Shared types and identifiers for Medley.
//!
//! This crate defines the identifiers used across the workspace
//! ([`WriterId`], [`EntryHash`], [`Topic`], [`InviteId`], [`BlobRef`]) and the
//! [`HybridClock`] that stamps every log entry with its order timestamp.

mod clock;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use clock::{HybridClock, MAX_DRIFT_MS};

// ---------------------------------------------------------------------------
// ID types
// ---------------------------------------------------------------------------

/// Error returned when parsing a hex identifier fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid identifier: expected 64 hex characters, got {0:?}")]
pub struct ParseIdError(pub String);

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name([u8; 32]);

        impl $name {
            /// The all-zero identifier.
            pub const ZERO: Self = Self([0u8; 32]);

            /// Create an ID by hashing arbitrary data with BLAKE3.
            pub fn from_data(data: &[u8]) -> Self {
                Self(blake3::hash(data).into())
            }

            /// Return the raw 32-byte representation.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// First 8 hex characters, for log lines.
            pub fn short(&self) -> String {
                hex::encode(&self.0[..4])
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.short())
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut bytes = [0u8; 32];
                hex::decode_to_slice(s, &mut bytes).map_err(|_| ParseIdError(s.to_string()))?;
                Ok(Self(bytes))
            }
        }
    };
}

define_id!(
    /// Identity of a writer: the raw ed25519 public key of its signing key.
    WriterId
);

define_id!(
    /// blake3 hash of a log entry's signed content.
    EntryHash
);

define_id!(
    /// Rendezvous topic an invite issuer listens on.
    Topic
);

define_id!(
    /// Identifier of an invite in the issuer's registry.
    InviteId
);

define_id!(
    /// Content address of an attachment blob: blake3 of its bytes.
    BlobRef
);

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
