//! The invite token handed to the redeemer out of band.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use medley_types::{Topic, WriterId};
use serde::{Deserialize, Serialize};

use crate::error::PairingError;

/// Current token format version.
pub const TOKEN_VERSION: u8 = 1;

/// Everything a redeemer needs to pair.
///
/// Encoded as URL-safe base64 (no padding) of the postcard bytes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteToken {
    pub version: u8,
    /// Rendezvous topic the issuer listens on.
    pub topic: Topic,
    /// Public half of the invite's ephemeral key.
    pub ephemeral_key: [u8; 32],
    /// Shared secret proving the redeemer holds the token.
    pub secret: [u8; 32],
    /// Expiry, milliseconds since the Unix epoch.
    pub expires_at: u64,
    /// Root writer of the store being joined.
    pub root: WriterId,
}

impl InviteToken {
    pub fn encode(&self) -> String {
        // Serializing plain arrays and integers cannot fail.
        let bytes = postcard::to_allocvec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(bytes)
    }

    pub fn decode(token: &str) -> Result<Self, PairingError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| PairingError::InvalidToken(e.to_string()))?;
        let token: InviteToken =
            postcard::from_bytes(&bytes).map_err(|e| PairingError::InvalidToken(e.to_string()))?;
        if token.version != TOKEN_VERSION {
            return Err(PairingError::InvalidToken(format!(
                "unsupported version {}",
                token.version
            )));
        }
        Ok(token)
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at
    }
}

impl std::fmt::Debug for InviteToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InviteToken")
            .field("version", &self.version)
            .field("topic", &self.topic)
            .field("expires_at", &self.expires_at)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl std::str::FromStr for InviteToken {
    type Err = PairingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}
