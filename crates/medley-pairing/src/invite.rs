//! Issuer-side invite record.

use ed25519_dalek::SigningKey;
use medley_types::{InviteId, Topic, WriterId};

use crate::auth::derive_auth_key;
use crate::state::PairingState;
use crate::token::{InviteToken, TOKEN_VERSION};

/// Free-form description attached to an invite by the issuer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InviteMetadata {
    /// Who the invite is for, e.g. a provider name.
    pub label: String,
    /// Role the redeemer is expected to take, e.g. `primary-care`.
    pub role: Option<String>,
}

/// A single-use invite held by its issuer.
///
/// Only the key derived from the secret is kept; the secret itself leaves
/// with the token.
pub struct Invite {
    pub id: InviteId,
    pub topic: Topic,
    pub(crate) ephemeral: SigningKey,
    pub(crate) auth_key: [u8; 32],
    pub expires_at: u64,
    pub issuer: WriterId,
    pub metadata: InviteMetadata,
    pub(crate) state: PairingState,
    pub(crate) redeemed_by: Option<WriterId>,
}

impl Invite {
    /// Create an invite and the token to hand out.
    pub fn generate(
        issuer: WriterId,
        root: WriterId,
        expires_at: u64,
        metadata: InviteMetadata,
    ) -> (Invite, InviteToken) {
        let ephemeral = SigningKey::from_bytes(&rand::random::<[u8; 32]>());
        let secret: [u8; 32] = rand::random();
        let topic = Topic::from(rand::random::<[u8; 32]>());
        let id = InviteId::from_data(topic.as_bytes());

        let token = InviteToken {
            version: TOKEN_VERSION,
            topic,
            ephemeral_key: ephemeral.verifying_key().to_bytes(),
            secret,
            expires_at,
            root,
        };
        let invite = Invite {
            id,
            topic,
            ephemeral,
            auth_key: derive_auth_key(&secret),
            expires_at,
            issuer,
            metadata,
            state: PairingState::InviteCreated,
            redeemed_by: None,
        };
        (invite, token)
    }

    pub fn state(&self) -> PairingState {
        self.state
    }

    pub fn redeemed_by(&self) -> Option<WriterId> {
        self.redeemed_by
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at
    }

    pub fn summary(&self) -> InviteSummary {
        InviteSummary {
            id: self.id,
            topic: self.topic,
            expires_at: self.expires_at,
            state: self.state,
            label: self.metadata.label.clone(),
            role: self.metadata.role.clone(),
            redeemed_by: self.redeemed_by,
        }
    }
}

/// Read-only view of an invite for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteSummary {
    pub id: InviteId,
    pub topic: Topic,
    pub expires_at: u64,
    pub state: PairingState,
    pub label: String,
    pub role: Option<String>,
    pub redeemed_by: Option<WriterId>,
}
