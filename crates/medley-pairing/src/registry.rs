//! In-memory registry of the invites an issuer has handed out.

use std::collections::HashMap;

use ed25519_dalek::SigningKey;
use medley_types::{Topic, WriterId};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::PairingError;
use crate::invite::{Invite, InviteMetadata, InviteSummary};
use crate::state::PairingState;
use crate::token::InviteToken;

/// What the issuer needs to run the key exchange for a claimed invite.
pub(crate) struct Claim {
    pub ephemeral: SigningKey,
    pub auth_key: [u8; 32],
    pub expires_at: u64,
}

/// Invites issued by this node, keyed by topic.
///
/// Every state change happens under one lock, so two redeemers racing for
/// the same invite cannot both claim it.
#[derive(Default)]
pub struct InviteRegistry {
    invites: Mutex<HashMap<Topic, Invite>>,
}

impl InviteRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register an invite, returning its token.
    pub fn create(
        &self,
        issuer: WriterId,
        root: WriterId,
        expires_at: u64,
        metadata: InviteMetadata,
    ) -> InviteToken {
        let (invite, token) = Invite::generate(issuer, root, expires_at, metadata);
        info!(invite = %invite.id.short(), label = %invite.metadata.label, "invite created");
        self.invites.lock().insert(invite.topic, invite);
        token
    }

    /// Mark the invite as announced on its topic.
    pub fn mark_waiting(&self, topic: &Topic) -> Result<(), PairingError> {
        self.transition(topic, PairingState::WaitingForPeer)
    }

    /// Claim the invite for a key exchange.
    ///
    /// This is the single-use check: only one redeemer can move an open
    /// invite into `KeyExchange`. An expired invite is marked `Expired`.
    pub(crate) fn claim(&self, topic: &Topic, now_ms: u64) -> Result<Claim, PairingError> {
        let mut invites = self.invites.lock();
        let invite = invites.get_mut(topic).ok_or(PairingError::UnknownInvite)?;

        if !invite.state.is_open() {
            return Err(match invite.state {
                PairingState::Expired => PairingError::InviteExpired,
                _ => PairingError::InviteAlreadyUsed,
            });
        }
        if invite.is_expired(now_ms) {
            invite.state = invite.state.transition(PairingState::Expired)?;
            debug!(invite = %invite.id.short(), "invite expired before use");
            return Err(PairingError::InviteExpired);
        }
        invite.state = invite.state.transition(PairingState::KeyExchange)?;
        Ok(Claim {
            ephemeral: invite.ephemeral.clone(),
            auth_key: invite.auth_key,
            expires_at: invite.expires_at,
        })
    }

    /// Fail with `InviteExpired` if the invite expired, marking it so.
    ///
    /// The issuer calls this before granting access to a verified redeemer.
    pub fn ensure_unexpired(&self, topic: &Topic, now_ms: u64) -> Result<(), PairingError> {
        let mut invites = self.invites.lock();
        let invite = invites.get_mut(topic).ok_or(PairingError::UnknownInvite)?;
        check_expiry(invite, now_ms)
    }

    /// Record a successful redemption.
    ///
    /// Past the invite's expiry the redemption is refused and the invite
    /// becomes `Expired`.
    pub fn complete(
        &self,
        topic: &Topic,
        writer: WriterId,
        now_ms: u64,
    ) -> Result<(), PairingError> {
        let mut invites = self.invites.lock();
        let invite = invites.get_mut(topic).ok_or(PairingError::UnknownInvite)?;
        check_expiry(invite, now_ms)?;
        invite.state = invite.state.transition(PairingState::WriterAdded)?;
        invite.redeemed_by = Some(writer);
        info!(invite = %invite.id.short(), writer = %writer.short(), "invite redeemed");
        Ok(())
    }

    /// Burn the invite after a failed attempt.
    pub fn reject(&self, topic: &Topic) -> Result<(), PairingError> {
        let mut invites = self.invites.lock();
        let invite = invites.get_mut(topic).ok_or(PairingError::UnknownInvite)?;
        if invite.state.is_terminal() {
            return Ok(());
        }
        invite.state = invite.state.transition(PairingState::Rejected)?;
        warn!(invite = %invite.id.short(), "invite burned");
        Ok(())
    }

    /// Expire one invite, e.g. when its issuer stops listening or a key
    /// exchange outlives it. No-op once the invite reached a terminal state.
    pub fn expire(&self, topic: &Topic) -> Result<(), PairingError> {
        let mut invites = self.invites.lock();
        let invite = invites.get_mut(topic).ok_or(PairingError::UnknownInvite)?;
        if !invite.state.is_terminal() {
            invite.state = invite.state.transition(PairingState::Expired)?;
            debug!(invite = %invite.id.short(), "invite expired");
        }
        Ok(())
    }

    /// Mark every open invite past its expiry. Returns how many expired.
    pub fn expire_stale(&self, now_ms: u64) -> usize {
        let mut expired = 0;
        for invite in self.invites.lock().values_mut() {
            if invite.state.is_open() && invite.is_expired(now_ms) {
                invite.state = PairingState::Expired;
                expired += 1;
            }
        }
        expired
    }

    /// Invites that can still be redeemed.
    pub fn active_count(&self, now_ms: u64) -> usize {
        self.invites
            .lock()
            .values()
            .filter(|i| i.state.is_open() && !i.is_expired(now_ms))
            .count()
    }

    pub fn state(&self, topic: &Topic) -> Option<PairingState> {
        self.invites.lock().get(topic).map(|i| i.state)
    }

    pub fn get(&self, topic: &Topic) -> Option<InviteSummary> {
        self.invites.lock().get(topic).map(Invite::summary)
    }

    pub fn list(&self) -> Vec<InviteSummary> {
        let mut all: Vec<_> = self.invites.lock().values().map(Invite::summary).collect();
        all.sort_by_key(|s| s.expires_at);
        all
    }

    fn transition(&self, topic: &Topic, next: PairingState) -> Result<(), PairingError> {
        let mut invites = self.invites.lock();
        let invite = invites.get_mut(topic).ok_or(PairingError::UnknownInvite)?;
        invite.state = invite.state.transition(next)?;
        Ok(())
    }
}

fn check_expiry(invite: &mut Invite, now_ms: u64) -> Result<(), PairingError> {
    if invite.state == PairingState::Expired {
        return Err(PairingError::InviteExpired);
    }
    if invite.is_expired(now_ms) {
        if !invite.state.is_terminal() {
            invite.state = PairingState::Expired;
            debug!(invite = %invite.id.short(), "invite expired during key exchange");
        }
        return Err(PairingError::InviteExpired);
    }
    Ok(())
}
