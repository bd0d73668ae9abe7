//! Pairing state machine.

use serde::{Deserialize, Serialize};

use crate::error::PairingError;

/// Lifecycle of one invite, on either side of the handshake.
///
/// `InviteCreated -> WaitingForPeer -> KeyExchange -> WriterAdded`, with
/// `Expired` and `Rejected` as the other terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PairingState {
    InviteCreated,
    WaitingForPeer,
    KeyExchange,
    WriterAdded,
    Expired,
    Rejected,
}

impl PairingState {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PairingState::WriterAdded | PairingState::Expired | PairingState::Rejected
        )
    }

    /// Whether the invite can still be redeemed.
    pub fn is_open(self) -> bool {
        matches!(self, PairingState::InviteCreated | PairingState::WaitingForPeer)
    }

    /// Move to `next`, or fail if the transition is not allowed.
    pub fn transition(self, next: PairingState) -> Result<PairingState, PairingError> {
        use PairingState::*;
        let allowed = match (self, next) {
            (InviteCreated, WaitingForPeer) => true,
            // The issuer may be reached before it announced the topic.
            (InviteCreated, KeyExchange) => true,
            (WaitingForPeer, KeyExchange) => true,
            (KeyExchange, WriterAdded) => true,
            (from, Expired | Rejected) => !from.is_terminal(),
            _ => false,
        };
        if allowed {
            Ok(next)
        } else {
            Err(PairingError::InvalidTransition { from: self, to: next })
        }
    }
}
