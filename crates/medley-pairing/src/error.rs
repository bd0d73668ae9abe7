//! Error types for pairing.

use medley_net::{NetError, RejectReason};

use crate::state::PairingState;

/// Errors that can occur while issuing or redeeming an invite.
#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    /// The invite was already redeemed, burned, or is being redeemed.
    #[error("invite already used")]
    InviteAlreadyUsed,

    /// The invite is past its expiry time.
    #[error("invite expired")]
    InviteExpired,

    /// A signature or secret proof did not verify.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The token string could not be decoded.
    #[error("invalid invite token: {0}")]
    InvalidToken(String),

    /// No invite is registered for the topic.
    #[error("unknown invite")]
    UnknownInvite,

    /// The state machine refused a transition.
    #[error("invalid pairing transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: PairingState,
        to: PairingState,
    },

    /// The issuer refused for a reason of its own.
    #[error("pairing rejected by issuer: {0}")]
    Rejected(String),

    /// The channel failed or the peer broke the protocol.
    #[error("pairing channel error: {0}")]
    Net(#[from] NetError),
}

impl PairingError {
    /// Reason to report to the redeemer for this failure.
    pub fn reject_reason(&self) -> RejectReason {
        match self {
            PairingError::InviteAlreadyUsed => RejectReason::AlreadyUsed,
            PairingError::InviteExpired => RejectReason::Expired,
            PairingError::AuthenticationFailed => RejectReason::AuthenticationFailed,
            PairingError::UnknownInvite => RejectReason::UnknownInvite,
            other => RejectReason::Internal(other.to_string()),
        }
    }
}

impl From<RejectReason> for PairingError {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::AlreadyUsed => PairingError::InviteAlreadyUsed,
            RejectReason::Expired => PairingError::InviteExpired,
            RejectReason::AuthenticationFailed => PairingError::AuthenticationFailed,
            RejectReason::UnknownInvite => PairingError::UnknownInvite,
            RejectReason::Internal(reason) => PairingError::Rejected(reason),
        }
    }
}
