//! Invites and the pairing handshake that admits a new writer.
//!
//! An issuer creates a single-use [`Invite`] and hands the redeemer an
//! [`InviteToken`] out of band. The token carries the rendezvous topic, the
//! invite's ephemeral public key, and the shared secret. Over the connected
//! channel the issuer proves it holds the ephemeral key, the redeemer proves
//! it knows the secret and owns its new writer key, and the issuer then
//! grants write access. Every step is tracked by a [`PairingState`] machine
//! that refuses illegal transitions.
//!
//! The issuer never keeps the secret itself, only a key derived from it.

mod auth;
mod error;
mod handshake;
mod invite;
mod registry;
mod state;
mod token;
#[cfg(test)]
mod tests;

pub use auth::{compute_proof, derive_auth_key, verify_proof};
pub use error::PairingError;
pub use handshake::{
    PairingOutcome, VerifiedRedeemer, finish_accept, read_hello, redeem, reject, respond,
    respond_to,
};
pub use invite::{Invite, InviteMetadata, InviteSummary};
pub use registry::InviteRegistry;
pub use state::PairingState;
pub use token::{InviteToken, TOKEN_VERSION};
