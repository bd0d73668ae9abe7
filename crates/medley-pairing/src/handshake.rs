//! The pairing handshake, issuer and redeemer sides.
//!
//! ```text
//! redeemer                               issuer
//!    PairHello{topic}          ------>   claim invite (single use)
//!                              <------   PairChallenge{nonce, sig_eph(topic||nonce)}
//!    check sig against token
//!    PairProof{writer, proof, sig_w}  -> check proof (constant time) + sig_w
//!                              <------   PairAccepted{root, issuer} | PairRejected
//! ```
//!
//! The issuer appends the `AddWriter` entry between [`respond`] and
//! [`finish_accept`]; that part belongs to the record store. Once an invite
//! is claimed, the exchange must finish before the invite expires.

use std::time::Duration;

use ed25519_dalek::{Signature, Signer, Verifier, VerifyingKey};
use medley_log::{WriterKey, verify_detached};
use medley_net::{Channel, MedleyMessage, NetError};
use medley_types::{Topic, WriterId};
use tracing::{debug, info, warn};

use crate::auth::{
    challenge_transcript, compute_proof, derive_auth_key, join_signature, proof_transcript,
    split_signature, verify_proof,
};
use crate::error::PairingError;
use crate::registry::{Claim, InviteRegistry};
use crate::state::PairingState;
use crate::token::InviteToken;

/// A redeemer that passed the key exchange and awaits its grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedRedeemer {
    pub topic: Topic,
    pub writer: WriterId,
}

/// Result of a successful redemption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingOutcome {
    /// Root writer of the joined store.
    pub root: WriterId,
    /// Writer that granted access.
    pub issuer: WriterId,
    /// Final state, always `WriterAdded`.
    pub state: PairingState,
}

fn unexpected(expected: &'static str, got: &MedleyMessage) -> PairingError {
    PairingError::Net(NetError::Unexpected {
        expected,
        got: got.kind(),
    })
}

/// Issuer: answer one redeemer up to and including proof verification.
///
/// Any failure after the invite was claimed burns it and is reported to the
/// redeemer with `PairRejected`.
pub async fn respond(
    channel: &mut Channel,
    registry: &InviteRegistry,
    now_ms: u64,
) -> Result<VerifiedRedeemer, PairingError> {
    let topic = read_hello(channel).await?;
    respond_to(channel, registry, topic, now_ms).await
}

/// Issuer: wait for the redeemer's `PairHello` and return its topic.
pub async fn read_hello(channel: &mut Channel) -> Result<Topic, PairingError> {
    match channel.expect().await? {
        MedleyMessage::PairHello { topic } => Ok(topic),
        other => Err(unexpected("PairHello", &other)),
    }
}

/// Issuer: [`respond`] to a redeemer whose `PairHello` for `topic` was
/// already read.
///
/// A key exchange still running when the invite expires is cut off: the
/// invite becomes `Expired` and the redeemer is told so.
pub async fn respond_to(
    channel: &mut Channel,
    registry: &InviteRegistry,
    topic: Topic,
    now_ms: u64,
) -> Result<VerifiedRedeemer, PairingError> {
    let claim = match registry.claim(&topic, now_ms) {
        Ok(claim) => claim,
        Err(e) => {
            warn!(topic = %topic.short(), error = %e, "refusing pairing attempt");
            send_rejection(channel, &e).await;
            return Err(e);
        }
    };

    let remaining = Duration::from_millis(claim.expires_at.saturating_sub(now_ms));
    let result = tokio::time::timeout(remaining, exchange(channel, &claim, &topic))
        .await
        .unwrap_or(Err(PairingError::InviteExpired));

    match result {
        Ok(writer) => {
            debug!(topic = %topic.short(), writer = %writer.short(), "redeemer verified");
            Ok(VerifiedRedeemer { topic, writer })
        }
        Err(PairingError::InviteExpired) => {
            warn!(topic = %topic.short(), "invite expired during key exchange");
            registry.expire(&topic)?;
            send_rejection(channel, &PairingError::InviteExpired).await;
            Err(PairingError::InviteExpired)
        }
        Err(e) => {
            warn!(topic = %topic.short(), error = %e, "pairing failed, burning invite");
            registry.reject(&topic)?;
            send_rejection(channel, &e).await;
            Err(e)
        }
    }
}

/// Challenge the redeemer and verify its proof.
async fn exchange(
    channel: &mut Channel,
    claim: &Claim,
    topic: &Topic,
) -> Result<WriterId, PairingError> {
    let nonce: [u8; 32] = rand::random();
    let signature = claim
        .ephemeral
        .sign(&challenge_transcript(topic, &nonce))
        .to_bytes();
    let (signature_r, signature_s) = split_signature(signature);
    channel
        .send(&MedleyMessage::PairChallenge {
            nonce,
            signature_r,
            signature_s,
        })
        .await?;

    let (writer, proof, signature) = match channel.expect().await? {
        MedleyMessage::PairProof {
            writer_id,
            proof,
            signature_r,
            signature_s,
        } => (writer_id, proof, join_signature(&signature_r, &signature_s)),
        other => return Err(unexpected("PairProof", &other)),
    };

    if !verify_proof(&claim.auth_key, &nonce, &writer, &proof)
        || !verify_detached(&writer, &proof_transcript(&nonce, &writer), &signature)
    {
        return Err(PairingError::AuthenticationFailed);
    }
    Ok(writer)
}

/// Issuer: record the redemption and tell the redeemer it was admitted.
///
/// Fails with `InviteExpired`, and tells the redeemer, when `now_ms` is past
/// the invite's expiry.
pub async fn finish_accept(
    channel: &mut Channel,
    registry: &InviteRegistry,
    redeemer: &VerifiedRedeemer,
    root: WriterId,
    issuer: WriterId,
    now_ms: u64,
) -> Result<(), PairingError> {
    if let Err(e) = registry.complete(&redeemer.topic, redeemer.writer, now_ms) {
        send_rejection(channel, &e).await;
        return Err(e);
    }
    channel
        .send(&MedleyMessage::PairAccepted { root, issuer })
        .await?;
    Ok(())
}

/// Issuer: abandon a verified redeemer (e.g. the grant could not be written).
pub async fn reject(
    channel: &mut Channel,
    registry: &InviteRegistry,
    redeemer: &VerifiedRedeemer,
    error: &PairingError,
) -> Result<(), PairingError> {
    registry.reject(&redeemer.topic)?;
    send_rejection(channel, error).await;
    Ok(())
}

async fn send_rejection(channel: &mut Channel, error: &PairingError) {
    let message = MedleyMessage::PairRejected {
        reason: error.reject_reason(),
    };
    // The redeemer may already be gone.
    if let Err(e) = channel.send(&message).await {
        debug!(error = %e, "could not deliver PairRejected");
    }
}

/// Redeemer: run the handshake for `token` as `writer`.
pub async fn redeem(
    channel: &mut Channel,
    token: &InviteToken,
    writer: &WriterKey,
    now_ms: u64,
) -> Result<PairingOutcome, PairingError> {
    let mut state = PairingState::InviteCreated;
    if token.is_expired(now_ms) {
        state.transition(PairingState::Expired)?;
        return Err(PairingError::InviteExpired);
    }

    state = state.transition(PairingState::WaitingForPeer)?;
    channel
        .send(&MedleyMessage::PairHello { topic: token.topic })
        .await?;

    let (nonce, signature) = match channel.expect().await? {
        MedleyMessage::PairChallenge {
            nonce,
            signature_r,
            signature_s,
        } => (nonce, join_signature(&signature_r, &signature_s)),
        MedleyMessage::PairRejected { reason } => return Err(reason.into()),
        other => return Err(unexpected("PairChallenge", &other)),
    };

    // The issuer must hold the invite's ephemeral key.
    let ephemeral = VerifyingKey::from_bytes(&token.ephemeral_key)
        .map_err(|_| PairingError::InvalidToken("bad ephemeral key".into()))?;
    ephemeral
        .verify(
            &challenge_transcript(&token.topic, &nonce),
            &Signature::from_bytes(&signature),
        )
        .map_err(|_| PairingError::AuthenticationFailed)?;
    state = state.transition(PairingState::KeyExchange)?;

    let auth_key = derive_auth_key(&token.secret);
    let writer_id = writer.id();
    let proof = compute_proof(&auth_key, &nonce, &writer_id);
    let (signature_r, signature_s) =
        split_signature(writer.sign(&proof_transcript(&nonce, &writer_id)));
    channel
        .send(&MedleyMessage::PairProof {
            writer_id,
            proof,
            signature_r,
            signature_s,
        })
        .await?;

    match channel.expect().await? {
        MedleyMessage::PairAccepted { root, issuer } => {
            if root != token.root {
                return Err(PairingError::AuthenticationFailed);
            }
            state = state.transition(PairingState::WriterAdded)?;
            info!(root = %root.short(), issuer = %issuer.short(), "pairing accepted");
            Ok(PairingOutcome {
                root,
                issuer,
                state,
            })
        }
        MedleyMessage::PairRejected { reason } => Err(reason.into()),
        other => Err(unexpected("PairAccepted", &other)),
    }
}
