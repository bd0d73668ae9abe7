//! Long-term writer identity.

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey};
use medley_types::WriterId;

/// An ed25519 signing key together with the [`WriterId`] it maps to.
#[derive(Clone)]
pub struct WriterKey {
    signing_key: SigningKey,
    id: WriterId,
}

impl WriterKey {
    /// Generate a fresh identity from the OS random number generator.
    pub fn generate() -> Self {
        Self::from_bytes(&rand::random::<[u8; 32]>())
    }

    /// Rebuild an identity from its 32-byte secret.
    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        let id = WriterId::from(signing_key.verifying_key().to_bytes());
        Self { signing_key, id }
    }

    /// The public identity.
    pub fn id(&self) -> WriterId {
        self.id
    }

    /// The underlying signing key.
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// The 32-byte secret, for persisting the identity.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    /// Sign an arbitrary message.
    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        let signature: Signature = self.signing_key.sign(message);
        signature.to_bytes()
    }
}

impl fmt::Debug for WriterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterKey").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Verify a detached signature made by `writer`.
pub fn verify_detached(writer: &WriterId, message: &[u8], signature: &[u8; 64]) -> bool {
    use ed25519_dalek::{Verifier, VerifyingKey};

    let Ok(key) = VerifyingKey::from_bytes(writer.as_bytes()) else {
        return false;
    };
    key.verify(message, &Signature::from_bytes(signature)).is_ok()
}
