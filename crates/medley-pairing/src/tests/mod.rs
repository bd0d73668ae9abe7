//! Tests for the pairing crate.


use medley_log::WriterKey;
use medley_types::now_millis;

use crate::invite::InviteMetadata;
use crate::registry::InviteRegistry;
use crate::token::InviteToken;

fn test_key(seed: u8) -> WriterKey {
    WriterKey::from_bytes(&[seed; 32])
}

fn metadata(label: &str) -> InviteMetadata {
    InviteMetadata {
        label: label.to_string(),
        role: Some("primary-care".to_string()),
    }
}

/// Registry with one invite issued by (and rooted at) seed 1.
fn issued(ttl_ms: u64) -> (InviteRegistry, InviteToken) {
    let registry = InviteRegistry::new();
    let issuer = test_key(1).id();
    let token = registry.create(issuer, issuer, now_millis() + ttl_ms, metadata("dr-smith"));
    (registry, token)
}
