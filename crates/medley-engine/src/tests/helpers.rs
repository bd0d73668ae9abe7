//! Shared test utilities for medley-engine tests.

use medley_log::WriterKey;
use medley_net::{Channel, MemoryDiscovery};
use medley_pairing::InviteMetadata;
use medley_types::WriterId;

use crate::{RecordStore, StoreConfig};

pub fn test_key(seed: u8) -> WriterKey {
    WriterKey::from_bytes(&[seed; 32])
}

pub fn config(seed: u8) -> StoreConfig {
    StoreConfig {
        identity: Some(test_key(seed)),
        ..StoreConfig::in_memory()
    }
}

/// A fresh root store owned by `test_key(seed)`.
pub fn root_store(seed: u8) -> RecordStore {
    RecordStore::create(config(seed)).unwrap()
}

pub fn metadata(label: &str) -> InviteMetadata {
    InviteMetadata {
        label: label.to_string(),
        role: None,
    }
}

/// Pair an unpaired `test_key(seed)` store into `issuer`'s store.
pub async fn join(issuer: &RecordStore, seed: u8) -> RecordStore {
    let redeemer = RecordStore::unpaired(config(seed)).unwrap();
    let token = issuer.create_invite(metadata("provider")).unwrap();
    let discovery = MemoryDiscovery::new();

    let (accepted, joined) = tokio::join!(
        issuer.wait_for_redeemer(&token, &discovery),
        redeemer.redeem_invite(&token, &discovery),
    );
    let writer: WriterId = accepted.unwrap();
    assert_eq!(joined.unwrap(), writer);
    redeemer
}

/// One bidirectional sync round between two stores.
pub async fn sync_pair(a: &RecordStore, b: &RecordStore) {
    let (mut a_chan, mut b_chan) = Channel::memory_pair();
    let (ra, rb) = tokio::join!(a.sync(&mut a_chan), b.sync(&mut b_chan));
    ra.unwrap();
    rb.unwrap();
}
