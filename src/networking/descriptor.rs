// Copyright (c) 2026 Amunchain
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Peer descriptor validation and a TTL-bounded in-memory cache (§4.1, §6.3).
//!
//! A descriptor is self-signed: `self_signature` covers the canonical
//! encoding of every other field, under `identity_public_key`. A descriptor
//! whose `sequence_number` is not strictly greater than the one currently
//! cached for the same peer is rejected, so a stale or replayed descriptor
//! can never roll a peer's advertised keys/endpoints backwards.

use std::{
    collections::HashMap,
    sync::RwLock,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use serde::Serialize;
use thiserror::Error;

use crate::core::{
    security::keystore::verify_pubkey_bytes,
    types::{encode_canonical, CodecError, PeerDescriptor, PeerId},
};

/// Descriptor validation errors.
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// `peer_id` does not match the hash of `identity_public_key`.
    #[error("peer id mismatch")]
    PeerIdMismatch,
    /// `control_signing_keys` is empty or contains a key other peers have no way to validate.
    #[error("no control signing keys")]
    NoSigningKeys,
    /// `self_signature` failed verification.
    #[error("bad self-signature")]
    BadSelfSignature,
    /// `expiry` is in the past.
    #[error("descriptor expired")]
    Expired,
    /// `sequence_number` did not strictly increase over the cached descriptor.
    #[error("stale sequence number")]
    StaleSequence,
    /// No reachable endpoints advertised.
    #[error("no endpoints")]
    NoEndpoints,
    /// Canonical encoding of the descriptor failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Serialize)]
struct SignedFields<'a> {
    identity_public_key: &'a [u8; 32],
    control_signing_keys: &'a [[u8; 32]],
    control_spki_sha256: &'a str,
    endpoints_debug: Vec<String>,
    expiry: i64,
    sequence_number: u64,
}

fn signed_bytes(desc: &PeerDescriptor) -> Result<Vec<u8>, CodecError> {
    let fields = SignedFields {
        identity_public_key: &desc.identity_public_key,
        control_signing_keys: &desc.control_signing_keys,
        control_spki_sha256: &desc.control_spki_sha256,
        endpoints_debug: desc.endpoints.iter().map(|e| format!("{:?}:{}", e.transport, e.address)).collect(),
        expiry: desc.expiry,
        sequence_number: desc.sequence_number,
    };
    encode_canonical(&fields)
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Compute and fill in `desc.self_signature` over its canonical fields,
/// using `keystore`'s current identity key. Callers must set every other
/// field first. Used both when publishing this node's own descriptor and
/// in tests that need a validly self-signed descriptor.
pub fn sign_descriptor(
    desc: &mut PeerDescriptor,
    keystore: &crate::core::security::keystore::KeyStore,
) -> Result<(), CodecError> {
    let bytes = signed_bytes(desc)?;
    keystore.with_current(|kp| {
        desc.self_signature = kp.sign(&bytes).as_ref().to_vec();
    });
    Ok(())
}

/// Verify a descriptor's internal consistency and self-signature. Does not
/// consult the cache, so callers can use this on a freshly fetched DHT value
/// before deciding whether to admit it.
pub fn validate_descriptor(desc: &PeerDescriptor) -> Result<(), DescriptorError> {
    if PeerId::from_public_key(&desc.identity_public_key) != desc.peer_id {
        return Err(DescriptorError::PeerIdMismatch);
    }
    if desc.control_signing_keys.is_empty() {
        return Err(DescriptorError::NoSigningKeys);
    }
    if desc.endpoints.is_empty() {
        return Err(DescriptorError::NoEndpoints);
    }
    if desc.expiry < now_unix() {
        return Err(DescriptorError::Expired);
    }

    let msg = signed_bytes(desc)?;
    verify_pubkey_bytes(&desc.identity_public_key, &msg, &desc.self_signature)
        .map_err(|_| DescriptorError::BadSelfSignature)
}

struct CachedEntry {
    descriptor: PeerDescriptor,
    fetched_at: Instant,
}

/// TTL-bounded cache of validated descriptors, enforcing sequence-number
/// monotonicity per peer.
pub struct DescriptorCache {
    ttl: Duration,
    entries: RwLock<HashMap<PeerId, CachedEntry>>,
}

impl DescriptorCache {
    /// New cache with the given entry TTL.
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: RwLock::new(HashMap::new()) }
    }

    /// Validate `desc` and, if it is newer than any cached descriptor for
    /// the same peer, admit it. Returns the admitted descriptor's allowed
    /// control-signing keys on success.
    pub fn admit(&self, desc: PeerDescriptor) -> Result<Vec<[u8; 32]>, DescriptorError> {
        validate_descriptor(&desc)?;

        let mut entries = self.entries.write().expect("descriptor cache lock poisoned");
        if let Some(existing) = entries.get(&desc.peer_id) {
            if desc.sequence_number <= existing.descriptor.sequence_number {
                return Err(DescriptorError::StaleSequence);
            }
        }
        let keys = desc.control_signing_keys.clone();
        entries.insert(desc.peer_id, CachedEntry { descriptor: desc, fetched_at: Instant::now() });
        Ok(keys)
    }

    /// Look up the cached, non-expired descriptor for `peer_id`.
    pub fn get(&self, peer_id: &PeerId) -> Option<PeerDescriptor> {
        let entries = self.entries.read().expect("descriptor cache lock poisoned");
        let entry = entries.get(peer_id)?;
        if entry.fetched_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.descriptor.clone())
    }

    /// Evict cache-expired entries.
    pub fn sweep_expired(&self) {
        let mut entries = self.entries.write().expect("descriptor cache lock poisoned");
        let ttl = self.ttl;
        entries.retain(|_, e| e.fetched_at.elapsed() < ttl);
    }
}
