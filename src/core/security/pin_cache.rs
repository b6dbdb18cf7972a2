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

//! Certificate pin cache (§4.6): trust-on-first-use, upgraded by descriptor
//! pins once a validated `PeerDescriptor` is available.
//!
//! Two pin sources exist per peer:
//! - a TOFU pin, recorded the first time a peer is dialed with no descriptor
//!   pin on file yet;
//! - a descriptor pin (`control_spki_sha256`), which always takes priority
//!   over a TOFU pin and is never overwritten by a later TOFU observation.
//!
//! A mismatch against either pin is a hard transport failure — the
//! connection is dropped before any control envelope is read.

use std::sync::RwLock;

use sled::Db;

use crate::core::types::PeerId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PinSource {
    Tofu,
    Descriptor,
}

fn pin_key(peer_id: &PeerId) -> Vec<u8> {
    let mut k = Vec::with_capacity(21);
    k.push(b'p');
    k.extend_from_slice(&peer_id.0);
    k
}

fn encode(source: PinSource, spki_sha256: &str) -> Vec<u8> {
    let tag: u8 = match source {
        PinSource::Tofu => 0,
        PinSource::Descriptor => 1,
    };
    let mut v = Vec::with_capacity(1 + spki_sha256.len());
    v.push(tag);
    v.extend_from_slice(spki_sha256.as_bytes());
    v
}

fn decode(bytes: &[u8]) -> Option<(PinSource, String)> {
    let (tag, rest) = bytes.split_first()?;
    let source = match tag {
        0 => PinSource::Tofu,
        1 => PinSource::Descriptor,
        _ => return None,
    };
    Some((source, String::from_utf8(rest.to_vec()).ok()?))
}

/// Result of checking an observed certificate SPKI fingerprint against the
/// cache for a peer.
#[derive(Debug, PartialEq, Eq)]
pub enum PinDecision {
    /// No pin existed; the observed fingerprint was recorded as a new TOFU pin.
    Trusted,
    /// The observed fingerprint matched the pin on file.
    Matched,
    /// The observed fingerprint did not match the pin on file. Connection must be dropped.
    Mismatch,
}

/// Persistent per-peer certificate pin store.
pub struct CertificatePinCache {
    db: Db,
    // Guards read-then-write races on the TOFU path; sled itself is
    // thread-safe but "insert if absent" needs to be atomic at this layer
    // since descriptor pins must never be clobbered by a concurrent TOFU write.
    write_lock: RwLock<()>,
}

impl CertificatePinCache {
    /// Open (or create) the pin database at `<data_dir>/pins`.
    pub fn open(data_dir: &str) -> Result<Self, sled::Error> {
        let path = std::path::Path::new(data_dir).join("pins");
        let db = sled::open(path)?;
        Ok(Self { db, write_lock: RwLock::new(()) })
    }

    /// Check an observed SPKI SHA-256 fingerprint (base64) against the
    /// cached pin for `peer_id`, recording a TOFU pin if none exists.
    pub fn check_or_trust(&self, peer_id: &PeerId, observed_spki_sha256: &str) -> PinDecision {
        let _guard = self.write_lock.write().expect("pin cache lock poisoned");
        let key = pin_key(peer_id);

        match self.db.get(&key).ok().flatten() {
            Some(existing) => match decode(&existing) {
                Some((_, pinned)) if pinned == observed_spki_sha256 => PinDecision::Matched,
                Some(_) => PinDecision::Mismatch,
                None => PinDecision::Mismatch,
            },
            None => {
                let _ = self.db.insert(key, encode(PinSource::Tofu, observed_spki_sha256));
                let _ = self.db.flush();
                PinDecision::Trusted
            }
        }
    }

    /// Install or upgrade the pin for `peer_id` to a descriptor-sourced pin.
    /// Always wins over whatever TOFU pin (if any) is currently recorded.
    pub fn pin_from_descriptor(&self, peer_id: &PeerId, spki_sha256: &str) {
        let _guard = self.write_lock.write().expect("pin cache lock poisoned");
        let key = pin_key(peer_id);
        let _ = self.db.insert(key, encode(PinSource::Descriptor, spki_sha256));
        let _ = self.db.flush();
    }

    /// Drop the pin for `peer_id`, e.g. after a confirmed key-rotation handshake.
    pub fn forget(&self, peer_id: &PeerId) {
        let _guard = self.write_lock.write().expect("pin cache lock poisoned");
        let _ = self.db.remove(pin_key(peer_id));
        let _ = self.db.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(b: u8) -> PeerId {
        PeerId([b; 20])
    }

    #[test]
    fn first_observation_is_trusted_and_pinned() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CertificatePinCache::open(dir.path().to_str().unwrap()).unwrap();
        assert_eq!(cache.check_or_trust(&pid(1), "abc123"), PinDecision::Trusted);
        assert_eq!(cache.check_or_trust(&pid(1), "abc123"), PinDecision::Matched);
    }

    #[test]
    fn mismatched_fingerprint_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CertificatePinCache::open(dir.path().to_str().unwrap()).unwrap();
        cache.check_or_trust(&pid(2), "abc123");
        assert_eq!(cache.check_or_trust(&pid(2), "def456"), PinDecision::Mismatch);
    }

    #[test]
    fn descriptor_pin_overrides_tofu_and_survives_further_checks() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CertificatePinCache::open(dir.path().to_str().unwrap()).unwrap();
        cache.check_or_trust(&pid(3), "tofu-fp");
        cache.pin_from_descriptor(&pid(3), "descriptor-fp");
        assert_eq!(cache.check_or_trust(&pid(3), "descriptor-fp"), PinDecision::Matched);
        assert_eq!(cache.check_or_trust(&pid(3), "tofu-fp"), PinDecision::Mismatch);
    }

    #[test]
    fn forget_clears_the_pin() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CertificatePinCache::open(dir.path().to_str().unwrap()).unwrap();
        cache.check_or_trust(&pid(4), "fp-1");
        cache.forget(&pid(4));
        assert_eq!(cache.check_or_trust(&pid(4), "fp-2"), PinDecision::Trusted);
    }
}
