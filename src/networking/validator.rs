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

//! Ordered envelope validation (§4.7).
//!
//! The six checks run in a fixed order, each one short-circuiting the rest:
//!
//! 1. presence of required fields (`type`, non-empty `signature`/`public_key`, well-formed `message_id`)
//! 2. quarantine check (precedes signature verification, per the decision recorded in the design ledger)
//! 3. payload size against the effective transport cap
//! 4. timestamp within the allowed clock-skew window
//! 5. replay test-and-record
//! 6. signature, against the descriptor's allowed control-signing keys
//!
//! Quarantine is checked before the signature so a known-bad peer is
//! rejected cheaply without paying for an Ed25519 verification; this is
//! safe because quarantine decisions are driven by post-auth events only
//! (`networking::reputation` never records a bad event off an unauthenticated message).

use thiserror::Error;

use crate::{
    core::{
        security::{replay::ReplayCache, signing::Signer},
        types::{ControlEnvelope, PeerContext},
    },
    networking::reputation::PeerReputation,
};

/// Reason an envelope was rejected.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    /// A required field was missing or malformed.
    #[error("missing or malformed field")]
    MalformedFields,
    /// Sender is currently quarantined.
    #[error("sender quarantined")]
    Quarantined,
    /// Payload exceeds the effective size cap.
    #[error("payload too large")]
    TooLarge,
    /// Timestamp falls outside the allowed skew window.
    #[error("timestamp out of range")]
    StaleTimestamp,
    /// `message_id` has already been seen for this peer within the replay window.
    #[error("replayed message")]
    Replay,
    /// Signature did not verify against any allowed control-signing key.
    #[error("bad signature")]
    BadSignature,
}

/// Validates inbound control envelopes against the full ordered check set.
pub struct EnvelopeValidator<'a> {
    replay: &'a ReplayCache,
    reputation: &'a PeerReputation,
    max_payload_bytes: usize,
    timestamp_skew: i64,
}

impl<'a> EnvelopeValidator<'a> {
    /// New validator over the given shared replay cache and reputation tracker.
    pub fn new(
        replay: &'a ReplayCache,
        reputation: &'a PeerReputation,
        max_payload_bytes: usize,
        timestamp_skew_secs: i64,
    ) -> Self {
        Self { replay, reputation, max_payload_bytes, timestamp_skew: timestamp_skew_secs }
    }

    /// Run all six checks in order against `envelope`, arriving over `ctx`.
    pub fn validate(&self, envelope: &ControlEnvelope, ctx: &PeerContext, now_unix_ms: i64) -> Result<(), ValidationError> {
        if envelope.r#type.is_empty()
            || envelope.r#type.len() > ControlEnvelope::MAX_TYPE_LEN
            || envelope.signature.is_empty()
        {
            return Err(ValidationError::MalformedFields);
        }

        if self.reputation.is_quarantined(ctx.peer_id) {
            return Err(ValidationError::Quarantined);
        }

        if envelope.payload.len() > self.max_payload_bytes {
            return Err(ValidationError::TooLarge);
        }

        let skew_ms = self.timestamp_skew.saturating_mul(1000);
        let delta = (now_unix_ms - envelope.timestamp_unix_ms).abs();
        if delta > skew_ms {
            return Err(ValidationError::StaleTimestamp);
        }

        if !self.replay.check_and_record(ctx.peer_id, envelope.message_id) {
            return Err(ValidationError::Replay);
        }

        if !Signer::verify(envelope, &ctx.allowed_control_signing_keys) {
            return Err(ValidationError::BadSignature);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::types::{PeerId, Transport},
        networking::reputation::ReputationParams,
    };
    use ring::{rand::SystemRandom, signature::{Ed25519KeyPair, KeyPair}};
    use std::{net::{IpAddr, Ipv4Addr, SocketAddr}, time::Duration};

    fn gen_keypair() -> Ed25519KeyPair {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap()
    }

    fn ctx(peer_id: PeerId, allowed: Vec<[u8; 32]>) -> PeerContext {
        PeerContext {
            peer_id,
            remote_address: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 7070),
            transport: Transport::Udp,
            allowed_control_signing_keys: allowed,
        }
    }

    fn signed_envelope(kp: &Ed25519KeyPair, now_ms: i64, message_id: [u8; 16]) -> ControlEnvelope {
        let mut env = ControlEnvelope {
            r#type: "ping".to_string(),
            payload: vec![1, 2, 3],
            public_key: String::new(),
            signature: String::new(),
            timestamp_unix_ms: now_ms,
            message_id,
        };
        Signer::new(kp).sign(&mut env).unwrap();
        env
    }

    #[test]
    fn valid_envelope_passes_all_checks() {
        let replay = ReplayCache::new(Duration::from_secs(300));
        let reputation = PeerReputation::new(ReputationParams::default());
        let validator = EnvelopeValidator::new(&replay, &reputation, 65536, 120);

        let kp = gen_keypair();
        let mut pk = [0u8; 32];
        pk.copy_from_slice(kp.public_key().as_ref());
        let peer_id = PeerId::from_public_key(&pk);

        let env = signed_envelope(&kp, 1_700_000_000_000, [1u8; 16]);
        let c = ctx(peer_id, vec![pk]);
        assert!(validator.validate(&env, &c, 1_700_000_000_000).is_ok());
    }

    #[test]
    fn replayed_message_id_is_rejected_on_second_delivery() {
        let replay = ReplayCache::new(Duration::from_secs(300));
        let reputation = PeerReputation::new(ReputationParams::default());
        let validator = EnvelopeValidator::new(&replay, &reputation, 65536, 120);

        let kp = gen_keypair();
        let mut pk = [0u8; 32];
        pk.copy_from_slice(kp.public_key().as_ref());
        let peer_id = PeerId::from_public_key(&pk);
        let c = ctx(peer_id, vec![pk]);

        let env = signed_envelope(&kp, 1_700_000_000_000, [2u8; 16]);
        assert!(validator.validate(&env, &c, 1_700_000_000_000).is_ok());
        assert_eq!(validator.validate(&env, &c, 1_700_000_000_000), Err(ValidationError::Replay));
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let replay = ReplayCache::new(Duration::from_secs(300));
        let reputation = PeerReputation::new(ReputationParams::default());
        let validator = EnvelopeValidator::new(&replay, &reputation, 65536, 120);

        let kp = gen_keypair();
        let mut pk = [0u8; 32];
        pk.copy_from_slice(kp.public_key().as_ref());
        let peer_id = PeerId::from_public_key(&pk);
        let c = ctx(peer_id, vec![pk]);

        let env = signed_envelope(&kp, 1_700_000_000_000, [3u8; 16]);
        let far_future = 1_700_000_000_000 + 10 * 60 * 1000;
        assert_eq!(validator.validate(&env, &c, far_future), Err(ValidationError::StaleTimestamp));
    }

    #[test]
    fn oversize_payload_is_rejected() {
        let replay = ReplayCache::new(Duration::from_secs(300));
        let reputation = PeerReputation::new(ReputationParams::default());
        let validator = EnvelopeValidator::new(&replay, &reputation, 2, 120);

        let kp = gen_keypair();
        let mut pk = [0u8; 32];
        pk.copy_from_slice(kp.public_key().as_ref());
        let peer_id = PeerId::from_public_key(&pk);
        let c = ctx(peer_id, vec![pk]);

        let env = signed_envelope(&kp, 1_700_000_000_000, [4u8; 16]);
        assert_eq!(validator.validate(&env, &c, 1_700_000_000_000), Err(ValidationError::TooLarge));
    }

    #[test]
    fn wrong_signing_key_is_rejected() {
        let replay = ReplayCache::new(Duration::from_secs(300));
        let reputation = PeerReputation::new(ReputationParams::default());
        let validator = EnvelopeValidator::new(&replay, &reputation, 65536, 120);

        let kp = gen_keypair();
        let other = gen_keypair();
        let mut other_pk = [0u8; 32];
        other_pk.copy_from_slice(other.public_key().as_ref());
        let peer_id = PeerId::from_public_key(&other_pk);
        let c = ctx(peer_id, vec![other_pk]);

        let env = signed_envelope(&kp, 1_700_000_000_000, [5u8; 16]);
        assert_eq!(validator.validate(&env, &c, 1_700_000_000_000), Err(ValidationError::BadSignature));
    }

    #[test]
    fn quarantined_peer_is_rejected_before_signature_check() {
        let replay = ReplayCache::new(Duration::from_secs(300));
        let reputation = PeerReputation::new(ReputationParams::default());
        let validator = EnvelopeValidator::new(&replay, &reputation, 65536, 120);

        let kp = gen_keypair();
        let mut pk = [0u8; 32];
        pk.copy_from_slice(kp.public_key().as_ref());
        let peer_id = PeerId::from_public_key(&pk);
        let c = ctx(peer_id, vec![pk]);

        for _ in 0..20 {
            reputation.record_bad(peer_id, crate::networking::reputation::BadEventReason::ProtocolViolation);
        }
        assert!(reputation.is_quarantined(peer_id));

        // Deliberately garbled signature: if quarantine weren't checked first this would fail as BadSignature instead.
        let mut env = signed_envelope(&kp, 1_700_000_000_000, [6u8; 16]);
        env.signature = "not-a-valid-signature".to_string();
        assert_eq!(validator.validate(&env, &c, 1_700_000_000_000), Err(ValidationError::Quarantined));
    }
}
