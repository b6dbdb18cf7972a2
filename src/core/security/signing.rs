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
#![deny(missing_docs)]

//! Canonical and legacy signing byte forms for control envelopes, and the
//! `Signer` that produces/verifies signatures over them.
//!
//! Two byte-level forms exist by design (§3, §9): signing always uses the
//! canonical form; verification tries canonical first, then falls back to
//! the legacy form for backward compatibility. The self-asserted
//! `publicKey` field on an envelope is never consulted for identity —
//! verification only ever runs against caller-supplied `allowedKeys` drawn
//! from a DHT-validated descriptor.

use base64::Engine;
use ring::signature::{Ed25519KeyPair, KeyPair, UnparsedPublicKey, ED25519};
use thiserror::Error;

use crate::core::types::ControlEnvelope;

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Signing/verification errors. Per §4.2, verification never throws to the
/// caller — `Signer::verify` returns `bool`, not `Result`.
#[derive(Debug, Error)]
pub enum SigningError {
    /// Canonical byte encoding failed.
    #[error("canonical encoding")]
    Encoding,
}

/// Canonical signing payload: deterministic byte serialization of the tuple
/// `(type, timestamp, messageId, payload)`, field order fixed, lengths explicit.
pub fn canonical_signing_bytes(envelope: &ControlEnvelope) -> Result<Vec<u8>, SigningError> {
    let type_bytes = envelope.r#type.as_bytes();
    if type_bytes.len() > ControlEnvelope::MAX_TYPE_LEN {
        return Err(SigningError::Encoding);
    }
    let mut out = Vec::with_capacity(1 + type_bytes.len() + 8 + 16 + 8 + envelope.payload.len());
    out.push(type_bytes.len() as u8);
    out.extend_from_slice(type_bytes);
    out.extend_from_slice(&envelope.timestamp_unix_ms.to_be_bytes());
    out.extend_from_slice(&envelope.message_id);
    out.extend_from_slice(&(envelope.payload.len() as u64).to_be_bytes());
    out.extend_from_slice(&envelope.payload);
    Ok(out)
}

/// Legacy signing payload: `"{type}|{timestamp}|{base64(payload)}"`.
///
/// Accepted only during verification, never produced by `Signer::sign`.
pub fn legacy_signing_bytes(envelope: &ControlEnvelope) -> Vec<u8> {
    format!(
        "{}|{}|{}",
        envelope.r#type,
        envelope.timestamp_unix_ms,
        B64.encode(&envelope.payload)
    )
    .into_bytes()
}

/// Produces and verifies signatures over the canonical envelope encoding.
pub struct Signer<'a> {
    keypair: &'a Ed25519KeyPair,
}

impl<'a> Signer<'a> {
    /// Wrap a loaded Ed25519 key-pair.
    pub fn new(keypair: &'a Ed25519KeyPair) -> Self {
        Self { keypair }
    }

    /// Sign `envelope` in place: fills `publicKey` and `signature` using the
    /// canonical form only (§4.2 step order: canonical-only on sign).
    pub fn sign(&self, envelope: &mut ControlEnvelope) -> Result<(), SigningError> {
        let bytes = canonical_signing_bytes(envelope)?;
        let sig = self.keypair.sign(&bytes);
        envelope.signature = B64.encode(sig.as_ref());
        envelope.public_key = B64.encode(self.keypair.public_key().as_ref());
        Ok(())
    }

    /// Verify `envelope.signature` against `allowed_keys`, trying the
    /// canonical form first, then the legacy form, returning `true` on any
    /// match (§4.2, §8 canonical↔legacy equivalence).
    ///
    /// Malformed keys (wrong length) are skipped, not treated as fatal.
    /// `envelope.public_key` is never consulted — identity flows exclusively
    /// through `allowed_keys`.
    pub fn verify(envelope: &ControlEnvelope, allowed_keys: &[[u8; 32]]) -> bool {
        let sig_bytes = match B64.decode(envelope.signature.as_bytes()) {
            Ok(b) if b.len() == 64 => b,
            _ => return false,
        };

        let canonical = match canonical_signing_bytes(envelope) {
            Ok(b) => b,
            Err(_) => return false,
        };
        let legacy = legacy_signing_bytes(envelope);

        for key in allowed_keys {
            let unparsed = UnparsedPublicKey::new(&ED25519, key.as_slice());
            if unparsed.verify(&canonical, &sig_bytes).is_ok() {
                return true;
            }
            if unparsed.verify(&legacy, &sig_bytes).is_ok() {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ring::rand::SystemRandom;

    fn make_envelope(payload: &[u8]) -> ControlEnvelope {
        ControlEnvelope {
            r#type: "ping".to_string(),
            payload: payload.to_vec(),
            public_key: String::new(),
            signature: String::new(),
            timestamp_unix_ms: 1_700_000_000_000,
            message_id: [3u8; 16],
        }
    }

    fn gen_keypair() -> Ed25519KeyPair {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap()
    }

    #[test]
    fn sign_then_verify_succeeds_against_own_key() {
        let kp = gen_keypair();
        let mut pk = [0u8; 32];
        pk.copy_from_slice(kp.public_key().as_ref());

        let mut env = make_envelope(b"hello");
        Signer::new(&kp).sign(&mut env).unwrap();

        assert!(Signer::verify(&env, &[pk]));
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let kp = gen_keypair();
        let other = gen_keypair();
        let mut other_pk = [0u8; 32];
        other_pk.copy_from_slice(other.public_key().as_ref());

        let mut env = make_envelope(b"hello");
        Signer::new(&kp).sign(&mut env).unwrap();

        assert!(!Signer::verify(&env, &[other_pk]));
    }

    #[test]
    fn verify_accepts_legacy_form_signature() {
        let kp = gen_keypair();
        let mut pk = [0u8; 32];
        pk.copy_from_slice(kp.public_key().as_ref());

        let mut env = make_envelope(b"legacy-bytes");
        let legacy_bytes = legacy_signing_bytes(&env);
        let sig = kp.sign(&legacy_bytes);
        env.signature = B64.encode(sig.as_ref());

        assert!(Signer::verify(&env, &[pk]));
    }

    #[test]
    fn verify_never_trusts_self_asserted_public_key() {
        let kp = gen_keypair();
        let impostor = gen_keypair();
        let mut impostor_pk = [0u8; 32];
        impostor_pk.copy_from_slice(impostor.public_key().as_ref());

        let mut env = make_envelope(b"spoof-attempt");
        Signer::new(&kp).sign(&mut env).unwrap();
        // Attacker overwrites the advisory field; verification must still
        // depend only on the caller-supplied allowed_keys.
        env.public_key = B64.encode(impostor_pk);

        assert!(!Signer::verify(&env, &[impostor_pk]));
    }
}
