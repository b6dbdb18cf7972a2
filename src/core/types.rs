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

//! Wire types and canonical encoding helpers for the overlay control plane.

use bincode::Options;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Canonical serialization error.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("serialization")]
    Serialize,
    #[error("deserialization")]
    Deserialize,
    #[error("size limit exceeded")]
    TooLarge,
}

/// Canonical bincode options (deterministic).
fn bincode_opts() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Encode with deterministic rules. Requires deterministic container ordering (use BTreeMap/BTreeSet).
pub fn encode_canonical<T: Serialize>(v: &T) -> Result<Vec<u8>, CodecError> {
    bincode_opts().serialize(v).map_err(|_| CodecError::Serialize)
}

/// Decode with a hard size cap, checked both on the raw wire bytes and inside the deserializer.
pub fn decode_canonical_limited<T: DeserializeOwned>(bytes: &[u8], max: usize) -> Result<T, CodecError> {
    if bytes.len() > max {
        return Err(CodecError::TooLarge);
    }
    bincode_opts()
        .with_limit(max as u64)
        .deserialize(bytes)
        .map_err(|_| CodecError::Deserialize)
}

/// Transport an inbound envelope arrived over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transport {
    /// UDP datagram.
    Udp,
    /// QUIC stream.
    Quic,
}

/// A peer identity: a 20-byte hash derived deterministically from the
/// identity public key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub [u8; 20]);

impl PeerId {
    /// Derive a peer id from a 32-byte Ed25519 public key (SHA-256, truncated to 20 bytes).
    pub fn from_public_key(pk: &[u8; 32]) -> Self {
        let digest = ring::digest::digest(&ring::digest::SHA256, pk);
        let mut out = [0u8; 20];
        out.copy_from_slice(&digest.as_ref()[..20]);
        PeerId(out)
    }

    /// Hex-encoded representation, used in logs and DHT keys.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// A reachable transport endpoint advertised by a peer descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointAddr {
    /// Transport kind.
    pub transport: Transport,
    /// `host:port` string.
    pub address: String,
}

/// The wire message authenticated between overlay peers (§3 `ControlEnvelope`).
///
/// Field order here is the wire order (§6.1), not necessarily the signing
/// order — the canonical signing form is computed separately by
/// `core::security::signing`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ControlEnvelope {
    /// Short string identifying intent (`ping`, `pong`, `probe`, `service-call`, ...). UTF-8, <= 64 bytes.
    pub r#type: String,
    /// Opaque payload bytes, bounded by the effective mesh/transport cap.
    pub payload: Vec<u8>,
    /// Self-asserted public key (base64). Advisory only; never used for identity (§4.2, §9).
    pub public_key: String,
    /// Detached signature (base64 of 64 raw bytes) over the canonical signing form.
    pub signature: String,
    /// Sender's wall-clock timestamp, milliseconds since UNIX epoch.
    pub timestamp_unix_ms: i64,
    /// 128-bit random identifier, unique per envelope. Hex-encoded, 32 chars on the wire.
    pub message_id: [u8; 16],
}

impl ControlEnvelope {
    /// Maximum allowed length of `type`, per §6.1.
    pub const MAX_TYPE_LEN: usize = 64;

    /// `messageId` rendered as the 32-character hex string used in logs and replay-cache keys.
    pub fn message_id_hex(&self) -> String {
        hex::encode(self.message_id)
    }
}

/// Per-peer signed descriptor published in the DHT (§3 `PeerDescriptor`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerDescriptor {
    /// Peer id derived from the identity public key.
    pub peer_id: PeerId,
    /// The identity public key this descriptor is self-signed under.
    pub identity_public_key: [u8; 32],
    /// Permitted signers of control envelopes from this peer (usually just the identity key).
    pub control_signing_keys: Vec<[u8; 32]>,
    /// SHA-256 of the peer's TLS certificate SubjectPublicKeyInfo, base64-encoded.
    pub control_spki_sha256: String,
    /// Reachable transports.
    pub endpoints: Vec<EndpointAddr>,
    /// Unix seconds after which this descriptor is no longer valid.
    pub expiry: i64,
    /// Monotonic per-peer sequence number; a lower or equal value than a
    /// previously accepted descriptor for the same peer is rejected.
    pub sequence_number: u64,
    /// Self-signature (64 bytes) over the canonical encoding of the fields above.
    pub self_signature: Vec<u8>,
}

/// Per-inbound-message context assembled by the listener before validation (§3 `PeerContext`).
#[derive(Clone, Debug)]
pub struct PeerContext {
    /// Resolved peer id.
    pub peer_id: PeerId,
    /// Observed source address.
    pub remote_address: std::net::SocketAddr,
    /// Transport the message arrived over.
    pub transport: Transport,
    /// Allowed control-signing keys from the peer's current descriptor.
    pub allowed_control_signing_keys: Vec<[u8; 32]>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_roundtrip() {
        let env = ControlEnvelope {
            r#type: "ping".to_string(),
            payload: vec![1, 2, 3],
            public_key: String::new(),
            signature: String::new(),
            timestamp_unix_ms: 1_700_000_000_000,
            message_id: [7u8; 16],
        };
        let bytes = encode_canonical(&env).unwrap();
        let back: ControlEnvelope = decode_canonical_limited(&bytes, bytes.len()).unwrap();
        assert_eq!(back.r#type, "ping");
        assert_eq!(back.message_id, [7u8; 16]);
    }

    #[test]
    fn decode_rejects_oversize() {
        let env = ControlEnvelope {
            r#type: "ping".to_string(),
            payload: vec![0u8; 1024],
            public_key: String::new(),
            signature: String::new(),
            timestamp_unix_ms: 0,
            message_id: [0u8; 16],
        };
        let bytes = encode_canonical(&env).unwrap();
        let res: Result<ControlEnvelope, _> = decode_canonical_limited(&bytes, 16);
        assert!(res.is_err());
    }

    #[test]
    fn peer_id_from_public_key_is_deterministic() {
        let pk = [9u8; 32];
        assert_eq!(PeerId::from_public_key(&pk), PeerId::from_public_key(&pk));
    }
}
