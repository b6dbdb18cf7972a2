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

//! UDP overlay listener (§4.9).
//!
//! One envelope per datagram. A datagram exceeding the transport or mesh
//! payload cap is dropped before any parsing is attempted. Peer identity is
//! resolved through an endpoint→peer-id registry populated as descriptors
//! are learned (from the DHT or from prior successful handshakes); an
//! unresolvable source address is rejected as identity-unknown without
//! touching the replay cache or signature path.
//!
//! A bind failure here is logged and the task returns — it does not abort
//! the process, per the degraded-bind contract (§4.9, §8 scenario 8).

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, RwLock},
};

use tokio::net::UdpSocket;

use crate::{
    core::types::{decode_canonical_limited, ControlEnvelope, PeerContext, Transport},
    networking::{
        dispatcher::ControlDispatcher,
        rate_limit::{RateDecision, SlidingWindowRateLimiter},
        reputation::{BadEventReason, PeerReputation},
        validator::EnvelopeValidator,
    },
    core::{security::replay::ReplayCache, types::PeerId},
    networking::descriptor::DescriptorCache,
};

/// Maps a previously-seen source address to the peer id it authenticated
/// as. Populated by the listener itself after a successful validation, and
/// by the DHT-driven descriptor-learning path.
#[derive(Default)]
pub struct EndpointRegistry {
    by_address: RwLock<HashMap<SocketAddr, PeerId>>,
}

impl EndpointRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the peer id bound to `addr`, if known.
    pub fn resolve(&self, addr: &SocketAddr) -> Option<PeerId> {
        self.by_address.read().expect("endpoint registry lock poisoned").get(addr).copied()
    }

    /// Record that `addr` authenticated as `peer_id`.
    pub fn bind(&self, addr: SocketAddr, peer_id: PeerId) {
        self.by_address.write().expect("endpoint registry lock poisoned").insert(addr, peer_id);
    }
}

/// Shared dependencies wired into both the UDP and QUIC listeners.
pub struct ListenerDeps {
    /// Pre-auth, per-source-address rate limiter.
    pub pre_auth_rate_limiter: SlidingWindowRateLimiter,
    /// Endpoint→peer-id resolution.
    pub endpoints: EndpointRegistry,
    /// Validated descriptor cache providing `allowed_control_signing_keys`.
    pub descriptors: DescriptorCache,
    /// Replay defense.
    pub replay: ReplayCache,
    /// Peer reputation.
    pub reputation: PeerReputation,
    /// Control message dispatch.
    pub dispatcher: ControlDispatcher,
    /// Mesh-wide payload cap (post size-check 3 in §4.7).
    pub max_payload_bytes: usize,
    /// Transport-specific datagram cap (UDP-only check, §4.9).
    pub max_datagram_bytes: usize,
    /// Allowed clock skew for envelope timestamps, seconds.
    pub timestamp_skew_secs: i64,
}

/// Runs the UDP listener loop until the socket errors or the process shuts down.
///
/// Returns immediately after attempting the bind so the caller's runtime is
/// never blocked on socket setup, per the startup contract.
pub async fn run_udp_listener(bind_addr: SocketAddr, deps: Arc<ListenerDeps>) {
    let socket = match UdpSocket::bind(bind_addr).await {
        Ok(s) => s,
        Err(err) => {
            tracing::warn!(%bind_addr, %err, "udp listener bind failed, continuing without it");
            return;
        }
    };
    tracing::info!(%bind_addr, "udp listener bound");

    let mut buf = vec![0u8; deps.max_datagram_bytes.max(deps.max_payload_bytes) + 256];
    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(v) => v,
            Err(err) => {
                tracing::warn!(%err, "udp recv error");
                continue;
            }
        };
        handle_datagram(&deps, &buf[..len], src).await;
    }
}

async fn handle_datagram(deps: &Arc<ListenerDeps>, bytes: &[u8], src: SocketAddr) {
    if bytes.len() > deps.max_datagram_bytes || bytes.len() > deps.max_payload_bytes {
        return;
    }

    if deps.pre_auth_rate_limiter.check(src.ip()) == RateDecision::Reject {
        return;
    }

    let peer_id = match deps.endpoints.resolve(&src) {
        Some(p) => p,
        None => {
            tracing::debug!(%src, "identity-unknown datagram dropped");
            return;
        }
    };

    let descriptor = match deps.descriptors.get(&peer_id) {
        Some(d) => d,
        None => {
            tracing::debug!(peer = %peer_id, "no cached descriptor, dropping");
            return;
        }
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
        remote_address: src,
        transport: Transport::Udp,
        allowed_control_signing_keys: descriptor.control_signing_keys.clone(),
    };

    let validator = EnvelopeValidator::new(&deps.replay, &deps.reputation, deps.max_payload_bytes, deps.timestamp_skew_secs);
    let now_ms = now_unix_ms();
    if let Err(err) = validator.validate(&envelope, &ctx, now_ms) {
        tracing::debug!(peer = %peer_id, %err, "envelope rejected");
        return;
    }

    deps.reputation.record_good(peer_id);
    let _ = deps.dispatcher.dispatch(&envelope, &ctx).await;
}

fn now_unix_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_registry_resolves_bound_address() {
        let registry = EndpointRegistry::new();
        let addr: SocketAddr = "127.0.0.1:9001".parse().unwrap();
        assert!(registry.resolve(&addr).is_none());
        registry.bind(addr, PeerId([1u8; 20]));
        assert_eq!(registry.resolve(&addr), Some(PeerId([1u8; 20])));
    }

    #[tokio::test]
    async fn bind_failure_on_busy_port_does_not_panic() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let first = UdpSocket::bind(addr).await.unwrap();
        let busy_addr = first.local_addr().unwrap();

        let deps = Arc::new(ListenerDeps {
            pre_auth_rate_limiter: SlidingWindowRateLimiter::new(100, std::time::Duration::from_secs(60)),
            endpoints: EndpointRegistry::new(),
            descriptors: DescriptorCache::new(std::time::Duration::from_secs(60)),
            replay: ReplayCache::new(std::time::Duration::from_secs(300)),
            reputation: PeerReputation::new(Default::default()),
            dispatcher: ControlDispatcher::new(),
            max_payload_bytes: 1 << 20,
            max_datagram_bytes: 8 * 1024,
            timestamp_skew_secs: 120,
        });

        // Should log and return rather than panic.
        run_udp_listener(busy_addr, deps).await;
    }
}
