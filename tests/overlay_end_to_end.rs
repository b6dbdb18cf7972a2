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

//! End-to-end coverage of the UDP overlay listener: real sockets, real
//! signatures, real canonical encoding, driven all the way through
//! `EnvelopeValidator` and `ControlDispatcher`.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use async_trait::async_trait;
use overlay_mesh::{
    core::{
        security::{keystore::KeyStore, replay::ReplayCache, signing::Signer},
        types::{ControlEnvelope, EndpointAddr, PeerContext, PeerDescriptor, PeerId, Transport},
    },
    error::HandlerError,
    networking::{
        descriptor::{sign_descriptor, DescriptorCache},
        dispatcher::{ControlDispatcher, ControlHandler},
        listener_udp::{run_udp_listener, EndpointRegistry, ListenerDeps},
        rate_limit::SlidingWindowRateLimiter,
        reputation::PeerReputation,
    },
};
use tokio::net::UdpSocket;

struct CountingHandler {
    count: Arc<AtomicUsize>,
}

#[async_trait]
impl ControlHandler for CountingHandler {
    async fn handle(&self, _envelope: &ControlEnvelope, _ctx: &PeerContext) -> Result<(), HandlerError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn now_unix_ms() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as i64
}

fn reserve_ephemeral_addr() -> SocketAddr {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap()
}

/// Boots a real UDP listener with one peer's descriptor and endpoint
/// pre-admitted, and a "ping" handler wired in. Returns the listener
/// address, the peer's keystore (for signing test envelopes), the hit
/// counter, and the client socket already bound and known to the listener.
async fn spawn_listener() -> (SocketAddr, KeyStore, Arc<AtomicUsize>, UdpSocket) {
    let keystore_dir = tempfile::tempdir().unwrap();
    let keystore = KeyStore::open(keystore_dir.path().to_str().unwrap(), Duration::from_secs(3600)).unwrap();
    let pk = keystore.public_key();
    let peer_id = PeerId::from_public_key(&pk);

    let mut descriptor = PeerDescriptor {
        peer_id,
        identity_public_key: pk,
        control_signing_keys: vec![pk],
        control_spki_sha256: "unused-in-this-test".to_string(),
        endpoints: vec![EndpointAddr { transport: Transport::Udp, address: "127.0.0.1:0".to_string() }],
        expiry: now_unix_ms() / 1000 + 3600,
        sequence_number: 1,
        self_signature: Vec::new(),
    };
    sign_descriptor(&mut descriptor, &keystore).unwrap();

    let descriptors = DescriptorCache::new(Duration::from_secs(3600));
    descriptors.admit(descriptor).unwrap();

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let client_addr = client.local_addr().unwrap();

    let endpoints = EndpointRegistry::new();
    endpoints.bind(client_addr, peer_id);

    let count = Arc::new(AtomicUsize::new(0));
    let mut dispatcher = ControlDispatcher::new();
    dispatcher.register("ping", Arc::new(CountingHandler { count: count.clone() }));

    let deps = Arc::new(ListenerDeps {
        pre_auth_rate_limiter: SlidingWindowRateLimiter::new(1000, Duration::from_secs(60)),
        endpoints,
        descriptors,
        replay: ReplayCache::new(Duration::from_secs(300)),
        reputation: PeerReputation::new(Default::default()),
        dispatcher,
        max_payload_bytes: 64 * 1024,
        max_datagram_bytes: 8 * 1024,
        timestamp_skew_secs: 120,
    });

    let listen_addr = reserve_ephemeral_addr();
    tokio::spawn(run_udp_listener(listen_addr, deps));
    // Give the bind a moment to land before the first datagram is sent.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (listen_addr, keystore, count, client)
}

fn make_signed_envelope(keystore: &KeyStore, r#type: &str, payload: &[u8], message_id: [u8; 16]) -> Vec<u8> {
    let mut envelope = ControlEnvelope {
        r#type: r#type.to_string(),
        payload: payload.to_vec(),
        public_key: String::new(),
        signature: String::new(),
        timestamp_unix_ms: now_unix_ms(),
        message_id,
    };
    keystore.with_current(|kp| Signer::new(kp).sign(&mut envelope)).unwrap();
    overlay_mesh::core::types::encode_canonical(&envelope).unwrap()
}

#[tokio::test]
async fn valid_signed_ping_is_dispatched() {
    let (listen_addr, keystore, count, client) = spawn_listener().await;
    let bytes = make_signed_envelope(&keystore, "ping", b"hello", [1u8; 16]);

    client.send_to(&bytes, listen_addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn replayed_message_id_is_dispatched_once() {
    let (listen_addr, keystore, count, client) = spawn_listener().await;
    let bytes = make_signed_envelope(&keystore, "ping", b"hello", [2u8; 16]);

    client.send_to(&bytes, listen_addr).await.unwrap();
    client.send_to(&bytes, listen_addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn tampered_signature_is_not_dispatched() {
    let (listen_addr, keystore, count, client) = spawn_listener().await;
    let mut bytes = make_signed_envelope(&keystore, "ping", b"hello", [3u8; 16]);
    // Flip a byte inside the encoded payload region to invalidate the signature.
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;

    client.send_to(&bytes, listen_addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stale_timestamp_is_not_dispatched() {
    let (listen_addr, keystore, count, client) = spawn_listener().await;
    let mut envelope = ControlEnvelope {
        r#type: "ping".to_string(),
        payload: b"hello".to_vec(),
        public_key: String::new(),
        signature: String::new(),
        timestamp_unix_ms: now_unix_ms() - Duration::from_secs(3600).as_millis() as i64,
        message_id: [4u8; 16],
    };
    keystore.with_current(|kp| Signer::new(kp).sign(&mut envelope)).unwrap();
    let bytes = overlay_mesh::core::types::encode_canonical(&envelope).unwrap();

    client.send_to(&bytes, listen_addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unknown_source_address_is_dropped_before_authentication() {
    let (listen_addr, keystore, count, _client) = spawn_listener().await;
    // A second client socket was never bound into the endpoint registry, so
    // it is identity-unknown from the listener's point of view.
    let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let bytes = make_signed_envelope(&keystore, "ping", b"hello", [5u8; 16]);

    stranger.send_to(&bytes, listen_addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn bind_failure_on_busy_port_is_degraded_not_fatal() {
    let busy = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let busy_addr = busy.local_addr().unwrap();

    let deps = Arc::new(ListenerDeps {
        pre_auth_rate_limiter: SlidingWindowRateLimiter::new(100, Duration::from_secs(60)),
        endpoints: EndpointRegistry::new(),
        descriptors: DescriptorCache::new(Duration::from_secs(60)),
        replay: ReplayCache::new(Duration::from_secs(300)),
        reputation: PeerReputation::new(Default::default()),
        dispatcher: ControlDispatcher::new(),
        max_payload_bytes: 1 << 20,
        max_datagram_bytes: 8 * 1024,
        timestamp_skew_secs: 120,
    });

    // Returns rather than panicking, even though the port is already bound.
    run_udp_listener(busy_addr, deps).await;
}
