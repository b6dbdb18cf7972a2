#![forbid(unsafe_code)]
#![allow(missing_docs)]

//! Overlay transport, validation, and abuse-handling stack.

/// Outbound client: sign, serialize, connect-with-pin-check, send.
pub mod client;
/// Peer descriptor validation and TTL-bounded cache.
pub mod descriptor;
/// DHT client contract and local caching wrapper.
pub mod dht;
/// Control message dispatch by envelope type.
pub mod dispatcher;
/// QUIC overlay listener, feature-gated behind `quic`.
#[cfg(feature = "quic")]
pub mod listener_quic;
/// UDP overlay listener.
pub mod listener_udp;
/// MeshSync guard-path for gossip/bulk-sync batches.
pub mod mesh_sync;
/// Pre-auth and post-auth rate limiting.
pub mod rate_limit;
/// Peer reputation with half-life decay.
pub mod reputation;
/// DHT-backed named-service lookup with abuse detection.
pub mod service_directory;
/// Ordered envelope validation.
pub mod validator;
