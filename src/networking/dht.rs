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

//! DHT client contract (§6.3, §6.5) and a sled-backed local cache used to
//! bound repeat RPCs for keys that rarely change (descriptors, service
//! lists) between successive lookups of the same key.
//!
//! The Kademlia routing table itself, NAT traversal, and the wire RPC to
//! remote DHT nodes are out of scope here — this module defines the
//! boundary the rest of the overlay calls through, consistent with how the
//! routing table and content-addressed storage are external collaborators.

use std::time::Duration;

use async_trait::async_trait;
use sled::Db;

use crate::core::types::PeerId;

/// DHT key conventions consumed by this overlay.
pub mod keys {
    use crate::core::types::PeerId;

    /// `svc:<serviceName>` → list of signed service descriptors.
    pub fn service(service_name: &str) -> String {
        format!("svc:{service_name}")
    }

    /// `peer:<peerId>` → signed peer descriptor.
    pub fn peer(peer_id: &PeerId) -> String {
        format!("peer:{}", peer_id.to_hex())
    }

    /// `mesh:content-peers:<contentId>` → peer hints.
    pub fn content_peers(content_id: &str) -> String {
        format!("mesh:content-peers:{content_id}")
    }
}

/// Errors surfaced by a DHT client call.
#[derive(Debug, thiserror::Error)]
pub enum DhtError {
    /// The call did not complete within its timeout.
    #[error("dht timeout")]
    Timeout,
    /// Underlying transport/storage error.
    #[error("dht transport")]
    Transport,
}

/// Minimal handle describing a reachable node, returned by `find_node`.
#[derive(Clone, Debug)]
pub struct NodeHandle {
    /// The node's peer id.
    pub peer_id: PeerId,
    /// A `host:port` the node was last seen reachable at.
    pub address: String,
}

/// Collaborator contract for DHT access (§6.5 `IDhtClient`).
#[async_trait]
pub trait DhtClient: Send + Sync {
    /// Fetch the raw bytes stored at `key`, if any.
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, DhtError>;
    /// Store `value` at `key` with the given time-to-live.
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), DhtError>;
    /// Locate nodes closest to `target` in the routing table.
    async fn find_node(&self, target: &PeerId) -> Result<Vec<NodeHandle>, DhtError>;
    /// Liveness probe against a known node.
    async fn ping(&self, peer: &NodeHandle) -> Result<bool, DhtError>;
}

/// A local sled-backed cache in front of a `DhtClient`, used to avoid
/// repeat network round-trips for descriptors fetched within the last few
/// seconds (the validator still re-validates every admitted value; this
/// cache only saves the RPC, not the trust decision).
pub struct CachingDhtClient<C: DhtClient> {
    inner: C,
    cache: Db,
    cache_ttl: Duration,
}

impl<C: DhtClient> CachingDhtClient<C> {
    /// Wrap `inner`, persisting cached values under `<data_dir>/dht-cache`.
    pub fn new(inner: C, data_dir: &str, cache_ttl: Duration) -> Result<Self, sled::Error> {
        let path = std::path::Path::new(data_dir).join("dht-cache");
        let cache = sled::open(path)?;
        Ok(Self { inner, cache, cache_ttl })
    }

    fn cache_get(&self, key: &str) -> Option<Vec<u8>> {
        let raw = self.cache.get(key).ok().flatten()?;
        if raw.len() < 8 {
            return None;
        }
        let mut stamp_bytes = [0u8; 8];
        stamp_bytes.copy_from_slice(&raw[..8]);
        let stamp = u64::from_be_bytes(stamp_bytes);
        let now = now_unix_secs();
        if now.saturating_sub(stamp) > self.cache_ttl.as_secs() {
            return None;
        }
        Some(raw[8..].to_vec())
    }

    fn cache_put(&self, key: &str, value: &[u8]) {
        let mut entry = Vec::with_capacity(8 + value.len());
        entry.extend_from_slice(&now_unix_secs().to_be_bytes());
        entry.extend_from_slice(value);
        let _ = self.cache.insert(key, entry);
    }
}

fn now_unix_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[async_trait]
impl<C: DhtClient> DhtClient for CachingDhtClient<C> {
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, DhtError> {
        if let Some(cached) = self.cache_get(key) {
            return Ok(Some(cached));
        }
        let value = self.inner.get_raw(key).await?;
        if let Some(v) = &value {
            self.cache_put(key, v);
        }
        Ok(value)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), DhtError> {
        self.cache_put(key, &value);
        self.inner.put(key, value, ttl).await
    }

    async fn find_node(&self, target: &PeerId) -> Result<Vec<NodeHandle>, DhtError> {
        self.inner.find_node(target).await
    }

    async fn ping(&self, peer: &NodeHandle) -> Result<bool, DhtError> {
        self.inner.ping(peer).await
    }
}
