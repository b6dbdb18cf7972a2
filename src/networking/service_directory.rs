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

//! ServiceDirectory (§4.11): DHT-backed lookup of signed service
//! descriptors by name, with per-requester abuse detection.
//!
//! Abuse windows are 1 minute, tracked per requester peer id:
//! - **enumeration**: more than 10 distinct service names queried
//! - **rapid-fire**: more than 50 total queries
//! - **scanning**: more than 30 total queries *and* more than 5 distinct names
//!
//! Flags are advisory — surfaced to the caller for relay into the
//! reputation/rate-limit layers, never used to block a query directly here.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    core::{
        security::keystore::verify_pubkey_bytes,
        types::{encode_canonical, CodecError, PeerId},
    },
    networking::dht::{keys, DhtClient, DhtError},
};

/// A signed record describing where a named service can be reached.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Service name this descriptor advertises.
    pub service_name: String,
    /// Identity key of the peer offering the service.
    pub provider: PeerId,
    /// The provider's identity public key (signs this descriptor).
    pub provider_public_key: [u8; 32],
    /// `host:port` the service can be reached at.
    pub endpoint: String,
    /// Unix seconds after which this descriptor is no longer valid.
    pub expiry: i64,
    /// Self-signature over the canonical encoding of the fields above.
    pub signature: Vec<u8>,
}

#[derive(Serialize)]
struct SignedFields<'a> {
    service_name: &'a str,
    provider: &'a PeerId,
    provider_public_key: &'a [u8; 32],
    endpoint: &'a str,
    expiry: i64,
}

fn signed_bytes(desc: &ServiceDescriptor) -> Result<Vec<u8>, CodecError> {
    encode_canonical(&SignedFields {
        service_name: &desc.service_name,
        provider: &desc.provider,
        provider_public_key: &desc.provider_public_key,
        endpoint: &desc.endpoint,
        expiry: desc.expiry,
    })
}

/// Errors rejecting an individual service descriptor.
#[derive(Debug, Error)]
pub enum ServiceDescriptorError {
    /// Provider id does not match the hash of the provider public key.
    #[error("provider id mismatch")]
    ProviderMismatch,
    /// Descriptor has expired.
    #[error("descriptor expired")]
    Expired,
    /// Endpoint or name is empty.
    #[error("malformed descriptor")]
    Malformed,
    /// Self-signature failed.
    #[error("bad signature")]
    BadSignature,
    /// Canonical encoding failed.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

fn validate_service_descriptor(desc: &ServiceDescriptor) -> Result<(), ServiceDescriptorError> {
    if PeerId::from_public_key(&desc.provider_public_key) != desc.provider {
        return Err(ServiceDescriptorError::ProviderMismatch);
    }
    if desc.service_name.is_empty() || desc.endpoint.is_empty() {
        return Err(ServiceDescriptorError::Malformed);
    }
    if desc.expiry < now_unix() {
        return Err(ServiceDescriptorError::Expired);
    }
    let msg = signed_bytes(desc)?;
    verify_pubkey_bytes(&desc.provider_public_key, &msg, &desc.signature)
        .map_err(|_| ServiceDescriptorError::BadSignature)
}

fn now_unix() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// Abuse patterns the sliding-window tracker can flag for a requester.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AbuseFlag {
    /// More than 10 distinct service names queried within the window.
    Enumeration,
    /// More than 50 total queries within the window.
    RapidFire,
    /// More than 30 total queries and more than 5 distinct names.
    Scanning,
}

struct RequesterWindow {
    window_start: Instant,
    query_count: u32,
    names: HashSet<String>,
}

impl RequesterWindow {
    fn fresh(now: Instant) -> Self {
        Self { window_start: now, query_count: 0, names: HashSet::new() }
    }
}

struct AbuseTracker {
    windows: Mutex<HashMap<PeerId, RequesterWindow>>,
}

impl AbuseTracker {
    fn new() -> Self {
        Self { windows: Mutex::new(HashMap::new()) }
    }

    fn record(&self, requester: PeerId, service_name: &str) -> Vec<AbuseFlag> {
        let mut windows = self.windows.lock().expect("abuse tracker lock poisoned");
        let now = Instant::now();
        let w = windows.entry(requester).or_insert_with(|| RequesterWindow::fresh(now));

        if now.duration_since(w.window_start) >= Duration::from_secs(60) {
            *w = RequesterWindow::fresh(now);
        }
        w.query_count += 1;
        w.names.insert(service_name.to_string());

        let mut flags = Vec::new();
        if w.names.len() > 10 {
            flags.push(AbuseFlag::Enumeration);
        }
        if w.query_count > 50 {
            flags.push(AbuseFlag::RapidFire);
        }
        if w.query_count > 30 && w.names.len() > 5 {
            flags.push(AbuseFlag::Scanning);
        }
        flags
    }
}

/// DHT-backed directory of named services.
pub struct ServiceDirectory<C: DhtClient> {
    dht: C,
    abuse: AbuseTracker,
    max_descriptors_per_lookup: usize,
}

impl<C: DhtClient> ServiceDirectory<C> {
    /// New directory over `dht`, capping lookup fan-out at `max_descriptors_per_lookup`.
    pub fn new(dht: C, max_descriptors_per_lookup: usize) -> Self {
        Self { dht, abuse: AbuseTracker::new(), max_descriptors_per_lookup }
    }

    /// Look up providers of `service_name`, optionally attributing the
    /// query to `requester` for abuse tracking. Returns the validated
    /// descriptors (arrival order, capped) and any abuse flags raised by
    /// this query.
    pub async fn find_by_name(
        &self,
        service_name: &str,
        requester: Option<PeerId>,
    ) -> Result<(Vec<ServiceDescriptor>, Vec<AbuseFlag>), DhtError> {
        let flags = requester.map(|r| self.abuse.record(r, service_name)).unwrap_or_default();

        let raw = self.dht.get_raw(&keys::service(service_name)).await?;
        let Some(raw) = raw else {
            return Ok((Vec::new(), flags));
        };

        let candidates: Vec<ServiceDescriptor> = match bincode::deserialize(&raw) {
            Ok(v) => v,
            Err(_) => return Ok((Vec::new(), flags)),
        };

        let mut valid = Vec::with_capacity(self.max_descriptors_per_lookup);
        for desc in candidates {
            if valid.len() >= self.max_descriptors_per_lookup {
                break;
            }
            if validate_service_descriptor(&desc).is_ok() {
                valid.push(desc);
            }
        }
        Ok((valid, flags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ring::{rand::SystemRandom, signature::{Ed25519KeyPair, KeyPair}};
    use std::time::Duration as StdDuration;

    struct FakeDht {
        value: Option<Vec<u8>>,
    }

    #[async_trait]
    impl DhtClient for FakeDht {
        async fn get_raw(&self, _key: &str) -> Result<Option<Vec<u8>>, DhtError> {
            Ok(self.value.clone())
        }
        async fn put(&self, _key: &str, _value: Vec<u8>, _ttl: StdDuration) -> Result<(), DhtError> {
            Ok(())
        }
        async fn find_node(&self, _target: &PeerId) -> Result<Vec<crate::networking::dht::NodeHandle>, DhtError> {
            Ok(vec![])
        }
        async fn ping(&self, _peer: &crate::networking::dht::NodeHandle) -> Result<bool, DhtError> {
            Ok(true)
        }
    }

    fn signed_descriptor(name: &str) -> ServiceDescriptor {
        let rng = SystemRandom::new();
        let pkcs8 = Ed25519KeyPair::generate_pkcs8(&rng).unwrap();
        let kp = Ed25519KeyPair::from_pkcs8(pkcs8.as_ref()).unwrap();
        let mut pk = [0u8; 32];
        pk.copy_from_slice(kp.public_key().as_ref());

        let mut desc = ServiceDescriptor {
            service_name: name.to_string(),
            provider: PeerId::from_public_key(&pk),
            provider_public_key: pk,
            endpoint: "127.0.0.1:9000".to_string(),
            expiry: now_unix() + 3600,
            signature: Vec::new(),
        };
        let msg = signed_bytes(&desc).unwrap();
        desc.signature = kp.sign(&msg).as_ref().to_vec();
        desc
    }

    #[tokio::test]
    async fn find_by_name_returns_valid_descriptors() {
        let desc = signed_descriptor("mesh-dns");
        let raw = bincode::serialize(&vec![desc.clone()]).unwrap();
        let dir = ServiceDirectory::new(FakeDht { value: Some(raw) }, 16);

        let (found, _flags) = dir.find_by_name("mesh-dns", None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].service_name, "mesh-dns");
    }

    #[tokio::test]
    async fn tampered_descriptor_is_filtered_out() {
        let mut desc = signed_descriptor("mesh-dns");
        desc.endpoint = "10.0.0.1:1".to_string();
        let raw = bincode::serialize(&vec![desc]).unwrap();
        let dir = ServiceDirectory::new(FakeDht { value: Some(raw) }, 16);

        let (found, _flags) = dir.find_by_name("mesh-dns", None).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn rapid_fire_is_flagged_past_fifty_queries() {
        let dir = ServiceDirectory::new(FakeDht { value: None }, 16);
        let requester = PeerId([1u8; 20]);
        let mut last_flags = Vec::new();
        for i in 0..60 {
            let (_, flags) = dir.find_by_name(&format!("svc-{i}"), Some(requester)).await.unwrap();
            last_flags = flags;
        }
        assert!(last_flags.contains(&AbuseFlag::RapidFire));
    }

    #[tokio::test]
    async fn enumeration_is_flagged_past_ten_distinct_names() {
        let dir = ServiceDirectory::new(FakeDht { value: None }, 16);
        let requester = PeerId([2u8; 20]);
        let mut last_flags = Vec::new();
        for i in 0..12 {
            let (_, flags) = dir.find_by_name(&format!("distinct-{i}"), Some(requester)).await.unwrap();
            last_flags = flags;
        }
        assert!(last_flags.contains(&AbuseFlag::Enumeration));
    }
}
