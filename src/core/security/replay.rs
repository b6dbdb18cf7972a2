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

//! Bounded, time-windowed replay cache (§4.3).
//!
//! Keyed on `(peerId, messageId)`. `check_and_record` is the only entry
//! point: a single call both tests membership and records the key,
//! atomically under the shard lock, so two racing threads for the same key
//! can never both observe "fresh". Entries older than the window are swept
//! periodically; the cache is additionally capacity-bounded so a flood of
//! distinct keys cannot grow it unboundedly between sweeps.

use std::{
    collections::HashMap,
    sync::{Mutex, RwLock},
    time::{Duration, Instant},
};

use crate::core::types::PeerId;

const SHARD_COUNT: usize = 16;
const DEFAULT_MAX_ENTRIES: usize = 1_000_000;

fn shard_index(peer_id: &PeerId, message_id: &[u8; 16]) -> usize {
    let mut acc: u64 = 0;
    for b in peer_id.0.iter().chain(message_id.iter()) {
        acc = acc.wrapping_mul(31).wrapping_add(*b as u64);
    }
    (acc % SHARD_COUNT as u64) as usize
}

type ReplayKey = (PeerId, [u8; 16]);

struct Shard {
    entries: Mutex<HashMap<ReplayKey, Instant>>,
}

impl Shard {
    fn new() -> Self {
        Self { entries: Mutex::new(HashMap::new()) }
    }
}

/// Sharded, bounded, time-windowed replay detector.
pub struct ReplayCache {
    shards: Vec<Shard>,
    window: Duration,
    max_entries_per_shard: usize,
    // Tracked separately so sweeps can run without holding every shard lock at once.
    last_sweep: RwLock<Instant>,
}

impl ReplayCache {
    /// New cache with the given replay window (§4.3 default 5 minutes).
    pub fn new(window: Duration) -> Self {
        Self::with_capacity(window, DEFAULT_MAX_ENTRIES)
    }

    /// New cache with an explicit total-capacity bound.
    pub fn with_capacity(window: Duration, max_entries: usize) -> Self {
        let shards = (0..SHARD_COUNT).map(|_| Shard::new()).collect();
        Self {
            shards,
            window,
            max_entries_per_shard: (max_entries / SHARD_COUNT).max(1),
            last_sweep: RwLock::new(Instant::now()),
        }
    }

    /// Test-and-record `(peer_id, message_id)` atomically.
    ///
    /// Returns `true` if this is the first time the key has been seen within
    /// the current window (i.e. the message should proceed), `false` if it
    /// is a replay.
    pub fn check_and_record(&self, peer_id: PeerId, message_id: [u8; 16]) -> bool {
        let key: ReplayKey = (peer_id, message_id);
        let idx = shard_index(&peer_id, &message_id);
        let shard = &self.shards[idx];
        let now = Instant::now();

        let mut entries = shard.entries.lock().expect("replay shard lock poisoned");
        if let Some(seen_at) = entries.get(&key) {
            if now.duration_since(*seen_at) < self.window {
                return false;
            }
        }
        entries.insert(key, now);

        if entries.len() > self.max_entries_per_shard {
            let window = self.window;
            entries.retain(|_, t| now.duration_since(*t) < window);
        }
        true
    }

    /// Remove all entries older than the window. Intended to run on a
    /// background interval (~30s) so idle shards don't carry stale entries
    /// until the next insert happens to trigger capacity eviction.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        for shard in &self.shards {
            let mut entries = shard.entries.lock().expect("replay shard lock poisoned");
            let window = self.window;
            entries.retain(|_, t| now.duration_since(*t) < window);
        }
        *self.last_sweep.write().expect("sweep lock poisoned") = now;
    }

    /// Total number of tracked entries across all shards, for metrics.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.entries.lock().expect("replay shard lock poisoned").len())
            .sum()
    }

    /// Whether the cache currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
