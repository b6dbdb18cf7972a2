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

//! MeshSync guard-path (§4.12): per-entry validation for gossip/bulk-sync
//! batches flowing over the overlay, separate from the single-envelope
//! validator since a batch admits partial failure (some entries valid,
//! some not) rather than all-or-nothing rejection.
//!
//! After ~45 invalid entries in a window the sending peer is rate-limited;
//! three or more rate-limit violations in a window escalate to quarantine,
//! during which *every* message from the peer is rejected without
//! processing — including ones that would otherwise validate — until the
//! cooldown elapses and reputation decay lifts the state.

use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::{
    core::types::PeerId,
    networking::reputation::{BadEventReason, Decision, PeerReputation},
};

/// One entry in a bulk-sync batch (flac-key content index entries, per §4.12).
#[derive(Clone, Debug)]
pub struct SyncEntry {
    /// Content hash, expected to be exactly 32 bytes.
    pub hash: Vec<u8>,
    /// Opaque key identifying the entry's content family.
    pub flac_key: String,
    /// Payload size in bytes; must be nonzero.
    pub size: u64,
}

/// Per-entry validation outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryOutcome {
    /// Entry passed format checks.
    Valid,
    /// Entry failed format checks.
    Invalid,
}

fn validate_entry(entry: &SyncEntry) -> EntryOutcome {
    if entry.hash.len() != 32 {
        return EntryOutcome::Invalid;
    }
    if entry.flac_key.is_empty() || !entry.flac_key.is_ascii() {
        return EntryOutcome::Invalid;
    }
    if entry.size == 0 {
        return EntryOutcome::Invalid;
    }
    EntryOutcome::Valid
}

const INVALID_ENTRY_THRESHOLD: u32 = 45;
const RATE_LIMIT_VIOLATIONS_TO_QUARANTINE: u32 = 3;
const WINDOW: Duration = Duration::from_secs(60);

struct PeerWindow {
    window_start: Instant,
    invalid_count: u32,
    rate_limit_violations: u32,
}

impl PeerWindow {
    fn fresh(now: Instant) -> Self {
        Self { window_start: now, invalid_count: 0, rate_limit_violations: 0 }
    }
}

/// Batch-validation guard for gossip/bulk-sync entries.
pub struct MeshSyncGuard<'a> {
    reputation: &'a PeerReputation,
    windows: Mutex<HashMap<PeerId, PeerWindow>>,
}

impl<'a> MeshSyncGuard<'a> {
    /// New guard over the shared reputation tracker.
    pub fn new(reputation: &'a PeerReputation) -> Self {
        Self { reputation, windows: Mutex::new(HashMap::new()) }
    }

    /// Validate one incoming batch from `peer`. If the peer is currently
    /// quarantined, every entry is rejected without being inspected.
    /// Otherwise each entry is validated independently; invalid entries
    /// accumulate towards the per-window threshold that triggers a
    /// rate-limit event (and, on repeated violation, quarantine).
    pub fn validate_batch(&self, peer: PeerId, entries: &[SyncEntry]) -> Vec<EntryOutcome> {
        if self.reputation.is_quarantined(peer) {
            return vec![EntryOutcome::Invalid; entries.len()];
        }

        let mut windows = self.windows.lock().expect("mesh sync guard lock poisoned");
        let now = Instant::now();
        let w = windows.entry(peer).or_insert_with(|| PeerWindow::fresh(now));
        if now.duration_since(w.window_start) >= WINDOW {
            *w = PeerWindow::fresh(now);
        }

        let mut outcomes = Vec::with_capacity(entries.len());
        for entry in entries {
            let outcome = validate_entry(entry);
            outcomes.push(outcome);
            if outcome == EntryOutcome::Invalid {
                w.invalid_count += 1;
            }
        }

        if w.invalid_count > INVALID_ENTRY_THRESHOLD {
            w.invalid_count = 0;
            w.rate_limit_violations += 1;
            self.reputation.record_bad(peer, BadEventReason::RateLimited);

            if w.rate_limit_violations >= RATE_LIMIT_VIOLATIONS_TO_QUARANTINE {
                // Escalate with a protocol-violation weight so the
                // reputation tracker's own quarantine threshold kicks in
                // promptly rather than waiting out further windows.
                let decision = self.reputation.record_bad(peer, BadEventReason::ProtocolViolation);
                if decision != Decision::Quarantine && decision != Decision::Ban {
                    for _ in 0..5 {
                        self.reputation.record_bad(peer, BadEventReason::ProtocolViolation);
                    }
                }
            }
        }

        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::networking::reputation::ReputationParams;

    fn pid(b: u8) -> PeerId {
        PeerId([b; 20])
    }

    fn valid_entry() -> SyncEntry {
        SyncEntry { hash: vec![1u8; 32], flac_key: "track-1".to_string(), size: 1024 }
    }

    fn invalid_entry() -> SyncEntry {
        SyncEntry { hash: vec![1u8; 4], flac_key: String::new(), size: 0 }
    }

    #[test]
    fn valid_batch_all_pass() {
        let reputation = PeerReputation::new(ReputationParams::default());
        let guard = MeshSyncGuard::new(&reputation);
        let outcomes = guard.validate_batch(pid(1), &vec![valid_entry(); 5]);
        assert!(outcomes.iter().all(|o| *o == EntryOutcome::Valid));
    }

    #[test]
    fn mixed_batch_flags_invalid_entries_individually() {
        let reputation = PeerReputation::new(ReputationParams::default());
        let guard = MeshSyncGuard::new(&reputation);
        let batch = vec![valid_entry(), invalid_entry(), valid_entry()];
        let outcomes = guard.validate_batch(pid(2), &batch);
        assert_eq!(outcomes, vec![EntryOutcome::Valid, EntryOutcome::Invalid, EntryOutcome::Valid]);
    }

    #[test]
    fn exceeding_invalid_threshold_triggers_rate_limit_event() {
        let reputation = PeerReputation::new(ReputationParams::default());
        let guard = MeshSyncGuard::new(&reputation);
        let batch = vec![invalid_entry(); 50];
        guard.validate_batch(pid(3), &batch);
        // A rate-limit bad event was recorded; score should have moved below zero.
        assert!(reputation.score(pid(3)) < 0);
    }

    #[test]
    fn quarantined_peer_has_every_entry_rejected_even_if_well_formed() {
        let reputation = PeerReputation::new(ReputationParams::default());
        for _ in 0..20 {
            reputation.record_bad(pid(4), BadEventReason::ProtocolViolation);
        }
        assert!(reputation.is_quarantined(pid(4)));

        let guard = MeshSyncGuard::new(&reputation);
        let outcomes = guard.validate_batch(pid(4), &vec![valid_entry(); 3]);
        assert!(outcomes.iter().all(|o| *o == EntryOutcome::Invalid));
    }
}
