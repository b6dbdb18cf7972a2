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

//! Peer reputation with exponential half-life decay (§4.5).
//!
//! Scores move towards zero over time rather than being reset on a fixed
//! schedule, so an old violation matters less the longer a peer has since
//! behaved. `BanReason` deliberately excludes invalid-signature events: a
//! forged envelope proves nothing about the sender of record, since the
//! source address is attacker-controlled and may belong to an innocent
//! victim of IP spoofing. Only events attributable to the connection itself
//! (rate abuse, malformed framing, protocol violations) count towards a ban.

use std::{
    collections::BTreeMap,
    sync::RwLock,
    time::{Duration, Instant},
};

use crate::core::types::PeerId;

/// Reasons a bad event can be recorded against a peer. `InvalidSignature` is
/// intentionally absent — see module docs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BadEventReason {
    /// Exceeded a rate limit.
    RateLimited,
    /// Malformed envelope framing or decode failure.
    MalformedMessage,
    /// Stale or out-of-skew timestamp.
    StaleTimestamp,
    /// Replayed message id.
    Replay,
    /// Handler-level protocol violation (e.g. invalid descriptor content).
    ProtocolViolation,
}

/// Outcome of recording an event, used by callers to decide whether to
/// drop a connection or escalate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Peer remains in good standing.
    Allow,
    /// Peer should be rate-throttled but not disconnected.
    Throttle,
    /// Peer should be quarantined: new connections refused until cooldown elapses.
    Quarantine,
    /// Peer has crossed the ban threshold.
    Ban,
}

/// Tunable decay/threshold parameters.
#[derive(Clone, Debug)]
pub struct ReputationParams {
    /// Score delta for a good (successfully validated) event.
    pub good_delta: i32,
    /// Score delta for a bad event (applied per `BadEventReason`, see `weight_of`).
    pub bad_delta: i32,
    /// Half-life of score decay towards zero.
    pub half_life: Duration,
    /// Score at or below which new connections from this peer are quarantined.
    pub quarantine_threshold: i32,
    /// Score at or below which the peer is banned outright.
    pub ban_threshold: i32,
    /// How long a quarantine lasts before the peer is re-evaluated.
    pub quarantine_cooldown: Duration,
}

impl Default for ReputationParams {
    fn default() -> Self {
        Self {
            good_delta: 1,
            bad_delta: 10,
            half_life: Duration::from_secs(604_800),
            quarantine_threshold: -30,
            ban_threshold: -100,
            quarantine_cooldown: Duration::from_secs(600),
        }
    }
}

fn weight_of(reason: BadEventReason) -> i32 {
    match reason {
        BadEventReason::RateLimited => 1,
        BadEventReason::StaleTimestamp => 2,
        BadEventReason::Replay => 3,
        BadEventReason::MalformedMessage => 3,
        BadEventReason::ProtocolViolation => 5,
    }
}

#[derive(Clone, Debug)]
struct EventLogEntry {
    reason: BadEventReason,
    at: Instant,
}

struct PeerState {
    score: i32,
    last_decay: Instant,
    quarantined_until: Option<Instant>,
    recent_events: Vec<EventLogEntry>,
}

impl PeerState {
    fn fresh(now: Instant) -> Self {
        Self { score: 0, last_decay: now, quarantined_until: None, recent_events: Vec::new() }
    }
}

const EVENT_LOG_CAP: usize = 32;

/// Per-peer reputation tracker.
pub struct PeerReputation {
    params: ReputationParams,
    peers: RwLock<BTreeMap<PeerId, PeerState>>,
}

impl PeerReputation {
    /// New tracker with the given parameters.
    pub fn new(params: ReputationParams) -> Self {
        Self { params, peers: RwLock::new(BTreeMap::new()) }
    }

    /// Current score for `peer`, applying decay as of now without mutating committed state by a side effect other than the decay itself.
    pub fn score(&self, peer: PeerId) -> i32 {
        let mut peers = self.peers.write().expect("reputation lock poisoned");
        let now = Instant::now();
        let st = peers.entry(peer).or_insert_with(|| PeerState::fresh(now));
        Self::apply_decay(&self.params, st, now);
        st.score
    }

    /// Whether `peer` is currently quarantined (checked before signature
    /// verification, per the listener's validation order).
    pub fn is_quarantined(&self, peer: PeerId) -> bool {
        let mut peers = self.peers.write().expect("reputation lock poisoned");
        let now = Instant::now();
        let st = peers.entry(peer).or_insert_with(|| PeerState::fresh(now));
        match st.quarantined_until {
            Some(until) if now < until => true,
            Some(_) => {
                st.quarantined_until = None;
                false
            }
            None => false,
        }
    }

    /// Record a successfully validated envelope from `peer`.
    pub fn record_good(&self, peer: PeerId) -> Decision {
        let mut peers = self.peers.write().expect("reputation lock poisoned");
        let now = Instant::now();
        let st = peers.entry(peer).or_insert_with(|| PeerState::fresh(now));
        Self::apply_decay(&self.params, st, now);
        st.score = (st.score + self.params.good_delta).min(1000);
        Self::decision_for(&self.params, st, now)
    }

    /// Record a bad event from `peer`, returning the resulting decision.
    pub fn record_bad(&self, peer: PeerId, reason: BadEventReason) -> Decision {
        let mut peers = self.peers.write().expect("reputation lock poisoned");
        let now = Instant::now();
        let st = peers.entry(peer).or_insert_with(|| PeerState::fresh(now));
        Self::apply_decay(&self.params, st, now);

        let delta = self.params.bad_delta.saturating_mul(weight_of(reason));
        st.score = (st.score - delta).max(-1000);

        st.recent_events.push(EventLogEntry { reason, at: now });
        if st.recent_events.len() > EVENT_LOG_CAP {
            let excess = st.recent_events.len() - EVENT_LOG_CAP;
            st.recent_events.drain(0..excess);
        }

        let decision = Self::decision_for(&self.params, st, now);
        if decision == Decision::Quarantine && st.quarantined_until.is_none() {
            st.quarantined_until = Some(now + self.params.quarantine_cooldown);
        }
        decision
    }

    /// Sweep stale per-peer state with a score at or near zero and no
    /// pending quarantine, to bound memory for peers seen only transiently.
    pub fn decay_and_cleanup(&self) {
        let mut peers = self.peers.write().expect("reputation lock poisoned");
        let now = Instant::now();
        for st in peers.values_mut() {
            Self::apply_decay(&self.params, st, now);
        }
        peers.retain(|_, st| {
            st.score != 0 || st.quarantined_until.map(|u| now < u).unwrap_or(false)
        });
    }

    fn decision_for(params: &ReputationParams, st: &PeerState, now: Instant) -> Decision {
        if st.score <= params.ban_threshold {
            Decision::Ban
        } else if st.quarantined_until.map(|u| now < u).unwrap_or(false) || st.score <= params.quarantine_threshold {
            Decision::Quarantine
        } else if st.score < 0 {
            Decision::Throttle
        } else {
            Decision::Allow
        }
    }

    fn apply_decay(params: &ReputationParams, st: &mut PeerState, now: Instant) {
        let elapsed = now.checked_duration_since(st.last_decay).unwrap_or(Duration::ZERO);
        if elapsed.is_zero() || params.half_life.is_zero() {
            return;
        }
        let half_lives = elapsed.as_secs_f64() / params.half_life.as_secs_f64();
        if half_lives <= 0.0 {
            return;
        }
        let factor = 0.5_f64.powf(half_lives);
        st.score = (st.score as f64 * factor).round() as i32;
        st.last_decay = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(b: u8) -> PeerId {
        PeerId([b; 20])
    }

    #[test]
    fn fresh_peer_starts_allowed() {
        let rep = PeerReputation::new(ReputationParams::default());
        assert_eq!(rep.score(pid(1)), 0);
        assert!(!rep.is_quarantined(pid(1)));
    }

    #[test]
    fn repeated_bad_events_eventually_quarantine() {
        let rep = PeerReputation::new(ReputationParams::default());
        let mut last = Decision::Allow;
        for _ in 0..10 {
            last = rep.record_bad(pid(2), BadEventReason::ProtocolViolation);
        }
        assert!(matches!(last, Decision::Quarantine | Decision::Ban));
    }

    #[test]
    fn severe_abuse_reaches_ban() {
        let rep = PeerReputation::new(ReputationParams::default());
        let mut last = Decision::Allow;
        for _ in 0..30 {
            last = rep.record_bad(pid(3), BadEventReason::ProtocolViolation);
        }
        assert_eq!(last, Decision::Ban);
    }

    #[test]
    fn quarantine_decision_persists_until_cooldown() {
        let params = ReputationParams {
            quarantine_cooldown: Duration::from_millis(5),
            ..ReputationParams::default()
        };
        let rep = PeerReputation::new(params);
        for _ in 0..5 {
            rep.record_bad(pid(4), BadEventReason::ProtocolViolation);
        }
        assert!(rep.is_quarantined(pid(4)));
        std::thread::sleep(Duration::from_millis(20));
        assert!(!rep.is_quarantined(pid(4)));
    }

    #[test]
    fn good_events_recover_score_over_time() {
        let rep = PeerReputation::new(ReputationParams::default());
        rep.record_bad(pid(5), BadEventReason::RateLimited);
        let before = rep.score(pid(5));
        for _ in 0..20 {
            rep.record_good(pid(5));
        }
        assert!(rep.score(pid(5)) > before);
    }

    #[test]
    fn decay_and_cleanup_drops_neutral_peers() {
        let rep = PeerReputation::new(ReputationParams::default());
        rep.record_good(pid(6));
        rep.record_bad(pid(6), BadEventReason::RateLimited);
        rep.decay_and_cleanup();
        // peer had a nonzero score at some point; just ensure no panic and state is queryable.
        let _ = rep.score(pid(6));
    }
}
