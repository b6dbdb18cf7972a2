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

//! Rate limiting (§4.4), two layers:
//!
//! - [`SlidingWindowRateLimiter`]: pre-auth, keyed by source `SocketAddr`.
//!   Applied before an envelope's signature is known to be valid, so it must
//!   stay cheap and must not depend on peer identity.
//! - [`TokenBucketLimiter`]: post-auth, keyed by `(PeerId, envelope type)`.
//!   Applied once the caller is a known peer, so distinct envelope types get
//!   independent budgets and a chatty `ping` handler can't starve `probe`.

use std::{
    collections::HashMap,
    net::IpAddr,
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::core::types::PeerId;

/// Decision returned by a rate limiter check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateDecision {
    /// Under budget; proceed.
    Allow,
    /// Over budget; reject without consuming further resources.
    Reject,
}

struct WindowCounter {
    window_start: Instant,
    count: u32,
}

/// Pre-auth sliding-window limiter, one counter per source IP.
///
/// Uses a simple fixed-window-reset scheme (not a true rolling log) to keep
/// memory bounded under a high-cardinality attack: each key holds one
/// counter and one timestamp, reset wholesale when the window elapses.
pub struct SlidingWindowRateLimiter {
    max_per_window: u32,
    window: Duration,
    counters: Mutex<HashMap<IpAddr, WindowCounter>>,
}

impl SlidingWindowRateLimiter {
    /// New limiter admitting up to `max_per_window` events per `window` per source address.
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self { max_per_window, window, counters: Mutex::new(HashMap::new()) }
    }

    /// Check and consume one unit of budget for `addr`.
    pub fn check(&self, addr: IpAddr) -> RateDecision {
        let mut counters = self.counters.lock().expect("rate limiter lock poisoned");
        let now = Instant::now();
        let entry = counters.entry(addr).or_insert_with(|| WindowCounter { window_start: now, count: 0 });

        if now.duration_since(entry.window_start) >= self.window {
            entry.window_start = now;
            entry.count = 0;
        }

        if entry.count >= self.max_per_window {
            return RateDecision::Reject;
        }
        entry.count += 1;
        RateDecision::Allow
    }

    /// Drop counters that haven't been touched for several windows, bounding
    /// memory under an address-enumeration attack.
    pub fn sweep_stale(&self) {
        let mut counters = self.counters.lock().expect("rate limiter lock poisoned");
        let now = Instant::now();
        let window = self.window;
        counters.retain(|_, c| now.duration_since(c.window_start) < window * 4);
    }
}

/// Always-allow limiter, used when rate limiting is disabled (e.g. in tests
/// or trusted loopback deployments).
pub struct NoOpRateLimiter;

impl NoOpRateLimiter {
    /// Always returns `Allow`.
    pub fn check(&self, _addr: IpAddr) -> RateDecision {
        RateDecision::Allow
    }
}

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

/// Post-auth token-bucket limiter keyed by `(peer, envelope type)`.
pub struct TokenBucketLimiter {
    capacity: f64,
    refill_per_sec: f64,
    buckets: Mutex<HashMap<(PeerId, String), TokenBucket>>,
}

impl TokenBucketLimiter {
    /// New limiter with the given bucket capacity and refill rate (tokens/sec).
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self { capacity, refill_per_sec, buckets: Mutex::new(HashMap::new()) }
    }

    /// Consume one token for `(peer, envelope_type)`.
    pub fn check(&self, peer: PeerId, envelope_type: &str) -> RateDecision {
        let mut buckets = self.buckets.lock().expect("token bucket lock poisoned");
        let now = Instant::now();
        let key = (peer, envelope_type.to_string());
        let bucket = buckets
            .entry(key)
            .or_insert_with(|| TokenBucket { tokens: self.capacity, last_refill: now });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens < 1.0 {
            return RateDecision::Reject;
        }
        bucket.tokens -= 1.0;
        RateDecision::Allow
    }

    /// Drop buckets untouched long enough to have fully refilled, bounding
    /// memory for peers that stop sending a given envelope type.
    pub fn sweep_stale(&self, idle_after: Duration) {
        let mut buckets = self.buckets.lock().expect("token bucket lock poisoned");
        let now = Instant::now();
        buckets.retain(|_, b| now.duration_since(b.last_refill) < idle_after);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn pid(b: u8) -> PeerId {
        PeerId([b; 20])
    }

    #[test]
    fn sliding_window_rejects_once_exhausted() {
        let limiter = SlidingWindowRateLimiter::new(3, Duration::from_secs(60));
        let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(limiter.check(addr), RateDecision::Allow);
        assert_eq!(limiter.check(addr), RateDecision::Allow);
        assert_eq!(limiter.check(addr), RateDecision::Allow);
        assert_eq!(limiter.check(addr), RateDecision::Reject);
    }

    #[test]
    fn sliding_window_resets_after_elapsed_window() {
        let limiter = SlidingWindowRateLimiter::new(1, Duration::from_millis(5));
        let addr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(limiter.check(addr), RateDecision::Allow);
        assert_eq!(limiter.check(addr), RateDecision::Reject);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(limiter.check(addr), RateDecision::Allow);
    }

    #[test]
    fn distinct_addresses_have_independent_budgets() {
        let limiter = SlidingWindowRateLimiter::new(1, Duration::from_secs(60));
        let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3));
        let b = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 4));
        assert_eq!(limiter.check(a), RateDecision::Allow);
        assert_eq!(limiter.check(b), RateDecision::Allow);
    }

    #[test]
    fn token_bucket_refills_over_time() {
        let limiter = TokenBucketLimiter::new(1.0, 1000.0);
        assert_eq!(limiter.check(pid(1), "ping"), RateDecision::Allow);
        assert_eq!(limiter.check(pid(1), "ping"), RateDecision::Reject);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(limiter.check(pid(1), "ping"), RateDecision::Allow);
    }

    #[test]
    fn token_bucket_is_independent_per_envelope_type() {
        let limiter = TokenBucketLimiter::new(1.0, 0.001);
        assert_eq!(limiter.check(pid(2), "ping"), RateDecision::Allow);
        assert_eq!(limiter.check(pid(2), "probe"), RateDecision::Allow);
    }
}
