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

//! Prometheus metrics for the overlay's security and abuse-handling layers.

use prometheus::{IntCounter, IntGauge, Registry};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus")]
    Prom,
}

/// Metrics container.
#[derive(Clone)]
pub struct Metrics {
    /// Registry.
    pub registry: Registry,

    /// Currently connected peers gauge.
    pub peers_connected: IntGauge,

    /// Dropped replay messages.
    pub replay_dropped_total: IntCounter,
    /// Invalid decoded messages.
    pub invalid_msg_total: IntCounter,
    /// Rate-limited messages.
    pub rate_limited_total: IntCounter,
    /// Reputation-based throttled messages.
    pub reputation_throttled_total: IntCounter,
    /// Banned peer events.
    pub banned_total: IntCounter,
    /// Certificate pin mismatches (dropped connections).
    pub pin_mismatch_total: IntCounter,
    /// Quarantine transitions.
    pub quarantine_total: IntCounter,
    /// ServiceDirectory abuse flags raised (enumeration/rapid-fire/scanning).
    pub abuse_flag_total: IntCounter,
}

impl Metrics {
    /// Create and register metrics.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let peers_connected = IntGauge::new("overlay_peers_connected", "Currently connected peers")
            .map_err(|_| MetricsError::Prom)?;

        let replay_dropped_total =
            IntCounter::new("overlay_replay_dropped_total", "Dropped replay messages").map_err(|_| MetricsError::Prom)?;
        let invalid_msg_total =
            IntCounter::new("overlay_invalid_msg_total", "Invalid decoded messages").map_err(|_| MetricsError::Prom)?;
        let rate_limited_total =
            IntCounter::new("overlay_rate_limited_total", "Rate-limited messages").map_err(|_| MetricsError::Prom)?;
        let reputation_throttled_total = IntCounter::new(
            "overlay_reputation_throttled_total",
            "Reputation-based throttled messages",
        )
        .map_err(|_| MetricsError::Prom)?;
        let banned_total =
            IntCounter::new("overlay_banned_total", "Banned peer events").map_err(|_| MetricsError::Prom)?;
        let pin_mismatch_total =
            IntCounter::new("overlay_pin_mismatch_total", "Certificate pin mismatches").map_err(|_| MetricsError::Prom)?;
        let quarantine_total =
            IntCounter::new("overlay_quarantine_total", "Quarantine transitions").map_err(|_| MetricsError::Prom)?;
        let abuse_flag_total =
            IntCounter::new("overlay_abuse_flag_total", "ServiceDirectory abuse flags raised").map_err(|_| MetricsError::Prom)?;

        registry.register(Box::new(peers_connected.clone())).map_err(|_| MetricsError::Prom)?;
        registry.register(Box::new(replay_dropped_total.clone())).map_err(|_| MetricsError::Prom)?;
        registry.register(Box::new(invalid_msg_total.clone())).map_err(|_| MetricsError::Prom)?;
        registry.register(Box::new(rate_limited_total.clone())).map_err(|_| MetricsError::Prom)?;
        registry.register(Box::new(reputation_throttled_total.clone())).map_err(|_| MetricsError::Prom)?;
        registry.register(Box::new(banned_total.clone())).map_err(|_| MetricsError::Prom)?;
        registry.register(Box::new(pin_mismatch_total.clone())).map_err(|_| MetricsError::Prom)?;
        registry.register(Box::new(quarantine_total.clone())).map_err(|_| MetricsError::Prom)?;
        registry.register(Box::new(abuse_flag_total.clone())).map_err(|_| MetricsError::Prom)?;

        Ok(Self {
            registry,
            peers_connected,
            replay_dropped_total,
            invalid_msg_total,
            rate_limited_total,
            reputation_throttled_total,
            banned_total,
            pin_mismatch_total,
            quarantine_total,
            abuse_flag_total,
        })
    }
}
