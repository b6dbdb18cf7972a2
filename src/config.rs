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

//! Overlay node configuration, loaded from TOML.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

fn default_udp_listen_addr() -> String {
    "0.0.0.0:7070".to_string()
}
fn default_quic_listen_addr() -> String {
    "0.0.0.0:7071".to_string()
}
fn default_max_payload_bytes() -> usize {
    1024 * 1024
}
fn default_max_datagram_bytes() -> usize {
    8 * 1024
}
fn default_max_data_stream_bytes() -> usize {
    512 * 1024
}
fn default_replay_window_secs() -> u64 {
    300
}
fn default_timestamp_skew_secs() -> u64 {
    120
}
fn default_key_rotate_days() -> u64 {
    90
}
fn default_reputation_half_life_secs() -> u64 {
    7 * 24 * 3600
}
fn default_reputation_ban_threshold() -> i32 {
    -10
}
fn default_max_descriptors_per_lookup() -> usize {
    16
}
fn default_quarantine_cooldown_secs() -> u64 {
    600
}

/// Overlay control-plane configuration (`[overlay]` table of the node config).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OverlayConfig {
    /// Directory holding the identity key, TOFU store, and reputation database.
    pub data_dir: String,
    /// UDP control listener bind address.
    #[serde(default = "default_udp_listen_addr")]
    pub udp_listen_addr: String,
    /// QUIC control/data listener bind address.
    #[serde(default = "default_quic_listen_addr")]
    pub quic_listen_addr: String,
    /// Mesh-level effective payload cap (§9: validator authority).
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: usize,
    /// Per-transport UDP datagram cap.
    #[serde(default = "default_max_datagram_bytes")]
    pub max_datagram_bytes: usize,
    /// Per-transport QUIC data-stream cap.
    #[serde(default = "default_max_data_stream_bytes")]
    pub max_data_stream_bytes: usize,
    /// ReplayCache freshness window, in seconds.
    #[serde(default = "default_replay_window_secs")]
    pub replay_window_secs: u64,
    /// Accepted clock skew for `timestampUnixMs`, in seconds.
    #[serde(default = "default_timestamp_skew_secs")]
    pub timestamp_skew_secs: u64,
    /// KeyStore rotation age threshold, in days.
    #[serde(default = "default_key_rotate_days")]
    pub key_rotate_days: u64,
    /// PeerReputation score half-life, in seconds.
    #[serde(default = "default_reputation_half_life_secs")]
    pub reputation_half_life_secs: u64,
    /// Score at or below which a peer is quarantined.
    #[serde(default = "default_reputation_ban_threshold")]
    pub reputation_ban_threshold: i32,
    /// Max descriptors returned per `ServiceDirectory::find_by_name` call.
    #[serde(default = "default_max_descriptors_per_lookup")]
    pub max_descriptors_per_lookup: usize,
    /// Quarantine cooldown, in seconds, before a peer may be re-evaluated.
    #[serde(default = "default_quarantine_cooldown_secs")]
    pub quarantine_cooldown_secs: u64,
    /// Whether the QUIC listener persists its certificate (5-year validity)
    /// rather than regenerating an ephemeral one at each startup.
    #[serde(default)]
    pub persist_quic_cert: bool,
}

impl OverlayConfig {
    /// Validate cross-field invariants not expressible via `serde` defaults.
    ///
    /// The listener applies `min(max_payload_bytes, per_transport_cap)`
    /// before deserializing (§9 resolution); this only rejects configs where
    /// that computation would be meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_dir.trim().is_empty() {
            return Err(ConfigError::Field("overlay.data_dir must not be empty".into()));
        }
        if self.max_payload_bytes == 0 {
            return Err(ConfigError::Field("overlay.max_payload_bytes must be > 0".into()));
        }
        if self.max_datagram_bytes == 0 || self.max_data_stream_bytes == 0 {
            return Err(ConfigError::Field("per-transport caps must be > 0".into()));
        }
        if self.replay_window_secs == 0 {
            return Err(ConfigError::Field("overlay.replay_window_secs must be > 0".into()));
        }
        Ok(())
    }

    /// Effective cap applied by the UDP listener: `min(mesh cap, datagram cap)`.
    pub fn effective_udp_cap(&self) -> usize {
        self.max_payload_bytes.min(self.max_datagram_bytes)
    }

    /// Effective cap applied by the QUIC listener: `min(mesh cap, stream cap)`.
    pub fn effective_quic_cap(&self) -> usize {
        self.max_payload_bytes.min(self.max_data_stream_bytes)
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data/overlay".to_string(),
            udp_listen_addr: default_udp_listen_addr(),
            quic_listen_addr: default_quic_listen_addr(),
            max_payload_bytes: default_max_payload_bytes(),
            max_datagram_bytes: default_max_datagram_bytes(),
            max_data_stream_bytes: default_max_data_stream_bytes(),
            replay_window_secs: default_replay_window_secs(),
            timestamp_skew_secs: default_timestamp_skew_secs(),
            key_rotate_days: default_key_rotate_days(),
            reputation_half_life_secs: default_reputation_half_life_secs(),
            reputation_ban_threshold: default_reputation_ban_threshold(),
            max_descriptors_per_lookup: default_max_descriptors_per_lookup(),
            quarantine_cooldown_secs: default_quarantine_cooldown_secs(),
            persist_quic_cert: false,
        }
    }
}

/// Load an `OverlayConfig` from a TOML file at `path`, under an `[overlay]` table.
pub fn load_overlay_config(path: &str) -> Result<OverlayConfig, ConfigError> {
    #[derive(Deserialize)]
    struct Root {
        overlay: OverlayConfig,
    }
    let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::Path(path.to_string()))?;
    let root: Root = toml::from_str(&raw).map_err(|e| ConfigError::Field(e.to_string()))?;
    root.overlay.validate()?;
    Ok(root.overlay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = OverlayConfig {
            data_dir: "./data".to_string(),
            ..OverlayConfig::default()
        };
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.effective_udp_cap(), default_max_datagram_bytes());
    }

    #[test]
    fn empty_data_dir_rejected() {
        let cfg = OverlayConfig { data_dir: String::new(), ..OverlayConfig::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn effective_cap_takes_stricter_bound() {
        let mut cfg = OverlayConfig { data_dir: "./data".to_string(), ..OverlayConfig::default() };
        cfg.max_payload_bytes = 4096;
        cfg.max_datagram_bytes = 8192;
        assert_eq!(cfg.effective_udp_cap(), 4096);
    }
}
