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

//! Secure overlay control plane for a peer-to-peer mesh network.
//!
//! This crate provides:
//! - Ed25519 envelope authentication with canonical and legacy signing forms
//! - Bounded, sharded replay defense and multi-tier rate limiting
//! - Peer reputation with exponential half-life decay and quarantine
//! - TLS certificate pinning, TOFU and descriptor-based
//! - DHT-backed peer and service descriptor lookup with abuse detection
//! - UDP and QUIC overlay listeners with a degraded-bind contract
//! - Monitoring via Prometheus metrics and structured JSON logging

/// Configuration loading and validation.
pub mod config;
/// Core protocol primitives: wire types, canonical codec, and security.
pub mod core;
/// Top-level error taxonomy.
pub mod error;
/// Observability (Prometheus metrics).
pub mod monitoring;
/// Overlay transport, validation, and abuse-handling stack.
pub mod networking;
