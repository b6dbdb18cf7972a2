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
#![deny(missing_docs)]

//! Error taxonomy for the overlay control plane.
//!
//! One inner enum per kind so call sites can match specifically
//! (`AuthError::Replay`, `PolicyError::Quarantined`, ...), composed into a
//! single [`OverlayError`] for code that just needs to classify-and-log.

use thiserror::Error;

/// Missing or invalid key/certificate path, or a bind refused outside degraded mode.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required path missing or unreadable.
    #[error("missing or invalid path: {0}")]
    Path(String),
    /// Field failed validation.
    #[error("invalid config field: {0}")]
    Field(String),
    /// Bind refused outside of a degraded-mode-tolerant transport.
    #[error("bind refused for a critical listener")]
    BindRefused,
}

/// Socket read/write, TLS/QUIC handshake, or pin mismatch.
#[derive(Debug, Error)]
pub enum TransportError {
    /// I/O failure on a socket or stream.
    #[error("io")]
    Io,
    /// TLS/QUIC handshake failed.
    #[error("handshake failed")]
    Handshake,
    /// Certificate pin did not match the expected SPKI.
    #[error("certificate pin mismatch")]
    PinMismatch,
    /// Listener failed to bind; caller should treat as degraded-mode exit.
    #[error("address in use")]
    AddressInUse,
    /// Send attempt exceeded its deadline.
    #[error("send timed out")]
    Timeout,
}

/// Malformed envelope or size cap exceeded.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Wire bytes did not parse as a `ControlEnvelope`.
    #[error("malformed envelope")]
    Malformed,
    /// Payload or datagram exceeded the effective cap.
    #[error("size limit exceeded")]
    TooLarge,
}

/// Timestamp outside window, replay detected, or signature invalid.
#[derive(Debug, Error)]
pub enum AuthError {
    /// `timestampUnixMs` outside the ±120s window.
    #[error("timestamp outside validity window")]
    Timestamp,
    /// `(peerId, messageId)` already seen within the freshness window.
    #[error("replay detected")]
    Replay,
    /// Signature did not verify under any of the descriptor's signing keys.
    #[error("signature invalid")]
    Signature,
    /// Envelope, descriptor, or peer id was missing where required.
    #[error("missing required field")]
    MissingField,
}

/// Rate-limit denied, peer quarantined, or descriptor absent.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Rejected by a rate limiter (pre-auth or post-auth).
    #[error("rate limited")]
    RateLimited,
    /// Peer is currently quarantined; message rejected without processing.
    #[error("peer quarantined")]
    Quarantined,
    /// No descriptor is available for this peer.
    #[error("descriptor absent")]
    DescriptorAbsent,
    /// Dispatcher has no handler registered for this envelope type.
    #[error("unknown envelope type")]
    UnknownType,
}

/// Dispatch or downstream handler failed.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The registered handler returned an error.
    #[error("handler failed: {0}")]
    Failed(String),
    /// The handler did not complete within the processing deadline.
    #[error("handler timed out")]
    Timeout,
}

/// Key store / reputation store / TOFU store I/O failure.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Generic I/O failure.
    #[error("io")]
    Io,
    /// Stored bytes failed to parse or decrypt.
    #[error("corrupt or undecryptable record")]
    Corrupt,
}

/// Top-level classification used where a single error type is convenient
/// (metrics tagging, listener-loop recovery). Listener loops recover from
/// every variant except `Config` silently: they emit a metric and a
/// debug/warn log and keep running.
#[derive(Debug, Error)]
pub enum OverlayError {
    /// See [`ConfigError`]. Fatal at startup for critical identity paths.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// See [`TransportError`].
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// See [`DecodeError`].
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// See [`AuthError`].
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// See [`PolicyError`].
    #[error(transparent)]
    Policy(#[from] PolicyError),
    /// See [`HandlerError`].
    #[error(transparent)]
    Handler(#[from] HandlerError),
    /// See [`StorageError`]. Non-fatal on non-critical paths (e.g. reputation persistence).
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl OverlayError {
    /// Stable short tag for log lines and metric labels, matching the
    /// bracketed-prefix convention of §7 (`[Overlay-UDP]`, `[ControlEnvelopeValidator]`, ...).
    pub fn kind_tag(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Transport(_) => "transport",
            Self::Decode(_) => "decode",
            Self::Auth(_) => "auth",
            Self::Policy(_) => "policy",
            Self::Handler(_) => "handler",
            Self::Storage(_) => "storage",
        }
    }

    /// Whether a listener loop may keep running after this error.
    pub fn is_recoverable_in_listener(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}
