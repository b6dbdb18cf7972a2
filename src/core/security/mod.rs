#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Identity, signing, replay defense, and certificate pinning.

/// Ed25519 identity key-pair storage, rotation, and encrypted-at-rest persistence.
pub mod keystore;
/// Certificate pin cache (TOFU + descriptor-priority).
pub mod pin_cache;
/// Bounded time-windowed replay cache.
pub mod replay;
/// Canonical and legacy signing byte forms, and the `Signer`.
pub mod signing;
