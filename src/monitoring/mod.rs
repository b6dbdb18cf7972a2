#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Observability: Prometheus metrics for the overlay's security layers.

/// Metrics registry and counters.
pub mod metrics;
