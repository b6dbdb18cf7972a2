#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Overlay node entrypoint (systemd-friendly).
//!
//! Loads configuration, opens the identity keystore, wires the shared
//! security/validation stack, and runs the UDP (and, if enabled, QUIC)
//! listeners until shutdown.

use std::{sync::Arc, time::Duration};

use tokio::signal;
use tracing::{info, warn};

use overlay_mesh::{
    config::{load_overlay_config, OverlayConfig},
    core::security::{keystore::KeyStore, pin_cache::CertificatePinCache, replay::ReplayCache},
    monitoring::metrics::Metrics,
    networking::{
        descriptor::DescriptorCache,
        dispatcher::ControlDispatcher,
        listener_udp::{run_udp_listener, EndpointRegistry, ListenerDeps},
        rate_limit::SlidingWindowRateLimiter,
        reputation::{PeerReputation, ReputationParams},
    },
};

fn env(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn load_config() -> OverlayConfig {
    let path = env("OVERLAY_CONFIG", "overlay.toml");
    match load_overlay_config(&path) {
        Ok(cfg) => cfg,
        Err(err) => {
            warn!(%path, %err, "no usable config file, falling back to defaults");
            OverlayConfig::default()
        }
    }
}

#[tokio::main]
async fn main() {
    let _ = tracing_subscriber::fmt().with_target(true).with_level(true).json().try_init();

    let config = load_config();
    if let Err(err) = config.validate() {
        eprintln!("invalid configuration: {err}");
        std::process::exit(1);
    }

    std::fs::create_dir_all(&config.data_dir).expect("failed to create data_dir");

    let keystore = KeyStore::open(&config.data_dir, Duration::from_secs(config.key_rotate_days * 86_400))
        .expect("failed to open identity keystore");
    info!(public_key = %hex::encode(keystore.public_key()), "identity loaded");

    let metrics = Arc::new(Metrics::new().expect("metrics init failed"));
    let pins = Arc::new(CertificatePinCache::open(&config.data_dir).expect("failed to open pin cache"));

    let reputation_params = ReputationParams {
        half_life: Duration::from_secs(config.reputation_half_life_secs),
        ban_threshold: config.reputation_ban_threshold,
        quarantine_cooldown: Duration::from_secs(config.quarantine_cooldown_secs),
        ..ReputationParams::default()
    };

    let deps = Arc::new(ListenerDeps {
        pre_auth_rate_limiter: SlidingWindowRateLimiter::new(200, Duration::from_secs(10)),
        endpoints: EndpointRegistry::new(),
        descriptors: DescriptorCache::new(Duration::from_secs(3600)),
        replay: ReplayCache::new(Duration::from_secs(config.replay_window_secs)),
        reputation: PeerReputation::new(reputation_params),
        dispatcher: ControlDispatcher::new(),
        max_payload_bytes: config.effective_udp_cap(),
        max_datagram_bytes: config.max_datagram_bytes,
        timestamp_skew_secs: config.timestamp_skew_secs,
    });

    spawn_background_sweepers(deps.clone());

    let udp_addr = config.udp_listen_addr.parse().expect("invalid udp_listen_addr");
    let udp_task = tokio::spawn(run_udp_listener(udp_addr, deps.clone()));

    #[cfg(feature = "quic")]
    let quic_task = {
        let quic_addr = config.quic_listen_addr.parse().expect("invalid quic_listen_addr");
        let data_dir = config.data_dir.clone();
        let persist = config.persist_quic_cert;
        let deps = deps.clone();
        let pins = pins.clone();
        tokio::spawn(async move {
            overlay_mesh::networking::listener_quic::run_quic_listener(quic_addr, &data_dir, persist, deps, pins).await;
        })
    };

    info!("overlay node running");
    let _ = signal::ctrl_c().await;
    info!("shutdown signal received");

    udp_task.abort();
    #[cfg(feature = "quic")]
    quic_task.abort();

    let _ = &metrics;
    let _ = &pins;
}

fn spawn_background_sweepers(deps: Arc<ListenerDeps>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            ticker.tick().await;
            deps.replay.sweep_expired();
            deps.descriptors.sweep_expired();
            deps.reputation.decay_and_cleanup();
        }
    });
}
