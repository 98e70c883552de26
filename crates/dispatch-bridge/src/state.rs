//! Shared application state for the bridge.
//!
//! [`AppState`] is wrapped in an [`Arc`] and injected into every handler
//! and connection task. It owns nothing that is mutated on the tick path:
//! the authority publishes into the [`Hub`], and observers only read from
//! it or forward commands through the [`UpstreamSlot`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dispatch_core::SimulationConfig;
use dispatch_proto::StalePolicy;

use crate::hub::Hub;
use crate::upstream::UpstreamSlot;

/// Per-connection limits shared by both observer transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Close an observer after this long without inbound traffic.
    pub idle_timeout: Option<Duration>,
    /// Longest accepted inbound frame in bytes.
    pub max_frame_bytes: usize,
}

impl SessionSettings {
    /// Limits taken from the `bridge` configuration section.
    pub fn from_config(config: &SimulationConfig) -> Self {
        let idle = config.bridge.idle_timeout_s;
        Self {
            idle_timeout: (idle > 0).then(|| Duration::from_secs(idle)),
            max_frame_bytes: config.bridge.max_frame_bytes,
        }
    }
}

/// Shared state for the Axum application and the TCP listener.
#[derive(Debug)]
pub struct AppState {
    /// Broadcast hub and bridge mirror.
    pub hub: Arc<Hub>,
    /// The active upstream authority.
    pub upstream: Arc<UpstreamSlot>,
    /// Observer connection limits.
    pub session: SessionSettings,
    next_connection: AtomicU64,
}

impl AppState {
    /// Build the hub and an empty upstream slot from `config`.
    pub fn new(config: &SimulationConfig) -> Self {
        let policy = if config.bridge.ignore_stale_snapshots {
            StalePolicy::IgnoreOlder
        } else {
            StalePolicy::Overwrite
        };
        let hub = Arc::new(Hub::with_policy(
            config.bridge.broadcast_capacity,
            config.bridge.history_capacity,
            policy,
        ));
        Self {
            upstream: Arc::new(UpstreamSlot::new(Arc::clone(&hub), config.clone())),
            hub,
            session: SessionSettings::from_config(config),
            next_connection: AtomicU64::new(1),
        }
    }

    /// A fresh connection label such as `ws-3`.
    pub fn next_origin(&self, transport: &str) -> String {
        let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
        format!("{transport}-{id}")
    }
}
