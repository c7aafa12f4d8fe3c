// Copyright (c) 2024 Botho Foundation

//! Configuration for an overlay device.
//!
//! The configuration is frozen at construction; the control plane never
//! mutates it. Command-line and file plumbing live outside this crate.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Frozen configuration of an overlay device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Software version string, checked at registration.
    pub version: String,

    /// Whether this node registers with and takes state from super-nodes.
    pub use_super_node: bool,

    /// Whether this node exchanges neighbor information peer-to-peer.
    pub use_p2p: bool,

    /// Base URL of the super-node HTTP API, e.g. `http://sn.example:3000/eg_api`.
    pub super_api_base: String,

    /// UDP port this node listens on, advertised at registration.
    pub listen_port: u16,

    /// Seconds between outgoing pings (and between registrations).
    pub send_ping_interval_secs: u64,

    /// Seconds between neighbor re-announcements in P2P mode.
    pub send_peer_interval_secs: u64,

    /// Seconds without a ping after which a peer counts as dead.
    pub peer_alive_timeout_secs: u64,

    /// Seconds after which a tried endpoint with no response is abandoned.
    pub conn_timeout_secs: u64,

    /// Seconds between endpoint try-list passes.
    pub conn_next_try_secs: u64,

    /// Seconds a super-node-provided next-hop table stays fresh.
    pub super_node_info_timeout_secs: u64,

    /// Seconds between next-hop recomputation checks.
    pub timeout_check_interval_secs: u64,

    /// Seconds between re-binds of statically configured endpoints.
    pub reset_conn_interval_secs: u64,

    /// Seconds a layer-2 forwarding entry lives without traffic.
    pub fib_timeout_secs: u64,

    /// TTL stamped on locally originated control packets.
    pub default_ttl: u8,

    /// Capacity of the broadcast deduplication cache.
    pub dedup_capacity: usize,

    /// Number of pre-allocated outbound packet buffers.
    pub max_outbound_buffers: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            use_super_node: false,
            use_p2p: false,
            super_api_base: String::new(),
            listen_port: 3456,
            send_ping_interval_secs: 16,
            send_peer_interval_secs: 20,
            peer_alive_timeout_secs: 30,
            conn_timeout_secs: 30,
            conn_next_try_secs: 29,
            super_node_info_timeout_secs: 50,
            timeout_check_interval_secs: 5,
            reset_conn_interval_secs: 600,
            fib_timeout_secs: 600,
            default_ttl: 200,
            dedup_capacity: 1024,
            max_outbound_buffers: 256,
        }
    }
}

impl DeviceConfig {
    /// Get the ping interval as a Duration.
    pub fn send_ping_interval(&self) -> Duration {
        Duration::from_secs(self.send_ping_interval_secs)
    }

    /// Get the neighbor re-announcement interval as a Duration.
    pub fn send_peer_interval(&self) -> Duration {
        Duration::from_secs(self.send_peer_interval_secs)
    }

    /// Get the peer liveness timeout as a Duration.
    pub fn peer_alive_timeout(&self) -> Duration {
        Duration::from_secs(self.peer_alive_timeout_secs)
    }

    /// Get the endpoint-try timeout as a Duration.
    pub fn conn_timeout(&self) -> Duration {
        Duration::from_secs(self.conn_timeout_secs)
    }

    /// Get the delay between endpoint try-list passes as a Duration.
    pub fn conn_next_try(&self) -> Duration {
        Duration::from_secs(self.conn_next_try_secs)
    }

    /// Get the next-hop freshness window as a Duration.
    pub fn super_node_info_timeout(&self) -> Duration {
        Duration::from_secs(self.super_node_info_timeout_secs)
    }

    /// Get the recomputation check interval as a Duration.
    pub fn timeout_check_interval(&self) -> Duration {
        Duration::from_secs(self.timeout_check_interval_secs)
    }

    /// Get the static re-bind interval as a Duration.
    pub fn reset_conn_interval(&self) -> Duration {
        Duration::from_secs(self.reset_conn_interval_secs)
    }

    /// Get the forwarding-entry lifetime as a Duration.
    pub fn fib_timeout(&self) -> Duration {
        Duration::from_secs(self.fib_timeout_secs)
    }
}

/// Builder for [`DeviceConfig`].
#[derive(Debug, Default)]
pub struct DeviceConfigBuilder {
    config: DeviceConfig,
}

impl DeviceConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the version string.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config.version = version.into();
        self
    }

    /// Enable or disable super-node use.
    pub fn use_super_node(mut self, enable: bool) -> Self {
        self.config.use_super_node = enable;
        self
    }

    /// Enable or disable P2P neighbor exchange.
    pub fn use_p2p(mut self, enable: bool) -> Self {
        self.config.use_p2p = enable;
        self
    }

    /// Set the super-node API base URL.
    pub fn super_api_base(mut self, base: impl Into<String>) -> Self {
        self.config.super_api_base = base.into();
        self
    }

    /// Set the listen port.
    pub fn listen_port(mut self, port: u16) -> Self {
        self.config.listen_port = port;
        self
    }

    /// Set the ping interval in seconds.
    pub fn send_ping_interval_secs(mut self, secs: u64) -> Self {
        self.config.send_ping_interval_secs = secs;
        self
    }

    /// Set the peer liveness timeout in seconds.
    pub fn peer_alive_timeout_secs(mut self, secs: u64) -> Self {
        self.config.peer_alive_timeout_secs = secs;
        self
    }

    /// Set the endpoint-try timeout in seconds.
    pub fn conn_timeout_secs(mut self, secs: u64) -> Self {
        self.config.conn_timeout_secs = secs;
        self
    }

    /// Set the delay between endpoint try-list passes in seconds.
    pub fn conn_next_try_secs(mut self, secs: u64) -> Self {
        self.config.conn_next_try_secs = secs;
        self
    }

    /// Set the next-hop freshness window in seconds.
    pub fn super_node_info_timeout_secs(mut self, secs: u64) -> Self {
        self.config.super_node_info_timeout_secs = secs;
        self
    }

    /// Set the default TTL.
    pub fn default_ttl(mut self, ttl: u8) -> Self {
        self.config.default_ttl = ttl;
        self
    }

    /// Build the config.
    pub fn build(self) -> DeviceConfig {
        self.config
    }
}
