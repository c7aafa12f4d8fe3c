// Copyright (c) 2024 Botho Foundation

//! The overlay device: the explicit owner of all control-plane state.
//!
//! A process runs exactly one device, but nothing here is ambient:
//! the device is constructed with its frozen configuration, identity
//! and tunnel, and passed by `Arc` to whoever needs it.

use crate::config::DeviceConfig;
use crate::dedup::DupFilter;
use crate::error::{Error, Result};
use crate::events::EventBus;
use crate::fib::L2Fib;
use crate::graph::RoutingGraph;
use crate::registry::PeerRegistry;
use crate::transport::{BufferPool, Tunnel};
use ethermesh_common::{NodeId, PublicKey};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::info;

/// Timeout applied to every super-node state fetch.
pub const HTTP_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// One overlay node's control plane.
pub struct Device {
    /// Frozen configuration.
    pub config: DeviceConfig,
    /// This node's id.
    pub id: NodeId,
    /// This node's static public key.
    pub public_key: PublicKey,
    /// Whether this node is a registry and routing oracle.
    pub is_super_node: bool,
    /// Known peers (C1).
    pub registry: PeerRegistry,
    /// Latency graph and next-hop table (C2).
    pub graph: RoutingGraph,
    /// Broadcast dedup filter (C3).
    pub dedup: DupFilter,
    /// Layer-2 forwarding base.
    pub fib: L2Fib,
    /// Signal channels (C8).
    pub events: EventBus,
    /// Outbound packet buffers.
    pub pool: BufferPool,
    pub(crate) tunnel: Arc<dyn Tunnel>,
    pub(crate) http: reqwest::Client,
    // Handle on our own Arc, for handing clones to spawned tasks.
    self_ref: Weak<Device>,
}

impl Device {
    /// Construct a device around its tunnel.
    pub fn new(
        config: DeviceConfig,
        id: NodeId,
        public_key: PublicKey,
        is_super_node: bool,
        tunnel: Arc<dyn Tunnel>,
    ) -> Result<Arc<Self>> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_FETCH_TIMEOUT)
            .build()
            .map_err(Error::from)?;

        let device = Arc::new_cyclic(|self_ref| Self {
            graph: RoutingGraph::new(config.super_node_info_timeout()),
            dedup: DupFilter::new(config.dedup_capacity),
            fib: L2Fib::new(),
            events: EventBus::new(is_super_node),
            pool: BufferPool::new(config.max_outbound_buffers),
            registry: PeerRegistry::new(),
            config,
            id,
            public_key,
            is_super_node,
            tunnel,
            http,
            self_ref: self_ref.clone(),
        });
        info!(node = %device.id, is_super_node, "device created");
        Ok(device)
    }

    /// A strong handle on this device, for spawned tasks.
    pub(crate) fn self_arc(&self) -> Arc<Device> {
        self.self_ref.upgrade().expect("device outlives its tasks")
    }

    /// Flip the shutdown flag; every routine terminates at its next
    /// sleep or receive boundary.
    pub fn shutdown(&self) {
        info!(node = %self.id, "shutting down");
        self.events.signal_shutdown();
    }
}
