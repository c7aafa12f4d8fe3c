// Copyright (c) 2024 Botho Foundation

//! The device's long-lived periodic tasks.
//!
//! Each routine is an independent tokio task guarded by its feature
//! flag; a routine whose feature is off returns immediately. All of
//! them watch the shutdown flag at every sleep or receive boundary.

use crate::device::Device;
use crate::messages::{encode_body, MessageKind, QueryPeerMsg, RegisterMsg};
use crate::registry::NEVER_TRIED;
use crate::transport::TRANSPORT_OFFSET;
use ethermesh_common::NodeId;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

impl Device {
    /// Spawn every periodic routine. The returned handles complete when
    /// shutdown is signalled.
    pub fn spawn_routines(&self) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(self.self_arc().routine_register()),
            tokio::spawn(self.self_arc().routine_send_ping()),
            tokio::spawn(self.self_arc().routine_recalculate_nh()),
            tokio::spawn(self.self_arc().routine_spread_neighbors()),
            tokio::spawn(self.self_arc().routine_reset_conns()),
            tokio::spawn(self.self_arc().routine_clear_fib()),
            tokio::spawn(self.self_arc().routine_set_endpoint()),
        ]
    }

    /// Sleep for `interval`, returning `false` when shutdown arrived
    /// instead.
    async fn sleep_or_shutdown(&self, interval: Duration) -> bool {
        let mut shutdown = self.events.shutdown_watch();
        if *shutdown.borrow() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => true,
            _ = shutdown.changed() => !*shutdown.borrow(),
        }
    }

    /// Re-register with the super-nodes on every ping interval, once
    /// the first registration has been acknowledged.
    pub(crate) async fn routine_register(self: Arc<Self>) {
        if !self.config.use_super_node {
            return;
        }
        let Some(mut ok_rx) = self.events.take_supernode_ok_rx() else {
            return;
        };
        let mut shutdown = self.events.shutdown_watch();
        tokio::select! {
            signal = ok_rx.recv() => {
                if signal.is_none() {
                    return;
                }
            }
            _ = shutdown.changed() => return,
        }

        loop {
            let (v4, v6) = self.registry.local_addrs();
            let msg = RegisterMsg {
                node_id: self.id,
                version: self.config.version.clone(),
                peer_state_hash: self.registry.peer_state(),
                nh_state_hash: self.graph.nh_hash(),
                local_v4: SocketAddr::new(
                    v4.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
                    self.config.listen_port,
                ),
                local_v6: SocketAddr::new(
                    v6.unwrap_or(IpAddr::V6(Ipv6Addr::UNSPECIFIED)),
                    self.config.listen_port,
                ),
            };
            match encode_body(&msg) {
                Ok(body) => {
                    let packet = self.frame_control(NodeId::SUPER, 0, &body);
                    self.send_to_super(MessageKind::Register, &packet, TRANSPORT_OFFSET);
                }
                Err(err) => warn!(?err, "could not build registration"),
            }
            if !self.sleep_or_shutdown(self.config.send_ping_interval()).await {
                return;
            }
        }
    }

    /// Probe every peer on a fixed cadence.
    pub(crate) async fn routine_send_ping(self: Arc<Self>) {
        if !(self.config.use_p2p || self.config.use_super_node) {
            return;
        }
        loop {
            match self.generate_ping_packet(0) {
                Ok(packet) => {
                    self.spread(&HashSet::new(), MessageKind::Ping, &packet, TRANSPORT_OFFSET)
                }
                Err(err) => warn!(?err, "could not build ping"),
            }
            if !self.sleep_or_shutdown(self.config.send_ping_interval()).await {
                return;
            }
        }
    }

    /// Keep the next-hop table current.
    ///
    /// A super-node recomputes unconditionally and tells its service
    /// when the table changed; a P2P member recomputes only once the
    /// table it holds expires.
    pub(crate) async fn routine_recalculate_nh(self: Arc<Self>) {
        if self.config.timeout_check_interval_secs == 0 {
            return;
        }
        if self.is_super_node {
            loop {
                if self.graph.recompute_next_hop(true) {
                    self.events.notify_nh_changed();
                }
                if !self
                    .sleep_or_shutdown(self.config.timeout_check_interval())
                    .await
                {
                    return;
                }
            }
        } else {
            if !self.config.use_p2p {
                return;
            }
            loop {
                if self.graph.nh_expired(self.graph.current_time()) {
                    self.graph.recompute_next_hop(false);
                }
                if !self
                    .sleep_or_shutdown(self.config.timeout_check_interval())
                    .await
                {
                    return;
                }
            }
        }
    }

    /// Periodically re-announce every known neighbor to everyone.
    pub(crate) async fn routine_spread_neighbors(self: Arc<Self>) {
        if !self.config.use_p2p {
            return;
        }
        loop {
            let query = QueryPeerMsg {
                request_id: u32::from(NodeId::BROADCAST),
            };
            if let Err(err) = self.handle_query_peer(query) {
                warn!(?err, "neighbor re-announcement failed");
            }
            if !self.sleep_or_shutdown(self.config.send_peer_interval()).await {
                return;
            }
        }
    }

    /// Re-bind statically configured endpoints so renumbered hosts come
    /// back without a restart.
    pub(crate) async fn routine_reset_conns(self: Arc<Self>) {
        if self.config.reset_conn_interval_secs == 0 {
            return;
        }
        loop {
            for peer in self.registry.snapshot_peers() {
                if !peer.is_static {
                    continue;
                }
                let Some(url) = peer.conn_url.clone() else {
                    continue;
                };
                match self.tunnel.set_endpoint_from_conn_url(
                    &peer,
                    &url,
                    peer.preferred_af,
                    peer.is_static,
                ) {
                    Ok(endpoint) => peer.set_endpoint(endpoint),
                    Err(err) => {
                        warn!(peer = %peer.id, %url, ?err, "static endpoint re-bind failed");
                    }
                }
            }
            if !self.sleep_or_shutdown(self.config.reset_conn_interval()).await {
                return;
            }
        }
    }

    /// Age out stale layer-2 forwarding entries.
    pub(crate) async fn routine_clear_fib(self: Arc<Self>) {
        if self.config.fib_timeout_secs == 0 {
            return;
        }
        loop {
            self.fib
                .sweep(self.config.fib_timeout(), self.graph.current_time());
            if !self.sleep_or_shutdown(self.config.fib_timeout()).await {
                return;
            }
        }
    }

    /// One pass of the endpoint driver over every dead peer.
    ///
    /// Walks each dead peer's try-list oldest-attempt-first: stale tried
    /// entries are evicted, bind failures are evicted, and the first
    /// successful bind is stamped and probed. Returns whether any bind
    /// succeeded and a follow-up pass should run.
    pub fn try_endpoints_once(&self) -> bool {
        let now = self.graph.current_time();
        let mut next_run = false;

        for peer in self.registry.snapshot_peers() {
            if peer.is_alive(self.config.peer_alive_timeout(), now) {
                continue;
            }
            peer.with_try_list(|list| list.sort_by(|a, b| a.cmp(b)));
            let urls = peer.with_try_list(|list| list.keys());
            for url in urls {
                let Some(stamp) = peer.with_try_list(|list| list.get(&url)) else {
                    continue;
                };
                let tried_and_dead = stamp != NEVER_TRIED
                    && now
                        .duration_since(stamp)
                        .map_or(false, |age| age > self.config.conn_timeout());
                if tried_and_dead {
                    // The bind went through earlier but the peer never
                    // answered; the endpoint is unreachable.
                    peer.with_try_list(|list| list.remove(&url));
                    continue;
                }

                debug!(peer = %peer.id, %url, "trying endpoint");
                match self.tunnel.set_endpoint_from_conn_url(
                    &peer,
                    &url,
                    peer.preferred_af,
                    peer.is_static,
                ) {
                    Ok(endpoint) => {
                        peer.set_endpoint(endpoint);
                        peer.with_try_list(|list| list.set(&url, now));
                        let device = self.self_arc();
                        let target = Arc::clone(&peer);
                        let times = self.config.conn_next_try_secs as u32 + 1;
                        tokio::spawn(async move {
                            device
                                .send_pings(target, times, 1, Duration::from_secs(1))
                                .await;
                        });
                        next_run = true;
                        break;
                    }
                    Err(err) => {
                        warn!(peer = %peer.id, %url, ?err, "endpoint bind failed");
                        peer.with_try_list(|list| list.remove(&url));
                    }
                }
            }
        }
        next_run
    }

    /// The endpoint driver: waits for a wake-up, runs a pass, coalesces
    /// queued wake-ups, and re-arms itself while binds keep succeeding.
    pub(crate) async fn routine_set_endpoint(self: Arc<Self>) {
        if !(self.config.use_p2p || self.config.use_super_node) {
            return;
        }
        let Some(mut rx) = self.events.take_try_endpoint_rx() else {
            return;
        };
        let mut shutdown = self.events.shutdown_watch();

        loop {
            tokio::select! {
                signal = rx.recv() => {
                    if signal.is_none() {
                        return;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                    continue;
                }
            }

            let next_run = self.try_endpoints_once();

            // Coalesce wake-ups that piled up during the pass.
            while rx.try_recv().is_ok() {}

            if !self.sleep_or_shutdown(self.config.conn_next_try()).await {
                return;
            }
            if next_run {
                self.events.notify_try_endpoint();
            }
        }
    }
}
