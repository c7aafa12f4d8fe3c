// Copyright (c) 2024 Botho Foundation

//! Per-kind control message handlers.
//!
//! Dispatch splits by role: a super-node accepts only registrations and
//! pongs, a member accepts the other six kinds. Handlers that fetch
//! state over HTTP run on their own task so the receive path never
//! blocks; everything else executes inline. A body that fails to decode
//! is dropped silently, so one peer's garbage cannot stall the loop.

use crate::device::Device;
use crate::error::{Error, Result};
use crate::graph::{NextHopTable, INFINITY};
use crate::messages::{
    decode_body, encode_body, BroadcastPeerMsg, ErrorAction, MessageKind, PingMsg, PongMsg,
    QueryPeerMsg, RegisterMsg, UpdateErrorMsg, UpdateNhTableMsg, UpdatePeerMsg,
};
use crate::registry::{Peer, NEVER_TRIED};
use crate::transport::TRANSPORT_OFFSET;
use ethermesh_common::{NodeId, PresharedKey, PublicKey, StateHash};
use percent_encoding::{percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// One peer entry of the super-node's `/peerinfo` response.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiPeerInfo {
    /// The peer's node id.
    #[serde(rename = "NodeID")]
    pub node_id: NodeId,
    /// Base64 pre-shared key, empty when none is set.
    #[serde(rename = "PSKey", default)]
    pub ps_key: String,
    /// Connect URLs the peer was reachable at, as a JSON set.
    #[serde(rename = "Connurl", default)]
    pub conn_urls: HashMap<String, serde_json::Value>,
}

/// The `/peerinfo` response: base64 public key to peer entry.
pub type ApiPeers = HashMap<String, ApiPeerInfo>;

/// Version compatibility: everything from the first `-` is a build
/// suffix and ignored.
pub fn compare_version(ours: &str, theirs: &str) -> bool {
    ours.split('-').next() == theirs.split('-').next()
}

impl Device {
    /// Route a decoded-kind control body to its handler.
    ///
    /// Returns [`Error::InvalidMessageKind`] for kinds the node's role
    /// does not accept. Undecodable bodies are skipped without error.
    pub fn process_control(
        &self,
        peer: &Arc<Peer>,
        kind: MessageKind,
        body: &[u8],
    ) -> Result<()> {
        macro_rules! decoded {
            ($ty:ty, $body:expr, $handle:expr) => {
                match decode_body::<$ty>($body) {
                    Ok(msg) => $handle(msg),
                    Err(err) => {
                        trace!(?err, kind = ?kind, "discarding undecodable control body");
                        Ok(())
                    }
                }
            };
        }

        if self.is_super_node {
            match kind {
                MessageKind::Register => {
                    decoded!(RegisterMsg, body, |msg| self.server_register(peer, msg))
                }
                MessageKind::Pong => {
                    decoded!(PongMsg, body, |msg| self.server_pong(peer, msg))
                }
                other => Err(Error::InvalidMessageKind(other as u8)),
            }
        } else {
            match kind {
                MessageKind::UpdatePeer => decoded!(UpdatePeerMsg, body, |msg| {
                    let device = self.self_arc();
                    let peer = Arc::clone(peer);
                    tokio::spawn(async move {
                        if let Err(err) = device.handle_update_peer(&peer, msg).await {
                            warn!(?err, "peer set update failed");
                        }
                    });
                    Ok(())
                }),
                MessageKind::UpdateNhTable => decoded!(UpdateNhTableMsg, body, |msg| {
                    let device = self.self_arc();
                    let peer = Arc::clone(peer);
                    tokio::spawn(async move {
                        if let Err(err) = device.handle_update_nh_table(&peer, msg).await {
                            warn!(?err, "next-hop table update failed");
                        }
                    });
                    Ok(())
                }),
                MessageKind::UpdateError => {
                    decoded!(UpdateErrorMsg, body, |msg| self.handle_update_error(peer, msg))
                }
                MessageKind::Ping => decoded!(PingMsg, body, |msg| self.handle_ping(peer, msg)),
                MessageKind::Pong => decoded!(PongMsg, body, |msg| self.handle_pong(peer, msg)),
                MessageKind::QueryPeer => {
                    decoded!(QueryPeerMsg, body, |msg| self.handle_query_peer(msg))
                }
                MessageKind::BroadcastPeer => {
                    decoded!(BroadcastPeerMsg, body, |msg| self
                        .handle_broadcast_peer(peer, msg))
                }
                other => Err(Error::InvalidMessageKind(other as u8)),
            }
        }
    }

    /// Super side: validate a registration.
    fn server_register(&self, peer: &Arc<Peer>, msg: RegisterMsg) -> Result<()> {
        let mut reply = UpdateErrorMsg {
            node_id: peer.id,
            action: ErrorAction::NoAction,
            error_code: 0,
            error_msg: String::new(),
        };
        if peer.id != msg.node_id {
            reply = UpdateErrorMsg {
                node_id: peer.id,
                action: ErrorAction::Shutdown,
                error_code: 401,
                error_msg: "Your node ID is not match with our registered nodeID".to_string(),
            };
        }
        if !compare_version(&msg.version, &self.config.version) {
            reply = UpdateErrorMsg {
                node_id: peer.id,
                action: ErrorAction::Shutdown,
                error_code: 400,
                error_msg: format!(
                    "Your version: \"{}\" is not compatible with our version: \"{}\"",
                    msg.version, self.config.version
                ),
            };
        }
        if reply.action != ErrorAction::NoAction {
            let body = encode_body(&reply)?;
            let packet = self.frame_control(peer.id, self.config.default_ttl, &body);
            self.send_to_peer(peer, MessageKind::UpdateError, &packet, TRANSPORT_OFFSET);
            return Ok(());
        }

        peer.update_last_ping(self.graph.current_time());
        self.events.publish_register(msg);
        Ok(())
    }

    /// Super side: note liveness and hand the pong to the oracle.
    fn server_pong(&self, peer: &Arc<Peer>, msg: PongMsg) -> Result<()> {
        peer.update_last_ping(self.graph.current_time());
        self.events.publish_pong(msg);
        Ok(())
    }

    /// Member side: answer a latency probe.
    fn handle_ping(&self, peer: &Arc<Peer>, msg: PingMsg) -> Result<()> {
        let now = self.graph.current_time();
        peer.update_last_ping(now);

        let timediff = now.duration_since(msg.time).unwrap_or_default();
        let pong = PongMsg {
            request_id: 0,
            src_node_id: msg.src_node_id,
            dst_node_id: self.id,
            timediff,
            additional_cost: 0.0,
        };
        if self.config.use_p2p && self.graph.nh_expired(now) {
            self.graph
                .update_latency(msg.src_node_id, self.id, timediff, true, false);
        }

        let body = encode_body(&pong)?;
        if self.config.use_super_node {
            let packet = self.frame_control(NodeId::SUPER, self.config.default_ttl, &body);
            self.send_to_super(MessageKind::Pong, &packet, TRANSPORT_OFFSET);
        }
        if self.config.use_p2p {
            let packet = self.frame_control(NodeId::CONTROL, self.config.default_ttl, &body);
            self.spread(&HashSet::new(), MessageKind::Pong, &packet, TRANSPORT_OFFSET);
        }

        if msg.request_reply > 0 {
            let device = self.self_arc();
            let peer = Arc::clone(peer);
            tokio::spawn(async move {
                device
                    .send_pings(peer, msg.request_reply, 0, Duration::from_secs(3))
                    .await;
            });
        }
        Ok(())
    }

    /// Member side: absorb a latency measurement flooded by a third
    /// node, and ask new peers for their neighbors.
    fn handle_pong(&self, peer: &Arc<Peer>, msg: PongMsg) -> Result<()> {
        if !self.config.use_p2p {
            return Ok(());
        }
        let now = self.graph.current_time();
        if self.graph.nh_expired(now) {
            self.graph
                .update_latency(msg.src_node_id, msg.dst_node_id, msg.timediff, true, false);
        }
        if !peer.asked_for_neighbor() {
            let query = QueryPeerMsg {
                request_id: u32::from(self.id),
            };
            let body = encode_body(&query)?;
            let packet = self.frame_control(peer.id, self.config.default_ttl, &body);
            self.send_to_peer(peer, MessageKind::QueryPeer, &packet, TRANSPORT_OFFSET);
        }
        Ok(())
    }

    /// Member side: advertise every reachable neighbor to everyone.
    pub(crate) fn handle_query_peer(&self, msg: QueryPeerMsg) -> Result<()> {
        if !self.config.use_p2p {
            return Ok(());
        }
        for peer in self.registry.snapshot_peers() {
            if peer.id.is_special() {
                continue;
            }
            let Some(endpoint) = peer.endpoint() else {
                continue;
            };
            let response = BroadcastPeerMsg {
                request_id: msg.request_id,
                node_id: peer.id,
                pubkey: peer.pubkey,
                conn_url: endpoint.to_string(),
            };
            let body = match encode_body(&response) {
                Ok(body) => body,
                Err(err) => {
                    warn!(?err, peer = %peer.id, "could not encode neighbor advertisement");
                    continue;
                }
            };
            let packet = self.frame_control(NodeId::CONTROL, self.config.default_ttl, &body);
            self.spread(
                &HashSet::new(),
                MessageKind::BroadcastPeer,
                &packet,
                TRANSPORT_OFFSET,
            );
        }
        Ok(())
    }

    /// Member side: learn about a peer another node advertised.
    fn handle_broadcast_peer(&self, peer: &Arc<Peer>, msg: BroadcastPeerMsg) -> Result<()> {
        if !self.config.use_p2p {
            return Ok(());
        }
        if msg.request_id == u32::from(self.id) {
            peer.set_asked_for_neighbor();
        }
        if msg.pubkey == self.public_key {
            return Ok(());
        }

        let target = match self.registry.lookup_by_key(&msg.pubkey) {
            Some(existing) => existing,
            None => {
                debug!(id = %msg.node_id, pubkey = %msg.pubkey, "adding advertised peer");
                self.ensure_peer_known(msg.pubkey, msg.node_id)
            }
        };
        let now = self.graph.current_time();
        if !target.is_alive(self.config.peer_alive_timeout(), now) {
            // Dead peer: queue the advertised endpoint for the driver.
            target.with_try_list(|list| list.load_or_store(&msg.conn_url, NEVER_TRIED));
            self.events.notify_try_endpoint();
        }
        Ok(())
    }

    /// Create a registry entry with unreachable edges both ways, so the
    /// registry and graph never disagree on membership.
    pub(crate) fn ensure_peer_known(&self, pubkey: PublicKey, id: NodeId) -> Arc<Peer> {
        if self.graph.weight(self.id, id) == INFINITY {
            self.graph.update_latency(self.id, id, INFINITY, true, false);
        }
        if self.graph.weight(id, self.id) == INFINITY {
            self.graph.update_latency(id, self.id, INFINITY, true, false);
        }
        self.registry.insert(pubkey, id, false)
    }

    /// Member side: the peer set changed at the super-node; fetch and
    /// reconcile it. Runs on its own task.
    pub async fn handle_update_peer(&self, peer: &Peer, msg: UpdatePeerMsg) -> Result<()> {
        if !self.config.use_super_node {
            return Ok(());
        }
        if peer.id != NodeId::SUPER {
            debug!(from = %peer.id, "ignored peer set update: not from super-node");
            return Ok(());
        }
        if self.registry.peer_state() == msg.state_hash {
            debug!("peer set unchanged, skipping download");
            return Ok(());
        }

        let url = self.state_url("peerinfo", &msg.state_hash);
        debug!(%url, "downloading peer set");
        let response = self.http.get(&url).send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        if status != 200 {
            warn!(status, "peer set download failed");
            return Err(Error::StateDivergence(status));
        }
        let infos: ApiPeers = serde_json::from_slice(&bytes)?;

        let send_signal = self.reconcile_peer_list(&infos);
        self.registry.set_peer_state(msg.state_hash);
        if send_signal {
            self.events.notify_try_endpoint();
        }
        Ok(())
    }

    /// Make the registry match the fetched peer set.
    ///
    /// Returns whether any dead peer gained try-list candidates and the
    /// endpoint driver should be woken.
    pub(crate) fn reconcile_peer_list(&self, infos: &ApiPeers) -> bool {
        let now = self.graph.current_time();
        let mut send_signal = false;

        // Drop peers the super-node no longer vouches for, or whose id
        // or pre-shared key moved. Sentinel-id peers are ours, not the
        // API's, and stay.
        for peer in self.registry.snapshot_peers() {
            if peer.id.is_special() {
                continue;
            }
            let keep = match infos.get(&peer.pubkey.to_base64()) {
                Some(info) => {
                    info.node_id == peer.id
                        && info.ps_key == peer.psk().map(|k| k.to_base64()).unwrap_or_default()
                }
                None => false,
            };
            if !keep {
                self.registry.remove(&peer.pubkey);
            }
        }

        for (pk_text, info) in infos {
            if info.conn_urls.is_empty() {
                continue;
            }
            let pubkey = match PublicKey::from_base64(pk_text) {
                Ok(key) => key,
                Err(err) => {
                    warn!(?err, "bad public key in peer set");
                    continue;
                }
            };
            if pubkey == self.public_key {
                continue;
            }

            let peer = match self.registry.lookup_by_key(&pubkey) {
                Some(existing) => existing,
                None => {
                    debug!(id = %info.node_id, pubkey = %pubkey, "adopting peer from super-node");
                    self.ensure_peer_known(pubkey, info.node_id)
                }
            };
            if !info.ps_key.is_empty() {
                match PresharedKey::from_base64(&info.ps_key) {
                    Ok(psk) => peer.set_psk(psk),
                    Err(err) => {
                        warn!(?err, "bad pre-shared key in peer set");
                        continue;
                    }
                }
            }
            if !peer.is_alive(self.config.peer_alive_timeout(), now) {
                peer.with_try_list(|list| {
                    for url in info.conn_urls.keys() {
                        list.load_or_store(url, NEVER_TRIED);
                        send_signal = true;
                    }
                });
            }
        }
        send_signal
    }

    /// Member side: the next-hop table changed at the super-node; fetch
    /// and install it. Runs on its own task.
    pub async fn handle_update_nh_table(&self, peer: &Peer, msg: UpdateNhTableMsg) -> Result<()> {
        if !self.config.use_super_node {
            return Ok(());
        }
        if peer.id != NodeId::SUPER {
            debug!(from = %peer.id, "ignored next-hop update: not from super-node");
            return Ok(());
        }
        if self.graph.nh_hash() == msg.state_hash {
            debug!("next-hop table unchanged, extending expiry");
            self.graph.extend_nh_expire();
            return Ok(());
        }

        let url = self.state_url("nhtable", &msg.state_hash);
        debug!(%url, "downloading next-hop table");
        let response = self.http.get(&url).send().await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        if status != 200 {
            warn!(status, "next-hop table download failed");
            return Err(Error::StateDivergence(status));
        }
        let table: NextHopTable = serde_json::from_slice(&bytes)?;
        self.graph.set_next_hop(table, msg.state_hash);
        Ok(())
    }

    /// Member side: an error directive from the super-node.
    fn handle_update_error(&self, peer: &Arc<Peer>, msg: UpdateErrorMsg) -> Result<()> {
        if peer.id != NodeId::SUPER {
            debug!(from = %peer.id, "ignored error directive: not from super-node");
            return Ok(());
        }
        error!(code = msg.error_code, msg = %msg.error_msg, "error directive from super-node");
        match msg.action {
            ErrorAction::Shutdown => self.events.signal_shutdown(),
            ErrorAction::Panic => std::process::abort(),
            ErrorAction::NoAction => {}
        }
        Ok(())
    }

    /// Send `times` pings to one peer at a fixed cadence.
    pub(crate) async fn send_pings(
        &self,
        peer: Arc<Peer>,
        times: u32,
        request_reply: u32,
        interval: Duration,
    ) {
        let mut shutdown = self.events.shutdown_watch();
        for _ in 0..times {
            if *shutdown.borrow() {
                return;
            }
            match self.generate_ping_packet(request_reply) {
                Ok(packet) => {
                    self.send_to_peer(&peer, MessageKind::Ping, &packet, TRANSPORT_OFFSET)
                }
                Err(err) => {
                    warn!(?err, "could not build ping");
                    return;
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    /// A framed latency probe from this node, asking for
    /// `request_reply` probes back.
    pub fn generate_ping_packet(&self, request_reply: u32) -> Result<Vec<u8>> {
        let msg = PingMsg {
            request_id: 0,
            src_node_id: self.id,
            time: self.graph.current_time(),
            request_reply,
        };
        let body = encode_body(&msg)?;
        // Pings measure one hop; they never transit.
        Ok(self.frame_control(NodeId::CONTROL, 0, &body))
    }

    fn state_url(&self, endpoint: &str, state: &StateHash) -> String {
        format!(
            "{}/{}?NodeID={}&PubKey={}&State={}",
            self.config.super_api_base,
            endpoint,
            self.id.0,
            percent_encode(self.public_key.to_base64().as_bytes(), NON_ALPHANUMERIC),
            percent_encode(state, NON_ALPHANUMERIC),
        )
    }
}
