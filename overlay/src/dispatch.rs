// Copyright (c) 2024 Botho Foundation

//! Packet dispatch: the outbound primitives and inbound classification.
//!
//! Outbound packets are pre-framed (header plus body) by the caller;
//! dispatch copies them into pooled elements and hands them to the
//! tunnel. Inbound packets are classified by their header destination
//! and routed to the control handlers, with the dedup filter sitting in
//! front of transit re-broadcast so a flooded message crosses each node
//! once.

use crate::device::Device;
use crate::error::Result;
use crate::messages::{summarize_control, MessageKind, OverlayHeader, HEADER_LEN};
use crate::registry::Peer;
use crate::transport::OutboundElement;
use ethermesh_common::NodeId;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Minimum bytes of payload behind the header for a data-plane packet;
/// anything at or below this cannot be an Ethernet frame.
pub const MIN_NORMAL_PAYLOAD: usize = 12;

impl Device {
    /// Frame a control body into a full overlay packet.
    pub(crate) fn frame_control(&self, dst: NodeId, ttl: u8, body: &[u8]) -> Vec<u8> {
        let header = OverlayHeader {
            src: self.id,
            dst,
            ttl,
            length: body.len() as u16,
        };
        let mut packet = vec![0u8; HEADER_LEN + body.len()];
        header
            .encode_into(&mut packet)
            .expect("buffer is header-sized");
        packet[HEADER_LEN..].copy_from_slice(body);
        packet
    }

    /// Send a pre-framed packet to one peer.
    ///
    /// Silently drops when the peer has no endpoint, when a data-plane
    /// payload is too small to be an Ethernet frame, or when the buffer
    /// pool is exhausted.
    pub fn send_to_peer(&self, peer: &Peer, kind: MessageKind, packet: &[u8], offset: usize) {
        if peer.endpoint().is_none() {
            return;
        }
        if kind == MessageKind::Normal && packet.len().saturating_sub(HEADER_LEN) <= MIN_NORMAL_PAYLOAD
        {
            trace!(peer = %peer.id, "dropping undersized data packet");
            return;
        }
        if kind != MessageKind::Normal {
            let body = packet.get(HEADER_LEN..).unwrap_or_default();
            debug!(
                peer = %peer.id,
                msg = %summarize_control(kind, body),
                "send control"
            );
        }

        let Some(buffer) = self.pool.get() else {
            warn!(peer = %peer.id, "outbound buffer pool exhausted");
            return;
        };
        let Some(elem) = OutboundElement::new(kind, buffer, packet, offset) else {
            warn!(peer = %peer.id, len = packet.len(), "packet exceeds buffer size");
            return;
        };
        if peer.running() {
            self.tunnel.stage_packet(peer, elem);
            self.tunnel.send_staged_packets(peer);
        } else {
            self.pool.put(elem.into_buffer());
        }
    }

    /// Send along the spanning-tree fan-out, minus `skip`.
    pub fn broadcast(
        &self,
        skip: &HashSet<NodeId>,
        kind: MessageKind,
        packet: &[u8],
        offset: usize,
    ) {
        let list = self.graph.broadcast_list(self.id);
        for (id, should_send) in list {
            if !should_send || skip.contains(&id) {
                continue;
            }
            if let Some(peer) = self.registry.lookup_by_id(id) {
                self.send_to_peer(&peer, kind, packet, offset);
            }
        }
    }

    /// Forward a transiting broadcast onward.
    pub fn transit_broadcast(
        &self,
        src_id: NodeId,
        in_id: NodeId,
        kind: MessageKind,
        packet: &[u8],
        offset: usize,
    ) {
        for id in self.graph.broadcast_through_list(self.id, in_id, src_id) {
            if let Some(peer) = self.registry.lookup_by_id(id) {
                trace!(from = %in_id, through = %self.id, to = %id, "transit forward");
                self.send_to_peer(&peer, kind, packet, offset);
            }
        }
    }

    /// Send to every known peer, alive or not, minus `skip`.
    pub fn spread(&self, skip: &HashSet<NodeId>, kind: MessageKind, packet: &[u8], offset: usize) {
        for peer in self.registry.snapshot_peers() {
            if skip.contains(&peer.id) {
                trace!(skipped = %peer.id, "spread skip");
                continue;
            }
            self.send_to_peer(&peer, kind, packet, offset);
        }
    }

    /// Send to every configured super-peer, when super-node use is on.
    pub fn send_to_super(&self, kind: MessageKind, packet: &[u8], offset: usize) {
        if !self.config.use_super_node {
            return;
        }
        for peer in self.registry.snapshot_super_peers() {
            self.send_to_peer(&peer, kind, packet, offset);
        }
    }

    /// Classify one decrypted inbound packet and run its handler.
    ///
    /// Flooded destinations pass the dedup filter before being handled
    /// and forwarded; a repeat sighting is dropped wholesale. Packets
    /// addressed to a third node are put back on their way via the
    /// next-hop table.
    pub fn dispatch_inbound(
        &self,
        peer: &Arc<Peer>,
        kind: MessageKind,
        packet: &[u8],
        offset: usize,
    ) -> Result<()> {
        let header = OverlayHeader::decode(packet)?;
        let body_end = HEADER_LEN + header.length as usize;
        if packet.len() < body_end {
            return Err(crate::error::Error::TruncatedBody);
        }
        let body = &packet[HEADER_LEN..body_end];

        if kind == MessageKind::Normal {
            // Data plane; nothing for the control handlers.
            return Ok(());
        }

        let dst = header.dst;
        if dst == NodeId::CONTROL || dst == NodeId::BROADCAST {
            if !self.dedup.check_no_dup(body) {
                trace!(src = %header.src, "duplicate flooded packet dropped");
                return Ok(());
            }
            let result = self.process_control(peer, kind, body);
            if header.ttl > 0 {
                let mut relayed = packet.to_vec();
                relayed[4] = header.ttl - 1;
                self.transit_broadcast(header.src, peer.id, kind, &relayed, offset);
            }
            result
        } else if dst == self.id || dst == NodeId::SUPER {
            self.process_control(peer, kind, body)
        } else {
            if header.ttl == 0 {
                trace!(%dst, "transit packet out of hops");
                return Ok(());
            }
            if let Some(hop) = self.graph.next_hop(self.id, dst) {
                if let Some(next_peer) = self.registry.lookup_by_id(hop) {
                    let mut forwarded = packet.to_vec();
                    forwarded[4] = header.ttl - 1;
                    self.send_to_peer(&next_peer, kind, &forwarded, offset);
                }
            }
            Ok(())
        }
    }
}
