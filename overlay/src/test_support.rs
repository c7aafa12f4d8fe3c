// Copyright (c) 2024 Botho Foundation

//! Shared helpers for the crate's unit tests.

use crate::config::DeviceConfig;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::messages::MessageKind;
use crate::registry::Peer;
use crate::transport::{AddressFamily, OutboundElement, Tunnel};
use ethermesh_common::{NodeId, PublicKey};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

/// A tunnel that records staged packets and resolves `udp://` URLs.
#[derive(Default)]
pub struct CaptureTunnel {
    /// Every staged packet as `(peer id, kind, header + body)`.
    pub sent: Mutex<Vec<(NodeId, MessageKind, Vec<u8>)>>,
    /// URLs passed to `set_endpoint_from_conn_url`.
    pub binds: Mutex<Vec<String>>,
    /// When set, every bind attempt fails.
    pub fail_binds: Mutex<bool>,
}

impl CaptureTunnel {
    pub fn sent_to(&self, id: NodeId) -> Vec<(MessageKind, Vec<u8>)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _, _)| *to == id)
            .map(|(_, kind, packet)| (*kind, packet.clone()))
            .collect()
    }
}

impl Tunnel for CaptureTunnel {
    fn stage_packet(&self, peer: &Peer, elem: OutboundElement) {
        self.sent
            .lock()
            .unwrap()
            .push((peer.id, elem.kind, elem.packet().to_vec()));
    }

    fn send_staged_packets(&self, _peer: &Peer) {}

    fn set_endpoint_from_conn_url(
        &self,
        _peer: &Peer,
        url: &str,
        _af: AddressFamily,
        _is_static: bool,
    ) -> Result<SocketAddr> {
        self.binds.lock().unwrap().push(url.to_string());
        if *self.fail_binds.lock().unwrap() {
            return Err(Error::Transport(format!("cannot resolve {url}")));
        }
        url.strip_prefix("udp://")
            .unwrap_or(url)
            .parse()
            .map_err(|_| Error::Transport(format!("cannot resolve {url}")))
    }
}

/// A member device with id 1 and the given feature flags.
pub fn make_member(
    tunnel: Arc<CaptureTunnel>,
    use_p2p: bool,
    use_super_node: bool,
) -> Arc<Device> {
    let config = DeviceConfig {
        use_p2p,
        use_super_node,
        ..DeviceConfig::default()
    };
    Device::new(config, NodeId(1), PublicKey([1u8; 32]), false, tunnel).unwrap()
}

/// A super-node device with id `SUPER`'s oracle role.
pub fn make_super(tunnel: Arc<CaptureTunnel>, version: &str) -> Arc<Device> {
    let config = DeviceConfig {
        version: version.to_string(),
        ..DeviceConfig::default()
    };
    Device::new(config, NodeId(1000), PublicKey([9u8; 32]), true, tunnel).unwrap()
}

/// Insert a running peer with an endpoint already bound.
pub fn add_connected_peer(device: &Device, id: u16, seed: u8) -> Arc<Peer> {
    let peer = device
        .registry
        .insert(PublicKey([seed; 32]), NodeId(id), false);
    peer.set_endpoint(format!("127.0.0.1:{}", 7000 + id).parse().unwrap());
    peer
}
