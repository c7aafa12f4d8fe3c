// Copyright (c) 2024 Botho Foundation

//! End-to-end scenarios driving a device through its public surface,
//! with a capturing tunnel standing in for the noise transport.

use ethermesh_common::{NodeId, PublicKey};
use ethermesh_overlay::{
    decode_body, encode_body, AddressFamily, BroadcastPeerMsg, Device, DeviceConfig,
    DeviceConfigBuilder, ErrorAction, Error, MessageKind, OutboundElement, Peer, PingMsg, PongMsg,
    RegisterMsg, Result, Tunnel, UpdateErrorMsg, UpdatePeerMsg, HEADER_LEN, INFINITY, NEVER_TRIED,
    TRANSPORT_OFFSET,
};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

/// Records every staged packet and resolves `udp://host:port` URLs.
#[derive(Default)]
struct MockTunnel {
    sent: Mutex<Vec<(NodeId, MessageKind, Vec<u8>)>>,
    binds: Mutex<Vec<String>>,
}

impl MockTunnel {
    fn sent_to(&self, id: NodeId) -> Vec<(MessageKind, Vec<u8>)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _, _)| *to == id)
            .map(|(_, kind, packet)| (*kind, packet.clone()))
            .collect()
    }

    fn drain(&self) -> Vec<(NodeId, MessageKind, Vec<u8>)> {
        std::mem::take(&mut self.sent.lock().unwrap())
    }
}

impl Tunnel for MockTunnel {
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
        url.strip_prefix("udp://")
            .unwrap_or(url)
            .parse()
            .map_err(|_| Error::Transport(format!("cannot resolve {url}")))
    }
}

fn member_config() -> DeviceConfig {
    DeviceConfigBuilder::new()
        .version("1.0.0")
        .use_p2p(true)
        .build()
}

fn connect_peer(device: &Device, id: u16, seed: u8) -> Arc<Peer> {
    let peer = device
        .registry
        .insert(PublicKey([seed; 32]), NodeId(id), false);
    peer.set_endpoint(format!("10.0.0.{seed}:3456").parse().unwrap());
    peer
}

/// A framed control packet as peer `src` would send it.
fn frame_from(src: NodeId, dst: NodeId, ttl: u8, body: &[u8]) -> Vec<u8> {
    let mut packet = vec![0u8; HEADER_LEN + body.len()];
    packet[0..2].copy_from_slice(&src.0.to_be_bytes());
    packet[2..4].copy_from_slice(&dst.0.to_be_bytes());
    packet[4] = ttl;
    packet[5..7].copy_from_slice(&(body.len() as u16).to_be_bytes());
    packet[HEADER_LEN..].copy_from_slice(body);
    packet
}

#[tokio::test]
async fn version_mismatch_at_register() {
    let tunnel = Arc::new(MockTunnel::default());
    let config = DeviceConfigBuilder::new().version("1.0.0").build();
    let device = Device::new(
        config,
        NodeId(1000),
        PublicKey([99u8; 32]),
        true,
        Arc::clone(&tunnel) as Arc<dyn Tunnel>,
    )
    .unwrap();
    let peer = connect_peer(&device, 7, 7);
    let mut register_rx = device.events.take_register_rx().unwrap();

    let msg = RegisterMsg {
        node_id: NodeId(7),
        version: "2.0.0".to_string(),
        peer_state_hash: [0u8; 32],
        nh_state_hash: [0u8; 32],
        local_v4: "10.0.0.7:3456".parse().unwrap(),
        local_v6: "[::1]:3456".parse().unwrap(),
    };
    let packet = frame_from(NodeId(7), NodeId::SUPER, 0, &encode_body(&msg).unwrap());
    device
        .dispatch_inbound(&peer, MessageKind::Register, &packet, TRANSPORT_OFFSET)
        .unwrap();

    let sent = tunnel.sent_to(NodeId(7));
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, MessageKind::UpdateError);
    let reply: UpdateErrorMsg = decode_body(&sent[0].1[HEADER_LEN..]).unwrap();
    assert_eq!(reply.action, ErrorAction::Shutdown);
    assert_eq!(reply.error_code, 400);
    assert_eq!(
        reply.error_msg,
        "Your version: \"2.0.0\" is not compatible with our version: \"1.0.0\""
    );
    // No registration event reaches the oracle.
    assert!(register_rx.try_recv().is_err());
}

#[tokio::test]
async fn ping_feeds_latency_and_answers_with_pong() {
    let tunnel = Arc::new(MockTunnel::default());
    let device = Device::new(
        member_config(),
        NodeId(1),
        PublicKey([1u8; 32]),
        false,
        Arc::clone(&tunnel) as Arc<dyn Tunnel>,
    )
    .unwrap();
    let peer = connect_peer(&device, 2, 2);

    let sent_at = SystemTime::now() - Duration::from_millis(250);
    let ping = PingMsg {
        request_id: 0,
        src_node_id: NodeId(2),
        time: sent_at,
        request_reply: 0,
    };
    let packet = frame_from(NodeId(2), NodeId::CONTROL, 0, &encode_body(&ping).unwrap());
    device
        .dispatch_inbound(&peer, MessageKind::Ping, &packet, TRANSPORT_OFFSET)
        .unwrap();

    let sent = tunnel.sent_to(NodeId(2));
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, MessageKind::Pong);
    let pong: PongMsg = decode_body(&sent[0].1[HEADER_LEN..]).unwrap();
    assert_eq!(pong.src_node_id, NodeId(2));
    assert_eq!(pong.dst_node_id, NodeId(1));
    assert!(pong.timediff >= Duration::from_millis(250));

    // The measured edge (2, 1) landed in the graph.
    assert_eq!(device.graph.weight(NodeId(2), NodeId(1)), pong.timediff);
    // Liveness was recorded.
    assert!(peer.is_alive(Duration::from_secs(30), SystemTime::now()));
}

#[tokio::test(start_paused = true)]
async fn ping_with_reply_request_schedules_pings() {
    let tunnel = Arc::new(MockTunnel::default());
    let device = Device::new(
        member_config(),
        NodeId(1),
        PublicKey([1u8; 32]),
        false,
        Arc::clone(&tunnel) as Arc<dyn Tunnel>,
    )
    .unwrap();
    let peer = connect_peer(&device, 2, 2);

    let ping = PingMsg {
        request_id: 0,
        src_node_id: NodeId(2),
        time: SystemTime::now(),
        request_reply: 3,
    };
    let packet = frame_from(NodeId(2), NodeId::CONTROL, 0, &encode_body(&ping).unwrap());
    device
        .dispatch_inbound(&peer, MessageKind::Ping, &packet, TRANSPORT_OFFSET)
        .unwrap();
    tunnel.drain();

    // Three pings back at a three-second cadence.
    tokio::time::sleep(Duration::from_secs(10)).await;
    let pings: Vec<_> = tunnel
        .sent_to(NodeId(2))
        .into_iter()
        .filter(|(kind, _)| *kind == MessageKind::Ping)
        .collect();
    assert_eq!(pings.len(), 3);
    for (_, packet) in pings {
        let msg: PingMsg = decode_body(&packet[HEADER_LEN..]).unwrap();
        assert_eq!(msg.src_node_id, NodeId(1));
        assert_eq!(msg.request_reply, 0);
    }
}

#[tokio::test]
async fn broadcast_peer_introduces_new_peer() {
    let tunnel = Arc::new(MockTunnel::default());
    let device = Device::new(
        member_config(),
        NodeId(1),
        PublicKey([1u8; 32]),
        false,
        Arc::clone(&tunnel) as Arc<dyn Tunnel>,
    )
    .unwrap();
    let origin = connect_peer(&device, 2, 2);
    let advertised_key = PublicKey([77u8; 32]);

    let msg = BroadcastPeerMsg {
        request_id: 0,
        node_id: NodeId(9),
        pubkey: advertised_key,
        conn_url: "udp://x:1".to_string(),
    };
    let packet = frame_from(NodeId(2), NodeId::CONTROL, 0, &encode_body(&msg).unwrap());
    device
        .dispatch_inbound(&origin, MessageKind::BroadcastPeer, &packet, TRANSPORT_OFFSET)
        .unwrap();

    // Registry gained (9, K) and the graph both unreachable edges.
    let peer = device.registry.lookup_by_id(NodeId(9)).unwrap();
    assert_eq!(peer.pubkey, advertised_key);
    assert_eq!(device.graph.weight(NodeId(1), NodeId(9)), INFINITY);
    assert_eq!(device.graph.weight(NodeId(9), NodeId(1)), INFINITY);

    // Never-pinged peer is dead: the URL is queued untried.
    peer.with_try_list(|list| {
        assert_eq!(list.keys(), vec!["udp://x:1"]);
        assert_eq!(list.get("udp://x:1"), Some(NEVER_TRIED));
    });

    // Exactly one wake-up for the endpoint driver.
    let mut rx = device.events.take_try_endpoint_rx().unwrap();
    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn update_peer_hash_match_skips_download() {
    let tunnel = Arc::new(MockTunnel::default());
    let config = DeviceConfigBuilder::new()
        .version("1.0.0")
        .use_super_node(true)
        // Nothing listens here; any fetch attempt would fail loudly.
        .super_api_base("http://127.0.0.1:9")
        .build();
    let device = Device::new(
        config,
        NodeId(1),
        PublicKey([1u8; 32]),
        false,
        Arc::clone(&tunnel) as Arc<dyn Tunnel>,
    )
    .unwrap();
    let super_peer = device
        .registry
        .insert(PublicKey([99u8; 32]), NodeId::SUPER, true);

    let hash = [7u8; 32];
    device.registry.set_peer_state(hash);
    let peers_before = device.registry.len();

    device
        .handle_update_peer(&super_peer, UpdatePeerMsg { state_hash: hash })
        .await
        .unwrap();

    assert_eq!(device.registry.len(), peers_before);
    assert_eq!(device.registry.peer_state(), hash);
}

#[tokio::test(start_paused = true)]
async fn endpoint_driver_walks_try_list_in_stamp_order() {
    let tunnel = Arc::new(MockTunnel::default());
    let config = DeviceConfigBuilder::new()
        .version("1.0.0")
        .use_p2p(true)
        .conn_timeout_secs(30)
        .conn_next_try_secs(2)
        .build();
    let device = Device::new(
        config,
        NodeId(1),
        PublicKey([1u8; 32]),
        false,
        Arc::clone(&tunnel) as Arc<dyn Tunnel>,
    )
    .unwrap();

    // A dead peer with one never-tried URL and one stale-tried URL.
    let peer = device
        .registry
        .insert(PublicKey([9u8; 32]), NodeId(9), false);
    let stale_stamp = SystemTime::now() - Duration::from_secs(60);
    peer.with_try_list(|list| {
        list.load_or_store("udp://10.0.0.9:2", stale_stamp);
        list.load_or_store("udp://10.0.0.9:1", NEVER_TRIED);
    });

    let follow_up = device.try_endpoints_once();
    assert!(follow_up);
    // Let the scheduled probes run out.
    tokio::time::sleep(Duration::from_secs(5)).await;

    // Sorted by stamp, the never-tried URL comes first; its bind
    // succeeds, so the walk stops there.
    assert_eq!(
        tunnel.binds.lock().unwrap().clone(),
        vec!["udp://10.0.0.9:1"]
    );
    assert_eq!(peer.endpoint(), Some("10.0.0.9:1".parse().unwrap()));
    peer.with_try_list(|list| {
        // The bound URL was stamped; the stale one is untouched.
        assert!(list.get("udp://10.0.0.9:1").unwrap() > stale_stamp);
        assert_eq!(list.get("udp://10.0.0.9:2"), Some(stale_stamp));
    });

    // conn_next_try + 1 pings go out toward the revived peer.
    let pings: Vec<_> = tunnel
        .sent_to(NodeId(9))
        .into_iter()
        .filter(|(kind, _)| *kind == MessageKind::Ping)
        .collect();
    assert_eq!(pings.len(), 3);
    let probe: PingMsg = decode_body(&pings[0].1[HEADER_LEN..]).unwrap();
    assert_eq!(probe.request_reply, 1);
}

#[tokio::test]
async fn two_members_learn_latency_end_to_end() {
    // Two devices wired back to back: every packet A sends to B is fed
    // into B's receive path and vice versa.
    let tunnel_a = Arc::new(MockTunnel::default());
    let tunnel_b = Arc::new(MockTunnel::default());
    let key_a = PublicKey(rand::random());
    let key_b = PublicKey(rand::random());
    let node_a = Device::new(
        member_config(),
        NodeId(1),
        key_a,
        false,
        Arc::clone(&tunnel_a) as Arc<dyn Tunnel>,
    )
    .unwrap();
    let node_b = Device::new(
        member_config(),
        NodeId(2),
        key_b,
        false,
        Arc::clone(&tunnel_b) as Arc<dyn Tunnel>,
    )
    .unwrap();
    let b_at_a = node_a.registry.insert(key_b, NodeId(2), false);
    b_at_a.set_endpoint("10.0.0.2:3456".parse().unwrap());
    let a_at_b = node_b.registry.insert(key_a, NodeId(1), false);
    a_at_b.set_endpoint("10.0.0.1:3456".parse().unwrap());

    // A probes its peers.
    let ping = node_a.generate_ping_packet(0).unwrap();
    node_a.spread(
        &Default::default(),
        MessageKind::Ping,
        &ping,
        TRANSPORT_OFFSET,
    );

    // Deliver A's traffic to B, then B's answers back to A.
    for (_, kind, packet) in tunnel_a.drain() {
        node_b
            .dispatch_inbound(&a_at_b, kind, &packet, TRANSPORT_OFFSET)
            .unwrap();
    }
    for (_, kind, packet) in tunnel_b.drain() {
        node_a
            .dispatch_inbound(&b_at_a, kind, &packet, TRANSPORT_OFFSET)
            .unwrap();
    }

    // A now holds the measured edge (1 → 2) that B reported.
    assert_ne!(node_a.graph.weight(NodeId(1), NodeId(2)), INFINITY);
    // And B, having been probed, knows A is alive.
    assert!(a_at_b.is_alive(Duration::from_secs(30), SystemTime::now()));
}
