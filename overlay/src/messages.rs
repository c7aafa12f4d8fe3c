// Copyright (c) 2024 Botho Foundation

//! Control message types and the overlay header codec.
//!
//! Control messages travel as self-describing JSON bodies behind a fixed
//! 7-byte overlay header, so fields can be added without breaking older
//! nodes. The header carries addressing only; the message kind is
//! conveyed by the transport framing and passed alongside the packet.

use crate::error::{Error, Result};
use ethermesh_common::{abbreviate_hash, NodeId, PublicKey, StateHash};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

/// Length in bytes of the overlay header.
pub const HEADER_LEN: usize = 7;

/// Kind of an overlay packet, conveyed by the transport framing.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum MessageKind {
    /// An Ethernet frame for the data plane.
    Normal = 0,
    /// Member-to-super registration.
    Register = 1,
    /// Super-to-member peer-set change notice.
    UpdatePeer = 2,
    /// Super-to-member next-hop-table change notice.
    UpdateNhTable = 3,
    /// Super-to-member error directive.
    UpdateError = 4,
    /// Latency probe.
    Ping = 5,
    /// Latency probe answer.
    Pong = 6,
    /// Request for a peer's neighbor list.
    QueryPeer = 7,
    /// Advertisement of one known neighbor.
    BroadcastPeer = 8,
}

impl MessageKind {
    /// Decode a kind byte from the transport framing.
    pub fn from_byte(byte: u8) -> Result<Self> {
        Ok(match byte {
            0 => Self::Normal,
            1 => Self::Register,
            2 => Self::UpdatePeer,
            3 => Self::UpdateNhTable,
            4 => Self::UpdateError,
            5 => Self::Ping,
            6 => Self::Pong,
            7 => Self::QueryPeer,
            8 => Self::BroadcastPeer,
            other => return Err(Error::InvalidMessageKind(other)),
        })
    }
}

/// The fixed-size overlay header in front of every packet body.
///
/// Wire layout, big-endian: `src:u16 | dst:u16 | ttl:u8 | length:u16`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OverlayHeader {
    /// Originating node.
    pub src: NodeId,
    /// Destination node or sentinel.
    pub dst: NodeId,
    /// Remaining transit hops.
    pub ttl: u8,
    /// Length in bytes of the body behind the header.
    pub length: u16,
}

impl OverlayHeader {
    /// Read a header from the front of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(Error::TruncatedHeader);
        }
        Ok(Self {
            src: NodeId(u16::from_be_bytes([buf[0], buf[1]])),
            dst: NodeId(u16::from_be_bytes([buf[2], buf[3]])),
            ttl: buf[4],
            length: u16::from_be_bytes([buf[5], buf[6]]),
        })
    }

    /// Write the header into the front of `buf`.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < HEADER_LEN {
            return Err(Error::TruncatedHeader);
        }
        buf[0..2].copy_from_slice(&self.src.0.to_be_bytes());
        buf[2..4].copy_from_slice(&self.dst.0.to_be_bytes());
        buf[4] = self.ttl;
        buf[5..7].copy_from_slice(&self.length.to_be_bytes());
        Ok(())
    }

    /// The header as a standalone byte array.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        self.encode_into(&mut buf).expect("buffer is header-sized");
        buf
    }
}

/// Encode a control message body.
pub fn encode_body<M: Serialize>(msg: &M) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(msg)?)
}

/// Decode a control message body.
pub fn decode_body<M: DeserializeOwned>(body: &[u8]) -> Result<M> {
    Ok(serde_json::from_slice(body)?)
}

/// What a super-node instructs an erring member to do.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum ErrorAction {
    /// Log only.
    #[default]
    NoAction,
    /// Terminate cooperatively.
    Shutdown,
    /// Terminate abnormally.
    Panic,
}

impl Display for ErrorAction {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            ErrorAction::NoAction => write!(f, "none"),
            ErrorAction::Shutdown => write!(f, "shutdown"),
            ErrorAction::Panic => write!(f, "panic"),
        }
    }
}

/// Member-to-super registration.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct RegisterMsg {
    /// The registering node's claimed id.
    pub node_id: NodeId,
    /// The registering node's software version.
    pub version: String,
    /// The peer-set version the member currently holds.
    #[serde(with = "ethermesh_common::hash::hex_serde")]
    pub peer_state_hash: StateHash,
    /// The next-hop-table version the member currently holds.
    #[serde(with = "ethermesh_common::hash::hex_serde")]
    pub nh_state_hash: StateHash,
    /// The member's local IPv4 socket address.
    pub local_v4: SocketAddr,
    /// The member's local IPv6 socket address.
    pub local_v6: SocketAddr,
}

impl Display for RegisterMsg {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "RegisterMsg node_id:{} version:{} peer_hash:{} nh_hash:{} v4:{} v6:{}",
            self.node_id,
            self.version,
            abbreviate_hash(&self.peer_state_hash),
            abbreviate_hash(&self.nh_state_hash),
            self.local_v4,
            self.local_v6,
        )
    }
}

/// Super-to-member notice that the peer set changed.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct UpdatePeerMsg {
    /// Version of the new peer set.
    #[serde(with = "ethermesh_common::hash::hex_serde")]
    pub state_hash: StateHash,
}

impl Display for UpdatePeerMsg {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "UpdatePeerMsg state_hash:{}", abbreviate_hash(&self.state_hash))
    }
}

/// Super-to-member notice that the next-hop table changed.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct UpdateNhTableMsg {
    /// Version of the new next-hop table.
    #[serde(with = "ethermesh_common::hash::hex_serde")]
    pub state_hash: StateHash,
}

impl Display for UpdateNhTableMsg {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "UpdateNhTableMsg state_hash:{}", abbreviate_hash(&self.state_hash))
    }
}

/// Super-to-member error directive.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct UpdateErrorMsg {
    /// The member this directive addresses.
    pub node_id: NodeId,
    /// What the member must do.
    pub action: ErrorAction,
    /// Numeric error code.
    pub error_code: i32,
    /// Human-readable explanation.
    pub error_msg: String,
}

impl Display for UpdateErrorMsg {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "UpdateErrorMsg node_id:{} action:{} code:{} msg:{}",
            self.node_id, self.action, self.error_code, self.error_msg
        )
    }
}

/// Latency probe.
///
/// `request_id` is part of the wire format even though most senders
/// leave it at zero.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct PingMsg {
    /// Correlation id; zero unless a caller sets one.
    #[serde(default)]
    pub request_id: u32,
    /// The probing node.
    pub src_node_id: NodeId,
    /// When the probe was sent.
    pub time: SystemTime,
    /// How many pings the receiver should send back.
    pub request_reply: u32,
}

impl Display for PingMsg {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "PingMsg src:{} request_id:{} request_reply:{}",
            self.src_node_id, self.request_id, self.request_reply
        )
    }
}

/// Latency probe answer, spread so third parties learn the edge too.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct PongMsg {
    /// Correlation id copied from the probe; zero unless set.
    #[serde(default)]
    pub request_id: u32,
    /// The node that sent the probe.
    pub src_node_id: NodeId,
    /// The node that answered it.
    pub dst_node_id: NodeId,
    /// Measured one-way delay.
    pub timediff: Duration,
    /// Operator-configured cost added on top of the measurement.
    #[serde(default)]
    pub additional_cost: f64,
}

impl Display for PongMsg {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "PongMsg src:{} dst:{} timediff:{:?} request_id:{}",
            self.src_node_id, self.dst_node_id, self.timediff, self.request_id
        )
    }
}

/// Request for the receiver's neighbor list.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct QueryPeerMsg {
    /// Id of the asking node, echoed back in the answers.
    pub request_id: u32,
}

impl Display for QueryPeerMsg {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "QueryPeerMsg request_id:{}", self.request_id)
    }
}

/// Advertisement of one known neighbor.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct BroadcastPeerMsg {
    /// The query this answers, or zero for unsolicited announcements.
    pub request_id: u32,
    /// The advertised neighbor's id.
    pub node_id: NodeId,
    /// The advertised neighbor's static public key.
    pub pubkey: PublicKey,
    /// A connect URL where the neighbor was last reachable.
    pub conn_url: String,
}

impl Display for BroadcastPeerMsg {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(
            f,
            "BroadcastPeerMsg request_id:{} node_id:{} conn_url:{}",
            self.request_id, self.node_id, self.conn_url
        )
    }
}

/// One-line rendering of a control body for control-level logging.
///
/// Bodies that fail to decode render as a parse-failure note instead of
/// an error; the caller never aborts on a bad log line.
pub fn summarize_control(kind: MessageKind, body: &[u8]) -> String {
    fn or_failed<M: DeserializeOwned + Display>(name: &str, body: &[u8]) -> String {
        match decode_body::<M>(body) {
            Ok(msg) => msg.to_string(),
            Err(_) => format!("{name}: parse failed"),
        }
    }

    match kind {
        MessageKind::Normal => "normal packet".to_string(),
        MessageKind::Register => or_failed::<RegisterMsg>("RegisterMsg", body),
        MessageKind::UpdatePeer => or_failed::<UpdatePeerMsg>("UpdatePeerMsg", body),
        MessageKind::UpdateNhTable => or_failed::<UpdateNhTableMsg>("UpdateNhTableMsg", body),
        MessageKind::UpdateError => or_failed::<UpdateErrorMsg>("UpdateErrorMsg", body),
        MessageKind::Ping => or_failed::<PingMsg>("PingMsg", body),
        MessageKind::Pong => or_failed::<PongMsg>("PongMsg", body),
        MessageKind::QueryPeer => or_failed::<QueryPeerMsg>("QueryPeerMsg", body),
        MessageKind::BroadcastPeer => or_failed::<BroadcastPeerMsg>("BroadcastPeerMsg", body),
    }
}
