// Copyright (c) 2024 Botho Foundation

//! Control plane of the Ethermesh Ethernet-over-VPN mesh overlay.
//!
//! An Ethermesh node bridges Ethernet segments over an encrypted UDP
//! mesh. This crate is the node's control plane: it discovers peers,
//! measures inter-node latency, maintains the next-hop forwarding table,
//! and negotiates working UDP endpoints for every peer. A node runs
//! either as an ordinary member, optionally exchanging neighbor
//! information peer-to-peer, or as a super-node acting as registry and
//! routing oracle for the mesh.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                            Device                              │
//! ├────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐  ┌──────────────┐  ┌───────────────────────┐  │
//! │  │ PeerRegistry│  │ RoutingGraph │  │ handlers + routines   │  │
//! │  │ (peers,     │  │ (latencies,  │  │ (control messages,    │  │
//! │  │  try-lists) │  │  next hops)  │  │  periodic tasks)      │  │
//! │  └─────────────┘  └──────────────┘  └───────────────────────┘  │
//! │  ┌─────────────┐  ┌──────────────┐  ┌───────────────────────┐  │
//! │  │  DupFilter  │  │   EventBus   │  │ Tunnel (trait seam to │  │
//! │  │ (storms)    │  │  (signals)   │  │  the noise transport) │  │
//! │  └─────────────┘  └──────────────┘  └───────────────────────┘  │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The data plane (the tap device, the noise tunnel, raw frame
//! encoding) lives outside this crate. The control plane reaches it
//! only through the [`Tunnel`] trait and the outbound buffer pool.
//!
//! # Message flow
//!
//! Eight control message kinds ride behind a fixed 7-byte overlay
//! header. Members probe each other with [`PingMsg`]/[`PongMsg`] and, in
//! P2P mode, trade neighbor lists with [`QueryPeerMsg`] and
//! [`BroadcastPeerMsg`]. A super-node takes [`RegisterMsg`]s and
//! answers with [`UpdatePeerMsg`]/[`UpdateNhTableMsg`] notices whose
//! bodies the member pulls over HTTP when the carried state hash is
//! news to it.

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

pub mod config;
pub mod dedup;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod fib;
pub mod graph;
pub mod handlers;
pub mod messages;
pub mod registry;
pub mod routines;
pub mod transport;

#[cfg(test)]
mod test_support;

// Re-export main types for convenience
pub use config::{DeviceConfig, DeviceConfigBuilder};
pub use dedup::DupFilter;
pub use device::Device;
pub use error::{Error, Result};
pub use events::EventBus;
pub use fib::L2Fib;
pub use graph::{
    hash_next_hop_table, Latency, NextHopTable, RoutingGraph, INFINITY,
};
pub use handlers::{compare_version, ApiPeerInfo, ApiPeers};
pub use messages::{
    decode_body, encode_body, summarize_control, BroadcastPeerMsg, ErrorAction, MessageKind,
    OverlayHeader, PingMsg, PongMsg, QueryPeerMsg, RegisterMsg, UpdateErrorMsg, UpdateNhTableMsg,
    UpdatePeerMsg, HEADER_LEN,
};
pub use registry::{EndpointTryList, Handshake, Peer, PeerRegistry, NEVER_TRIED};
pub use transport::{
    AddressFamily, BufferPool, OutboundElement, Tunnel, MAX_BUFFER_SIZE, TRANSPORT_OFFSET,
};
