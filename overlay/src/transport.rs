// Copyright (c) 2024 Botho Foundation

//! The seam to the encrypted tunnel and the outbound buffer pool.
//!
//! The control plane never opens sockets. Everything that touches the
//! wire goes through the [`Tunnel`] trait, implemented outside this
//! crate by the noise-encrypted UDP transport (and by a capture mock in
//! tests).

use crate::error::Result;
use crate::messages::MessageKind;
use crate::registry::Peer;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Mutex;

/// Bytes of headroom reserved in front of every outbound packet for the
/// tunnel's own framing.
pub const TRANSPORT_OFFSET: usize = 16;

/// Size in bytes of a pooled outbound buffer.
pub const MAX_BUFFER_SIZE: usize = 2048;

/// Preferred address family when resolving a peer's connect URL.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum AddressFamily {
    /// Resolve to IPv4 only.
    V4,
    /// Resolve to IPv6 only.
    V6,
    /// Take whatever resolves first.
    #[default]
    Any,
}

/// One outbound packet: a pooled buffer with tunnel headroom in front.
#[derive(Debug)]
pub struct OutboundElement {
    /// Kind stamped into the transport framing.
    pub kind: MessageKind,
    buffer: Vec<u8>,
    offset: usize,
    len: usize,
}

impl OutboundElement {
    /// Wrap a pooled buffer, copying `packet` in at `offset`.
    ///
    /// Returns `None` when the packet cannot fit behind the headroom.
    pub fn new(kind: MessageKind, mut buffer: Vec<u8>, packet: &[u8], offset: usize) -> Option<Self> {
        if offset + packet.len() > buffer.len() {
            return None;
        }
        buffer[offset..offset + packet.len()].copy_from_slice(packet);
        Some(Self {
            kind,
            buffer,
            offset,
            len: packet.len(),
        })
    }

    /// The overlay packet (header plus body) inside the buffer.
    pub fn packet(&self) -> &[u8] {
        &self.buffer[self.offset..self.offset + self.len]
    }

    /// Reclaim the underlying buffer for the pool.
    pub fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }
}

/// Fixed-size pool of outbound buffers.
///
/// A borrowed buffer has a single owner until it is staged on the
/// tunnel; whoever ends up not staging it must hand it back.
#[derive(Debug)]
pub struct BufferPool {
    buffers: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    /// Pre-allocate `count` buffers of [`MAX_BUFFER_SIZE`] bytes.
    pub fn new(count: usize) -> Self {
        Self {
            buffers: Mutex::new((0..count).map(|_| vec![0u8; MAX_BUFFER_SIZE]).collect()),
        }
    }

    /// Borrow a buffer; `None` when every buffer is inflight.
    pub fn get(&self) -> Option<Vec<u8>> {
        self.buffers.lock().unwrap().pop()
    }

    /// Return a buffer to the pool.
    pub fn put(&self, buffer: Vec<u8>) {
        self.buffers.lock().unwrap().push(buffer);
    }

    /// Number of buffers currently available.
    pub fn available(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }
}

/// The encrypted UDP tunnel underneath the overlay.
pub trait Tunnel: Send + Sync {
    /// Queue an outbound element on the peer's send path.
    fn stage_packet(&self, peer: &Peer, elem: OutboundElement);

    /// Flush the peer's queued elements to the wire.
    fn send_staged_packets(&self, peer: &Peer);

    /// Resolve `url` and bind it as the peer's endpoint.
    fn set_endpoint_from_conn_url(
        &self,
        peer: &Peer,
        url: &str,
        af: AddressFamily,
        is_static: bool,
    ) -> Result<SocketAddr>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_borrow_and_return() {
        let pool = BufferPool::new(2);
        assert_eq!(pool.available(), 2);
        let a = pool.get().unwrap();
        let b = pool.get().unwrap();
        assert!(pool.get().is_none());
        pool.put(a);
        pool.put(b);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_element_copies_at_offset() {
        let pool = BufferPool::new(1);
        let elem =
            OutboundElement::new(MessageKind::Ping, pool.get().unwrap(), b"abc", TRANSPORT_OFFSET)
                .unwrap();
        assert_eq!(elem.packet(), b"abc");
        assert_eq!(elem.into_buffer().len(), MAX_BUFFER_SIZE);
    }

    #[test]
    fn test_element_rejects_oversize_packet() {
        let pool = BufferPool::new(1);
        let packet = vec![0u8; MAX_BUFFER_SIZE];
        assert!(OutboundElement::new(
            MessageKind::Normal,
            pool.get().unwrap(),
            &packet,
            TRANSPORT_OFFSET
        )
        .is_none());
    }
}
