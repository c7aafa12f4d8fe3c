// Copyright (c) 2024 Botho Foundation

//! The authoritative set of known peers.
//!
//! The registry keeps two indexes that always agree, by node id and by
//! static public key, plus the list of super-peers. Registry-level
//! mutation happens under a single writer lock; each peer additionally
//! carries its own lock for endpoint, try-list and handshake state. The
//! registry lock is never held while a peer lock is taken: callers
//! snapshot `Arc<Peer>`s out and work on those.

use crate::transport::AddressFamily;
use ethermesh_common::{NodeId, PresharedKey, PublicKey, StateHash};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Try-list stamp of an endpoint that has never been attempted.
pub const NEVER_TRIED: SystemTime = SystemTime::UNIX_EPOCH;

/// Ordered map of candidate connect URLs to their last-attempt stamps.
///
/// Insertion order is preserved and an explicit value-comparator resort
/// is supported, so the endpoint driver can walk candidates
/// oldest-attempt-first while discovery appends behind it.
#[derive(Debug, Default, Clone)]
pub struct EndpointTryList {
    order: Vec<String>,
    stamps: HashMap<String, SystemTime>,
}

impl EndpointTryList {
    /// Insert `url` with `stamp` unless it is already present.
    ///
    /// Returns whether the entry was inserted; a duplicate write is a
    /// no-op.
    pub fn load_or_store(&mut self, url: &str, stamp: SystemTime) -> bool {
        if self.stamps.contains_key(url) {
            return false;
        }
        self.order.push(url.to_string());
        self.stamps.insert(url.to_string(), stamp);
        true
    }

    /// Overwrite the stamp of `url`, inserting it if absent.
    pub fn set(&mut self, url: &str, stamp: SystemTime) {
        if !self.stamps.contains_key(url) {
            self.order.push(url.to_string());
        }
        self.stamps.insert(url.to_string(), stamp);
    }

    /// The stamp recorded for `url`.
    pub fn get(&self, url: &str) -> Option<SystemTime> {
        self.stamps.get(url).copied()
    }

    /// Drop `url` from the list.
    pub fn remove(&mut self, url: &str) {
        if self.stamps.remove(url).is_some() {
            self.order.retain(|entry| entry != url);
        }
    }

    /// The URLs in their current order.
    pub fn keys(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Resort the list in place by comparing entry values.
    pub fn sort_by<F>(&mut self, mut compare: F)
    where
        F: FnMut(&SystemTime, &SystemTime) -> std::cmp::Ordering,
    {
        let stamps = &self.stamps;
        self.order
            .sort_by(|a, b| compare(&stamps[a], &stamps[b]));
    }

    /// Number of candidate URLs.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no candidates remain.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Handshake identity a peer presents on the encrypted transport.
#[derive(Debug, Clone)]
pub struct Handshake {
    /// The peer's static public key.
    pub remote_static: PublicKey,
    /// Optional pre-shared key mixed into the handshake.
    pub preshared_key: Option<PresharedKey>,
}

#[derive(Debug)]
struct PeerState {
    endpoint: Option<SocketAddr>,
    last_ping_received: SystemTime,
    asked_for_neighbor: bool,
    try_list: EndpointTryList,
    running: bool,
    handshake: Handshake,
}

/// A remote node of the overlay.
///
/// The node id and public key never change after creation; everything
/// else lives behind the peer's own lock.
#[derive(Debug)]
pub struct Peer {
    /// The peer's node id.
    pub id: NodeId,
    /// The peer's static public key.
    pub pubkey: PublicKey,
    /// Whether the endpoint was statically configured.
    pub is_static: bool,
    /// Preferred address family for resolving connect URLs.
    pub preferred_af: AddressFamily,
    /// Statically configured connect URL, if any.
    pub conn_url: Option<String>,
    state: RwLock<PeerState>,
}

impl Peer {
    fn new(pubkey: PublicKey, id: NodeId) -> Self {
        Self {
            id,
            pubkey,
            is_static: false,
            preferred_af: AddressFamily::Any,
            conn_url: None,
            state: RwLock::new(PeerState {
                endpoint: None,
                last_ping_received: SystemTime::UNIX_EPOCH,
                asked_for_neighbor: false,
                try_list: EndpointTryList::default(),
                running: true,
                handshake: Handshake {
                    remote_static: pubkey,
                    preshared_key: None,
                },
            }),
        }
    }

    /// The current endpoint, if one is bound.
    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.state.read().unwrap().endpoint
    }

    /// Bind a new endpoint.
    pub fn set_endpoint(&self, endpoint: SocketAddr) {
        self.state.write().unwrap().endpoint = Some(endpoint);
    }

    /// When the last ping from this peer arrived.
    pub fn last_ping_received(&self) -> SystemTime {
        self.state.read().unwrap().last_ping_received
    }

    /// Record a ping arrival. Monotonic: an older stamp never wins.
    pub fn update_last_ping(&self, at: SystemTime) {
        let mut state = self.state.write().unwrap();
        if at > state.last_ping_received {
            state.last_ping_received = at;
        }
    }

    /// Whether a ping arrived within `timeout` of `now`.
    pub fn is_alive(&self, timeout: Duration, now: SystemTime) -> bool {
        self.last_ping_received() + timeout > now
    }

    /// Whether we already asked this peer for its neighbor list.
    pub fn asked_for_neighbor(&self) -> bool {
        self.state.read().unwrap().asked_for_neighbor
    }

    /// Remember that this peer answered our neighbor query.
    pub fn set_asked_for_neighbor(&self) {
        self.state.write().unwrap().asked_for_neighbor = true;
    }

    /// Whether the peer's send path is up.
    pub fn running(&self) -> bool {
        self.state.read().unwrap().running
    }

    /// Mark the peer's send path up or down.
    pub fn set_running(&self, running: bool) {
        self.state.write().unwrap().running = running;
    }

    /// The peer's current pre-shared key.
    pub fn psk(&self) -> Option<PresharedKey> {
        self.state.read().unwrap().handshake.preshared_key
    }

    /// Install a pre-shared key for the peer's handshake.
    pub fn set_psk(&self, psk: PresharedKey) {
        self.state.write().unwrap().handshake.preshared_key = Some(psk);
    }

    /// Run `f` against the peer's endpoint try-list under its lock.
    pub fn with_try_list<R>(&self, f: impl FnOnce(&mut EndpointTryList) -> R) -> R {
        f(&mut self.state.write().unwrap().try_list)
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    by_id: HashMap<NodeId, Arc<Peer>>,
    by_key: HashMap<PublicKey, Arc<Peer>>,
    super_peers: Vec<Arc<Peer>>,
    peer_state: StateHash,
    local_v4: Option<IpAddr>,
    local_v6: Option<IpAddr>,
}

/// Thread-safe peer registry with dual indexes.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    inner: RwLock<RegistryInner>,
}

impl PeerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look a peer up by public key.
    pub fn lookup_by_key(&self, pubkey: &PublicKey) -> Option<Arc<Peer>> {
        self.inner.read().unwrap().by_key.get(pubkey).cloned()
    }

    /// Look a peer up by node id.
    pub fn lookup_by_id(&self, id: NodeId) -> Option<Arc<Peer>> {
        self.inner.read().unwrap().by_id.get(&id).cloned()
    }

    /// Insert a peer, evicting any prior peer holding the same id or
    /// key under a different mapping.
    pub fn insert(&self, pubkey: PublicKey, id: NodeId, is_super: bool) -> Arc<Peer> {
        let mut inner = self.inner.write().unwrap();
        if let Some(prior) = inner.by_id.get(&id).cloned() {
            if prior.pubkey != pubkey {
                Self::remove_locked(&mut inner, &prior.pubkey);
            }
        }
        if let Some(prior) = inner.by_key.get(&pubkey).cloned() {
            if prior.id != id {
                Self::remove_locked(&mut inner, &pubkey);
            }
        }
        if let Some(existing) = inner.by_key.get(&pubkey).cloned() {
            return existing;
        }

        let peer = Arc::new(Peer::new(pubkey, id));
        inner.by_id.insert(id, Arc::clone(&peer));
        inner.by_key.insert(pubkey, Arc::clone(&peer));
        if is_super {
            inner.super_peers.push(Arc::clone(&peer));
        }
        debug!(peer = %id, is_super, "inserted peer");
        peer
    }

    /// Insert a statically configured peer with its connect URL.
    pub fn insert_static(
        &self,
        pubkey: PublicKey,
        id: NodeId,
        conn_url: &str,
        af: AddressFamily,
    ) -> Arc<Peer> {
        let mut inner = self.inner.write().unwrap();
        Self::remove_locked(&mut inner, &pubkey);
        if let Some(prior) = inner.by_id.get(&id).cloned() {
            Self::remove_locked(&mut inner, &prior.pubkey);
        }

        let mut peer = Peer::new(pubkey, id);
        peer.is_static = true;
        peer.preferred_af = af;
        peer.conn_url = Some(conn_url.to_string());
        let peer = Arc::new(peer);
        inner.by_id.insert(id, Arc::clone(&peer));
        inner.by_key.insert(pubkey, Arc::clone(&peer));
        debug!(peer = %id, conn_url, "inserted static peer");
        peer
    }

    /// Remove the peer holding `pubkey`.
    pub fn remove(&self, pubkey: &PublicKey) -> Option<Arc<Peer>> {
        let mut inner = self.inner.write().unwrap();
        Self::remove_locked(&mut inner, pubkey)
    }

    fn remove_locked(inner: &mut RegistryInner, pubkey: &PublicKey) -> Option<Arc<Peer>> {
        let peer = inner.by_key.remove(pubkey)?;
        inner.by_id.remove(&peer.id);
        inner.super_peers.retain(|p| p.pubkey != *pubkey);
        debug!(peer = %peer.id, "removed peer");
        Some(peer)
    }

    /// Ids of every known peer.
    pub fn snapshot_ids(&self) -> Vec<NodeId> {
        self.inner.read().unwrap().by_id.keys().copied().collect()
    }

    /// Every known peer.
    pub fn snapshot_peers(&self) -> Vec<Arc<Peer>> {
        self.inner.read().unwrap().by_id.values().cloned().collect()
    }

    /// The configured super-peers.
    pub fn snapshot_super_peers(&self) -> Vec<Arc<Peer>> {
        self.inner.read().unwrap().super_peers.clone()
    }

    /// The super-node's current peer-set version as we know it.
    pub fn peer_state(&self) -> StateHash {
        self.inner.read().unwrap().peer_state
    }

    /// Record a newly fetched peer-set version.
    pub fn set_peer_state(&self, hash: StateHash) {
        self.inner.write().unwrap().peer_state = hash;
    }

    /// Local addresses advertised at registration.
    pub fn local_addrs(&self) -> (Option<IpAddr>, Option<IpAddr>) {
        let inner = self.inner.read().unwrap();
        (inner.local_v4, inner.local_v6)
    }

    /// Record the local addresses this node believes itself to own.
    pub fn set_local_addrs(&self, v4: Option<IpAddr>, v6: Option<IpAddr>) {
        let mut inner = self.inner.write().unwrap();
        inner.local_v4 = v4;
        inner.local_v6 = v6;
    }

    /// Number of known peers.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap().by_id.len()
    }

    /// Whether no peers are known.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
