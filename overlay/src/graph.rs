// Copyright (c) 2024 Botho Foundation

//! The weighted latency graph and the next-hop table derived from it.
//!
//! Vertices are node ids, directed edges are measured latencies. The
//! next-hop table is recomputed locally (all-pairs shortest paths) or
//! installed wholesale from a super-node; either way it is replaced
//! atomically together with its 32-byte content hash.

use ethermesh_common::{NodeId, StateHash};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::RwLock;
use std::time::{Duration, SystemTime};
use tracing::{debug, trace};

/// An edge weight: a measured latency.
pub type Latency = Duration;

/// Sentinel weight of an edge with no usable measurement.
pub const INFINITY: Latency = Duration::MAX;

/// The next-hop table: `(src, dst) → next hop`.
pub type NextHopTable = BTreeMap<NodeId, BTreeMap<NodeId, NodeId>>;

#[derive(Debug)]
struct GraphInner {
    edges: BTreeMap<NodeId, BTreeMap<NodeId, Latency>>,
    edges_dirty: bool,
    nh_table: NextHopTable,
    nh_hash: StateHash,
    nh_expire: SystemTime,
}

/// Thread-safe latency graph with a derived next-hop table.
#[derive(Debug)]
pub struct RoutingGraph {
    inner: RwLock<GraphInner>,
    info_timeout: Duration,
}

impl RoutingGraph {
    /// Create an empty graph whose next-hop table stays fresh for
    /// `info_timeout` after each recompute or install.
    pub fn new(info_timeout: Duration) -> Self {
        Self {
            inner: RwLock::new(GraphInner {
                edges: BTreeMap::new(),
                edges_dirty: false,
                nh_table: NextHopTable::new(),
                nh_hash: [0u8; 32],
                nh_expire: SystemTime::UNIX_EPOCH,
            }),
            info_timeout,
        }
    }

    /// The graph's clock, shared with latency measurements.
    pub fn current_time(&self) -> SystemTime {
        SystemTime::now()
    }

    /// The weight of the directed edge `(u, v)`.
    pub fn weight(&self, u: NodeId, v: NodeId) -> Latency {
        self.inner
            .read()
            .unwrap()
            .edges
            .get(&u)
            .and_then(|row| row.get(&v))
            .copied()
            .unwrap_or(INFINITY)
    }

    /// Set the directed edge `(u, v)` to `latency`.
    ///
    /// Symmetric measurements are two calls. When `propagate` is set and
    /// the write is not machinery-internal, the edge set is marked dirty
    /// so the next non-forced recompute runs even before expiry.
    pub fn update_latency(
        &self,
        u: NodeId,
        v: NodeId,
        latency: Latency,
        propagate: bool,
        internal: bool,
    ) {
        let mut inner = self.inner.write().unwrap();
        inner.edges.entry(u).or_default().insert(v, latency);
        if propagate && !internal {
            inner.edges_dirty = true;
        }
        trace!(%u, %v, ?latency, "updated edge");
    }

    /// Current version hash of the next-hop table.
    pub fn nh_hash(&self) -> StateHash {
        self.inner.read().unwrap().nh_hash
    }

    /// Instant after which the next-hop table counts as stale.
    pub fn nh_expire(&self) -> SystemTime {
        self.inner.read().unwrap().nh_expire
    }

    /// Whether the next-hop table is past its freshness window.
    pub fn nh_expired(&self, now: SystemTime) -> bool {
        now > self.nh_expire()
    }

    /// Push the freshness window forward without touching the table.
    pub fn extend_nh_expire(&self) {
        let mut inner = self.inner.write().unwrap();
        inner.nh_expire = SystemTime::now() + self.info_timeout;
    }

    /// The next hop on the path from `src` to `dst`.
    pub fn next_hop(&self, src: NodeId, dst: NodeId) -> Option<NodeId> {
        self.inner
            .read()
            .unwrap()
            .nh_table
            .get(&src)
            .and_then(|row| row.get(&dst))
            .copied()
    }

    /// Install a next-hop table with its version hash.
    pub fn set_next_hop(&self, table: NextHopTable, hash: StateHash) {
        let mut inner = self.inner.write().unwrap();
        inner.nh_table = table;
        inner.nh_hash = hash;
        inner.nh_expire = SystemTime::now() + self.info_timeout;
        debug!("installed next-hop table");
    }

    /// Recompute the next-hop table from the current edge set.
    ///
    /// Non-forced runs are skipped while the table is fresh and the
    /// edges unchanged. Returns whether the table content changed.
    pub fn recompute_next_hop(&self, force: bool) -> bool {
        let now = SystemTime::now();
        let mut inner = self.inner.write().unwrap();
        if !force && now <= inner.nh_expire && !inner.edges_dirty {
            return false;
        }

        let table = Self::all_pairs_next_hops(&inner.edges);
        let hash = hash_next_hop_table(&table);
        let changed = hash != inner.nh_hash;
        inner.nh_table = table;
        inner.nh_hash = hash;
        inner.nh_expire = now + self.info_timeout;
        inner.edges_dirty = false;
        if changed {
            debug!("next-hop table changed");
        }
        changed
    }

    // Floyd-Warshall over the finite edges. Infinite edges mean "no
    // usable link" and never contribute to a path.
    fn all_pairs_next_hops(edges: &BTreeMap<NodeId, BTreeMap<NodeId, Latency>>) -> NextHopTable {
        let mut vertices: BTreeSet<NodeId> = BTreeSet::new();
        for (u, row) in edges {
            vertices.insert(*u);
            vertices.extend(row.keys().copied());
        }
        let vertices: Vec<NodeId> = vertices.into_iter().collect();

        let mut dist: HashMap<(NodeId, NodeId), f64> = HashMap::new();
        let mut next: HashMap<(NodeId, NodeId), NodeId> = HashMap::new();
        for (u, row) in edges {
            for (v, weight) in row {
                if *weight != INFINITY {
                    dist.insert((*u, *v), weight.as_secs_f64());
                    next.insert((*u, *v), *v);
                }
            }
        }

        for k in &vertices {
            for u in &vertices {
                let Some(&first) = dist.get(&(*u, *k)) else {
                    continue;
                };
                for v in &vertices {
                    let Some(&second) = dist.get(&(*k, *v)) else {
                        continue;
                    };
                    let through = first + second;
                    if dist.get(&(*u, *v)).map_or(true, |&cur| through < cur) {
                        dist.insert((*u, *v), through);
                        let hop = next[&(*u, *k)];
                        next.insert((*u, *v), hop);
                    }
                }
            }
        }

        let mut table = NextHopTable::new();
        for ((u, v), hop) in next {
            if u == v {
                continue;
            }
            table.entry(u).or_default().insert(v, hop);
        }
        table
    }

    /// The spanning-tree fan-out from `self_id`: the distinct first hops
    /// toward every reachable destination.
    pub fn broadcast_list(&self, self_id: NodeId) -> HashMap<NodeId, bool> {
        let inner = self.inner.read().unwrap();
        let mut list = HashMap::new();
        if let Some(row) = inner.nh_table.get(&self_id) {
            for hop in row.values() {
                list.insert(*hop, true);
            }
        }
        list
    }

    /// The peers a transiting broadcast from `src_id`, arriving via
    /// `in_id`, should be forwarded to from `self_id`.
    pub fn broadcast_through_list(
        &self,
        self_id: NodeId,
        in_id: NodeId,
        src_id: NodeId,
    ) -> HashSet<NodeId> {
        let mut list = HashSet::new();
        for candidate in self.broadcast_list(self_id).into_keys() {
            if candidate == in_id {
                continue;
            }
            if self.path(src_id, candidate).contains(&self_id) {
                list.insert(candidate);
            }
        }
        list
    }

    /// The chain of hops from `src` to `dst` per the next-hop table,
    /// ending with `dst`. Empty when no path is known. The walk is
    /// bounded so a looping table cannot hang it.
    pub fn path(&self, src: NodeId, dst: NodeId) -> Vec<NodeId> {
        let inner = self.inner.read().unwrap();
        let mut hops = Vec::new();
        let mut at = src;
        let max_hops = inner.nh_table.len() + 1;
        while at != dst {
            let Some(hop) = inner.nh_table.get(&at).and_then(|row| row.get(&dst)) else {
                return Vec::new();
            };
            hops.push(*hop);
            at = *hop;
            if hops.len() > max_hops {
                return Vec::new();
            }
        }
        hops
    }
}

/// Deterministic content hash of a next-hop table.
pub fn hash_next_hop_table(table: &NextHopTable) -> StateHash {
    let bytes = serde_json::to_vec(table).expect("ordered map of integers serializes");
    let digest = Sha256::digest(&bytes);
    digest.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(millis: u64) -> Latency {
        Duration::from_millis(millis)
    }

    /// 1 → 2 → 3 line, symmetric.
    fn line_graph() -> RoutingGraph {
        let graph = RoutingGraph::new(Duration::from_secs(60));
        graph.update_latency(NodeId(1), NodeId(2), ms(10), true, false);
        graph.update_latency(NodeId(2), NodeId(1), ms(10), true, false);
        graph.update_latency(NodeId(2), NodeId(3), ms(10), true, false);
        graph.update_latency(NodeId(3), NodeId(2), ms(10), true, false);
        graph
    }

    #[test]
    fn test_missing_edge_is_infinite() {
        let graph = RoutingGraph::new(Duration::from_secs(60));
        assert_eq!(graph.weight(NodeId(1), NodeId(2)), INFINITY);
    }

    #[test]
    fn test_edges_are_directed() {
        let graph = RoutingGraph::new(Duration::from_secs(60));
        graph.update_latency(NodeId(1), NodeId(2), ms(5), true, false);
        assert_eq!(graph.weight(NodeId(1), NodeId(2)), ms(5));
        assert_eq!(graph.weight(NodeId(2), NodeId(1)), INFINITY);
    }

    #[test]
    fn test_recompute_line_topology() {
        let graph = line_graph();
        assert!(graph.recompute_next_hop(true));

        assert_eq!(graph.next_hop(NodeId(1), NodeId(2)), Some(NodeId(2)));
        assert_eq!(graph.next_hop(NodeId(1), NodeId(3)), Some(NodeId(2)));
        assert_eq!(graph.next_hop(NodeId(3), NodeId(1)), Some(NodeId(2)));
    }

    #[test]
    fn test_shorter_path_wins() {
        let graph = line_graph();
        // Direct 1 → 3, but slower than the two-hop path.
        graph.update_latency(NodeId(1), NodeId(3), ms(100), true, false);
        graph.recompute_next_hop(true);
        assert_eq!(graph.next_hop(NodeId(1), NodeId(3)), Some(NodeId(2)));

        // Make the direct link fast and it takes over.
        graph.update_latency(NodeId(1), NodeId(3), ms(1), true, false);
        graph.recompute_next_hop(true);
        assert_eq!(graph.next_hop(NodeId(1), NodeId(3)), Some(NodeId(3)));
    }

    #[test]
    fn test_infinite_edges_produce_no_routes() {
        let graph = RoutingGraph::new(Duration::from_secs(60));
        graph.update_latency(NodeId(1), NodeId(2), INFINITY, true, false);
        graph.recompute_next_hop(true);
        assert_eq!(graph.next_hop(NodeId(1), NodeId(2)), None);
    }

    #[test]
    fn test_hash_is_pure_function_of_table() {
        let first = line_graph();
        let second = line_graph();
        first.recompute_next_hop(true);
        second.recompute_next_hop(true);
        assert_eq!(first.nh_hash(), second.nh_hash());

        second.update_latency(NodeId(1), NodeId(4), ms(1), true, false);
        second.update_latency(NodeId(4), NodeId(1), ms(1), true, false);
        second.recompute_next_hop(true);
        assert_ne!(first.nh_hash(), second.nh_hash());
    }

    #[test]
    fn test_recompute_reports_change() {
        let graph = line_graph();
        assert!(graph.recompute_next_hop(true));
        // Same edges, same table.
        assert!(!graph.recompute_next_hop(true));
    }

    #[test]
    fn test_non_forced_recompute_waits_for_expiry() {
        let graph = line_graph();
        graph.recompute_next_hop(true);
        // Fresh table, clean edges: nothing to do.
        assert!(!graph.recompute_next_hop(false));

        // A propagated edge change marks the set dirty.
        graph.update_latency(NodeId(1), NodeId(5), ms(2), true, false);
        graph.update_latency(NodeId(5), NodeId(1), ms(2), true, false);
        assert!(graph.recompute_next_hop(false));
    }

    #[test]
    fn test_internal_update_does_not_dirty() {
        let graph = line_graph();
        graph.recompute_next_hop(true);
        graph.update_latency(NodeId(1), NodeId(9), INFINITY, true, true);
        assert!(!graph.recompute_next_hop(false));
    }

    #[test]
    fn test_set_next_hop_installs_table_and_hash() {
        let graph = RoutingGraph::new(Duration::from_secs(60));
        let mut table = NextHopTable::new();
        table.entry(NodeId(1)).or_default().insert(NodeId(3), NodeId(2));
        let hash = hash_next_hop_table(&table);

        graph.set_next_hop(table, hash);
        assert_eq!(graph.nh_hash(), hash);
        assert_eq!(graph.next_hop(NodeId(1), NodeId(3)), Some(NodeId(2)));
        assert!(!graph.nh_expired(SystemTime::now()));
    }

    #[test]
    fn test_extend_expire() {
        let graph = RoutingGraph::new(Duration::from_secs(60));
        assert!(graph.nh_expired(SystemTime::now()));
        graph.extend_nh_expire();
        assert!(!graph.nh_expired(SystemTime::now()));
    }

    #[test]
    fn test_broadcast_list_is_first_hops() {
        let graph = line_graph();
        graph.recompute_next_hop(true);

        // From node 1 everything funnels through node 2.
        let list = graph.broadcast_list(NodeId(1));
        assert_eq!(list.len(), 1);
        assert!(list[&NodeId(2)]);

        // Node 2 fans out to both ends.
        let list = graph.broadcast_list(NodeId(2));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_broadcast_through_list() {
        let graph = line_graph();
        graph.recompute_next_hop(true);

        // A broadcast from 1 arriving at 2 continues to 3 but never
        // back toward 1.
        let through = graph.broadcast_through_list(NodeId(2), NodeId(1), NodeId(1));
        assert_eq!(through, HashSet::from([NodeId(3)]));
    }

    #[test]
    fn test_path_walk() {
        let graph = line_graph();
        graph.recompute_next_hop(true);
        assert_eq!(graph.path(NodeId(1), NodeId(3)), vec![NodeId(2), NodeId(3)]);
        assert!(graph.path(NodeId(1), NodeId(9)).is_empty());
    }
}
