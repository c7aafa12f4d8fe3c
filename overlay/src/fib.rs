// Copyright (c) 2024 Botho Foundation

//! The layer-2 forwarding information base.
//!
//! The data plane learns source MACs from decapsulated frames and looks
//! destinations up here; the control plane only ages entries out.

use ethermesh_common::{MacAddress, NodeId};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// One learned mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FibEntry {
    /// Node behind the MAC.
    pub node_id: NodeId,
    /// When a frame from the MAC was last seen.
    pub last_seen: SystemTime,
}

/// MAC address to overlay node mapping with TTL aging.
#[derive(Debug, Default)]
pub struct L2Fib {
    entries: Mutex<HashMap<MacAddress, FibEntry>>,
}

impl L2Fib {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `mac` was seen behind `node_id` at `now`.
    pub fn learn(&self, mac: MacAddress, node_id: NodeId, now: SystemTime) {
        self.entries
            .lock()
            .unwrap()
            .insert(mac, FibEntry { node_id, last_seen: now });
    }

    /// The node behind `mac`, if known.
    pub fn lookup(&self, mac: &MacAddress) -> Option<NodeId> {
        self.entries.lock().unwrap().get(mac).map(|e| e.node_id)
    }

    /// Drop entries not refreshed within `timeout` of `now`.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self, timeout: Duration, now: SystemTime) -> usize {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, entry| entry.last_seen + timeout > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "aged out forwarding entries");
        }
        removed
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
