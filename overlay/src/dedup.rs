// Copyright (c) 2024 Botho Foundation

//! Broadcast storm suppression.

use crc::{Crc, CRC_32_ISCSI};
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// Bounded set of recently seen packet checksums.
///
/// Eviction is FIFO at a fixed capacity, so the retention window is
/// exactly the last `capacity` distinct packets.
#[derive(Debug)]
pub struct DupFilter {
    inner: Mutex<DupInner>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct DupInner {
    seen: HashSet<u32>,
    order: VecDeque<u32>,
}

impl DupFilter {
    /// Create a filter remembering up to `capacity` packets.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(DupInner::default()),
            capacity: capacity.max(1),
        }
    }

    /// Atomically test-and-record `packet`.
    ///
    /// Returns `true` exactly once per packet within the retention
    /// window; the caller drops the packet on `false`.
    pub fn check_no_dup(&self, packet: &[u8]) -> bool {
        let checksum = CASTAGNOLI.checksum(packet);
        let mut inner = self.inner.lock().unwrap();
        if !inner.seen.insert(checksum) {
            return false;
        }
        inner.order.push_back(checksum);
        if inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.seen.remove(&evicted);
            }
        }
        true
    }

    /// Number of checksums currently remembered.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().order.len()
    }

    /// Whether nothing is remembered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sighting_passes_second_drops() {
        let filter = DupFilter::new(16);
        assert!(filter.check_no_dup(b"packet"));
        assert!(!filter.check_no_dup(b"packet"));
        assert!(filter.check_no_dup(b"other"));
    }

    #[test]
    fn test_capacity_bound() {
        let filter = DupFilter::new(2);
        assert!(filter.check_no_dup(b"a"));
        assert!(filter.check_no_dup(b"b"));
        assert!(filter.check_no_dup(b"c"));
        assert_eq!(filter.len(), 2);
        // "a" was evicted and passes again.
        assert!(filter.check_no_dup(b"a"));
    }
}
