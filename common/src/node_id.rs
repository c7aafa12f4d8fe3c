// Copyright (c) 2024 Botho Foundation

//! The overlay node identifier type.

use core::fmt::{Display, Formatter, Result as FmtResult};
use serde::{Deserialize, Serialize};

/// Identifier of a node within a single overlay.
///
/// The top of the 16-bit space is reserved: [`NodeId::BROADCAST`],
/// [`NodeId::CONTROL`] and [`NodeId::SUPER`] are destination sentinels,
/// and any id at or above [`NodeId::SPECIAL_START`] is never advertised
/// as a neighbor.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
#[serde(transparent)]
pub struct NodeId(pub u16);

impl NodeId {
    /// Destination of packets addressed to every node in the overlay.
    pub const BROADCAST: NodeId = NodeId(u16::MAX);

    /// Destination of control messages flooded between peers.
    pub const CONTROL: NodeId = NodeId(u16::MAX - 1);

    /// Destination of messages exchanged with a super-node.
    pub const SUPER: NodeId = NodeId(u16::MAX - 2);

    /// First id of the reserved range.
    pub const SPECIAL_START: NodeId = NodeId(u16::MAX - 3);

    /// Whether this id falls in the reserved range and therefore must
    /// not be advertised as a neighbor.
    pub fn is_special(self) -> bool {
        self >= Self::SPECIAL_START
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        if *self == Self::BROADCAST {
            write!(f, "broadcast")
        } else if *self == Self::CONTROL {
            write!(f, "control")
        } else if *self == Self::SUPER {
            write!(f, "super")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<u16> for NodeId {
    fn from(id: u16) -> Self {
        NodeId(id)
    }
}

impl From<NodeId> for u16 {
    fn from(id: NodeId) -> Self {
        id.0
    }
}

impl From<NodeId> for u32 {
    fn from(id: NodeId) -> Self {
        u32::from(id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_partition() {
        assert_eq!(NodeId::BROADCAST.0, 0xFFFF);
        assert_eq!(NodeId::CONTROL.0, 0xFFFE);
        assert_eq!(NodeId::SUPER.0, 0xFFFD);
        assert_eq!(NodeId::SPECIAL_START.0, 0xFFFC);
    }

    #[test]
    fn test_is_special() {
        assert!(NodeId::BROADCAST.is_special());
        assert!(NodeId::CONTROL.is_special());
        assert!(NodeId::SUPER.is_special());
        assert!(NodeId::SPECIAL_START.is_special());
        assert!(!NodeId(0xFFFB).is_special());
        assert!(!NodeId(1).is_special());
    }

    #[test]
    fn test_display() {
        assert_eq!(NodeId(7).to_string(), "7");
        assert_eq!(NodeId::SUPER.to_string(), "super");
        assert_eq!(NodeId::BROADCAST.to_string(), "broadcast");
    }

    #[test]
    fn test_serde_transparent() {
        let json = serde_json::to_string(&NodeId(42)).unwrap();
        assert_eq!(json, "42");
        let id: NodeId = serde_json::from_str("42").unwrap();
        assert_eq!(id, NodeId(42));
    }

    #[test]
    fn test_usable_as_map_key() {
        use std::collections::BTreeMap;

        let mut table: BTreeMap<NodeId, NodeId> = BTreeMap::new();
        table.insert(NodeId(1), NodeId(2));
        let json = serde_json::to_string(&table).unwrap();
        let back: BTreeMap<NodeId, NodeId> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);
    }
}
