// Copyright (c) 2024 Botho Foundation

//! Shared primitive types for the Ethermesh overlay.
//!
//! This crate holds the small, dependency-light types that every layer of
//! the overlay agrees on:
//!
//! - [`NodeId`]: the 16-bit overlay node identifier and its reserved
//!   sentinel values
//! - [`PublicKey`] / [`PresharedKey`]: 32-byte key material identifying
//!   peers on the encrypted transport
//! - [`MacAddress`]: layer-2 addresses consumed by the forwarding base
//! - [`StateHash`](hash::StateHash): 32-byte identifiers naming a version
//!   of shared control-plane state

#![warn(missing_docs)]
#![warn(unused_extern_crates)]

pub mod hash;
pub mod key;
pub mod mac;
pub mod node_id;

pub use hash::{abbreviate_hash, StateHash};
pub use key::{KeyError, PresharedKey, PublicKey};
pub use mac::{MacAddress, MacParseError};
pub use node_id::NodeId;
