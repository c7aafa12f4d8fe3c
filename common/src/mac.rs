// Copyright (c) 2024 Botho Foundation

//! Layer-2 addresses, consumed by the overlay's forwarding base.

use core::fmt::{Display, Formatter, Result as FmtResult};
use core::str::FromStr;
use displaydoc::Display as DisplayDoc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors parsing textual MAC addresses.
#[derive(Clone, Copy, Debug, DisplayDoc, Eq, Error, PartialEq)]
pub enum MacParseError {
    /// Expected six colon-separated octets
    InvalidStructure,
    /// An octet is not two hex digits
    InvalidOctet,
}

/// An Ethernet MAC address.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Whether the address has the group (multicast/broadcast) bit set.
    pub fn is_multicast(&self) -> bool {
        self.0[0] & 0x01 != 0
    }
}

impl Display for MacAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let o = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = MacParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split(':');
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or(MacParseError::InvalidStructure)?;
            if part.len() != 2 {
                return Err(MacParseError::InvalidOctet);
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| MacParseError::InvalidOctet)?;
        }
        if parts.next().is_some() {
            return Err(MacParseError::InvalidStructure);
        }
        Ok(MacAddress(octets))
    }
}
