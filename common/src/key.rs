// Copyright (c) 2024 Botho Foundation

//! Key material identifying peers on the encrypted transport.
//!
//! The overlay never performs cryptography itself; keys are opaque
//! 32-byte identifiers handed to the tunnel layer. They travel base64
//! encoded (inside control messages, in super-node API URLs, and in the
//! API's JSON maps), so both newtypes serialize as base64 strings.

use core::fmt::{Debug, Display, Formatter, Result as FmtResult};
use displaydoc::Display as DisplayDoc;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Length in bytes of a static public key or a pre-shared key.
pub const KEY_LEN: usize = 32;

/// Errors converting text into key material.
#[derive(Clone, Copy, Debug, DisplayDoc, Eq, Error, PartialEq)]
pub enum KeyError {
    /// Input is not valid base64
    InvalidEncoding,
    /// Decoded input is not exactly 32 bytes
    InvalidLength,
}

fn decode_key(s: &str) -> Result<[u8; KEY_LEN], KeyError> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(s)
        .map_err(|_| KeyError::InvalidEncoding)?;
    bytes.try_into().map_err(|_| KeyError::InvalidLength)
}

fn encode_key(bytes: &[u8; KEY_LEN]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

macro_rules! key_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub struct $name(pub [u8; KEY_LEN]);

        impl $name {
            /// Parse from standard base64.
            pub fn from_base64(s: &str) -> Result<Self, KeyError> {
                decode_key(s).map(Self)
            }

            /// Standard base64 rendering, as used in URLs and API maps.
            pub fn to_base64(&self) -> String {
                encode_key(&self.0)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl From<[u8; KEY_LEN]> for $name {
            fn from(bytes: [u8; KEY_LEN]) -> Self {
                Self(bytes)
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
                write!(f, "{}", self.to_base64())
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
                write!(f, concat!(stringify!($name), "({})"), self.to_base64())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&self.to_base64())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Self::from_base64(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

key_newtype! {
    /// A peer's static public key on the encrypted transport.
    PublicKey
}

key_newtype! {
    /// An optional pre-shared key mixed into a peer's handshake.
    PresharedKey
}
