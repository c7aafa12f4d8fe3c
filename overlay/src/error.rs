// Copyright (c) 2024 Botho Foundation

//! Error types for the overlay control plane.

use displaydoc::Display;
use thiserror::Error;

/// Errors that can occur in the overlay control plane.
#[derive(Debug, Display, Error)]
pub enum Error {
    /// Malformed control message: {0}
    Parse(String),

    /// Message kind {0} is not accepted by this node role
    InvalidMessageKind(u8),

    /// Packet too short for the overlay header
    TruncatedHeader,

    /// Packet body shorter than the declared payload length
    TruncatedBody,

    /// Transport failure: {0}
    Transport(String),

    /// Super-node state fetch failed with status {0}
    StateDivergence(u16),

    /// HTTP error: {0}
    Http(String),

    /// Event channel closed
    ChannelClosed,
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Http(err.to_string())
    }
}

/// Result type for overlay operations.
pub type Result<T> = core::result::Result<T, Error>;
