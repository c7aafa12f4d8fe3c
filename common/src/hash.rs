// Copyright (c) 2024 Botho Foundation

//! 32-byte state hashes naming versions of shared control-plane state.

/// Identifier of a version of the peer set or of the next-hop table.
pub type StateHash = [u8; 32];

/// Abbreviated rendering for log lines: the first 10 base64 characters
/// followed by an ellipsis, or `""` for the all-zero hash.
pub fn abbreviate_hash(hash: &StateHash) -> String {
    use base64::Engine;
    if hash.iter().all(|b| *b == 0) {
        return "\"\"".to_owned();
    }
    let full = base64::engine::general_purpose::STANDARD.encode(hash);
    format!("{}...", &full[..10])
}

/// Serde helpers encoding a [`StateHash`] as a hex string.
pub mod hex_serde {
    use super::StateHash;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Encode the hash as lowercase hex.
    pub fn serialize<S: Serializer>(hash: &StateHash, serializer: S) -> Result<S::Ok, S::Error> {
        hex::encode(hash).serialize(serializer)
    }

    /// Decode a hash from hex.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<StateHash, D::Error> {
        let text = String::deserialize(deserializer)?;
        let bytes = hex::decode(&text).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("hash is not 32 bytes"))
    }
}
