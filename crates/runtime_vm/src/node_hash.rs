//! # Checkpoint Results
//!
//! [`NodeHash`] is the content-addressed identifier of a replayed machine
//! state. It is what a node commits to and what a challenger recomputes.
//! [`CheckpointOutcome`] carries the node hash together with the digests
//! of the three things it was derived from, for logging and audit.
//!
//! `NodeHash` serializes as a lowercase hex string so it can travel through
//! JSON unchanged.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// 32-byte checkpoint root.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeHash([u8; 32]);

impl NodeHash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for NodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeHash({})", self.to_hex())
    }
}

/// Error returned when parsing a [`NodeHash`] from text.
#[derive(Debug, thiserror::Error)]
pub enum ParseNodeHashError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("expected 32 bytes, got {0}")]
    Length(usize),
}

impl FromStr for NodeHash {
    type Err = ParseNodeHashError;

    /// Accepts 64 hex characters with or without a `0x` prefix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(trimmed)?;
        let len = bytes.len();
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ParseNodeHashError::Length(len))?;
        Ok(Self(arr))
    }
}

impl Serialize for NodeHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for NodeHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Full result of a checkpoint computation.
///
/// Only `node_hash` is commitment-critical. The digests identify which
/// program, model and input produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointOutcome {
    pub node_hash: NodeHash,
    /// Instruction step the root was taken at. Always 0 for checkpoint zero.
    pub step: u64,
    pub program_digest: [u8; 32],
    pub model_digest: [u8; 32],
    pub input_digest: [u8; 32],
    /// Number of non-zero pages in the committed state.
    pub committed_pages: usize,
}
