//! Opaque identifiers for sessions and chunk sets.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::envelope::RequestId;

/// Session identifier, unique for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Chunk set identifier, derived from the request that produced the result.
///
/// Format: `blk-<request-id>-<random>`. The random suffix keeps ids unique
/// because request ids are only unique per caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkSetId(String);

impl ChunkSetId {
    /// Derives a new identifier for a result of `request_id`.
    #[must_use]
    pub fn for_request(request_id: &RequestId) -> Self {
        let sanitized: String = request_id
            .to_string()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .take(32)
            .collect();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        Self(format!("blk-{sanitized}-{}", &suffix[..12]))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ChunkSetId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ChunkSetId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ChunkSetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
