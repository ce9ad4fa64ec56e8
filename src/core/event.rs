//! Events pushed from the server to a session's stream.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::SessionId;

/// Kind of event carried on a session stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A complete JSON-RPC response delivered inline.
    Message,
    /// A large result was staged; the payload names the chunk set.
    BlocksAvailable,
    /// A protocol-level failure for a request.
    Error,
}

impl EventKind {
    /// Returns the wire name used as the SSE `event:` field.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::BlocksAvailable => "blocks_available",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event addressed to one session.
///
/// `sequence` is assigned when the event is pushed and is strictly
/// increasing, without gaps, within a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// Owning session.
    pub session_id: SessionId,
    /// Event kind.
    pub kind: EventKind,
    /// JSON payload.
    pub payload: Value,
    /// Per-session sequence number, starting at 1.
    pub sequence: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_wire_names() {
        assert_eq!(EventKind::Message.as_str(), "message");
        assert_eq!(EventKind::BlocksAvailable.as_str(), "blocks_available");
        assert_eq!(format!("{}", EventKind::Error), "error");
    }

    #[test]
    fn test_event_kind_serde_matches_wire_name() {
        let json = serde_json::to_string(&EventKind::BlocksAvailable).unwrap_or_default();
        assert_eq!(json, "\"blocks_available\"");
    }
}
