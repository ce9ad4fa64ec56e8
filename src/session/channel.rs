//! Per-session event stream channel.
//!
//! The transport owns the receiving half of a session's connection; the core
//! only keeps the sending half. When the transport drops its receiver the
//! connection is gone and pushes fail without queueing anything.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use super::registry::{SessionRegistry, Undelivered};
use crate::core::{Event, EventKind, SessionId};

/// Receiving half of a session connection, held by the transport.
pub type EventReceiver = mpsc::Receiver<Event>;

/// Sending half of a session connection, held by the session record.
#[derive(Debug, Clone)]
pub struct Connection {
    sender: mpsc::Sender<Event>,
    peer: Option<String>,
}

impl Connection {
    /// Creates a connection with room for `buffer` undelivered events.
    ///
    /// The returned receiver must be drained by the transport.
    #[must_use]
    pub fn channel(buffer: usize, peer: Option<String>) -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self { sender, peer }, receiver)
    }

    /// Peer description supplied by the transport, for logging.
    #[must_use]
    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    pub(crate) async fn send(&self, event: Event) -> Result<(), Event> {
        self.sender.send(event).await.map_err(|e| e.0)
    }
}

/// Pushes events to sessions by id.
#[derive(Clone)]
pub struct EventChannel {
    registry: SessionRegistry,
    send_timeout: Duration,
}

impl EventChannel {
    /// Creates a channel over the given registry.
    ///
    /// A push that cannot hand its event over within `send_timeout` closes
    /// the session.
    #[must_use]
    pub const fn new(registry: SessionRegistry, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
        }
    }

    /// Pushes an event to a session.
    ///
    /// Returns the sequence number assigned to the event, or `None` if the
    /// session is unknown, closed, or its connection is gone. Failures are
    /// logged and never reported to the caller as errors.
    pub async fn push(&self, session_id: &SessionId, kind: EventKind, payload: Value) -> Option<u64> {
        let Some(session) = self.registry.lookup(session_id).await else {
            warn!(%session_id, kind = kind.as_str(), "dropping event for unknown session");
            return None;
        };
        match session.emit(kind, payload, self.send_timeout).await {
            Ok(sequence) => Some(sequence),
            Err(reason) => {
                warn!(%session_id, kind = kind.as_str(), reason = reason.as_str(), "event dropped");
                if reason == Undelivered::Stalled {
                    self.registry.close(session_id).await;
                }
                None
            }
        }
    }
}
