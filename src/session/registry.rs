//! Session registry.
//!
//! The registry is responsible for:
//! - Opening sessions up to a configured ceiling
//! - Looking up sessions and tracking their last activity
//! - Tracking outstanding requests per session
//! - Closing sessions, which cancels everything they have in flight

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::channel::Connection;
use crate::core::{Event, EventKind, SessionId};
use crate::error::SessionError;

// ============================================================================
// Session
// ============================================================================

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Accepting requests.
    Open = 0,
    /// Teardown started; in-flight work is being cancelled.
    Draining = 1,
    /// Removed from the registry.
    Closed = 2,
}

impl SessionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Open,
            1 => Self::Draining,
            _ => Self::Closed,
        }
    }
}

struct Writer {
    connection: Connection,
    next_sequence: u64,
}

/// Server-side state of one client connection.
pub struct Session {
    id: SessionId,
    created_at: DateTime<Utc>,
    writer: Mutex<Writer>,
    outstanding: AtomicUsize,
    state: AtomicU8,
    epoch: Instant,
    last_activity_ms: AtomicU64,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("state", &self.state())
            .field("outstanding", &self.outstanding())
            .finish_non_exhaustive()
    }
}

impl Session {
    fn new(id: SessionId, connection: Connection) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            writer: Mutex::new(Writer {
                connection,
                next_sequence: 1,
            }),
            outstanding: AtomicUsize::new(0),
            state: AtomicU8::new(SessionState::Open as u8),
            epoch: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    /// Session identifier.
    #[must_use]
    pub const fn id(&self) -> &SessionId {
        &self.id
    }

    /// Creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Number of requests currently in flight.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Token cancelled when the session closes.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Time since the last recorded activity.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        let last = self.epoch + Duration::from_millis(self.last_activity_ms.load(Ordering::Acquire));
        Instant::now().saturating_duration_since(last)
    }

    fn touch(&self) {
        let elapsed = u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_activity_ms.fetch_max(elapsed, Ordering::AcqRel);
    }

    /// Emits an event under the session's writer lock.
    ///
    /// The sequence number is only consumed when the event was handed to the
    /// connection, so delivered sequences never have gaps. A client that
    /// stops reading fills its buffer; the send then waits at most `timeout`
    /// and is abandoned as soon as the session closes.
    pub(crate) async fn emit(
        &self,
        kind: EventKind,
        payload: Value,
        timeout: Duration,
    ) -> Result<u64, Undelivered> {
        if self.state() == SessionState::Closed {
            return Err(Undelivered::Closed);
        }

        let send = async {
            let mut writer = self.writer.lock().await;
            let sequence = writer.next_sequence;
            let event = Event {
                session_id: self.id.clone(),
                kind,
                payload,
                sequence,
            };
            if writer.connection.send(event).await.is_err() {
                return Err(Undelivered::Disconnected);
            }
            writer.next_sequence += 1;
            Ok(sequence)
        };

        let outcome = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Undelivered::Closed),
            sent = tokio::time::timeout(timeout, send) => sent.unwrap_or(Err(Undelivered::Stalled)),
        };
        if outcome.is_ok() {
            self.touch();
        }
        outcome
    }

    fn shutdown(&self) {
        self.state
            .store(SessionState::Draining as u8, Ordering::Release);
        self.cancel.cancel();
        self.state.store(SessionState::Closed as u8, Ordering::Release);
    }
}

/// Why an event did not reach a session's connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Undelivered {
    /// The session closed before or while sending.
    Closed,
    /// The transport dropped its receiver.
    Disconnected,
    /// The client stopped reading and the buffer stayed full.
    Stalled,
}

impl Undelivered {
    /// Short label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "session closed",
            Self::Disconnected => "connection gone",
            Self::Stalled => "client not reading",
        }
    }
}

// ============================================================================
// Request Guard
// ============================================================================

/// Accounts one in-flight request against its session.
///
/// Dropping the guard decrements the session's outstanding count.
pub struct RequestGuard {
    session: Arc<Session>,
    cancel: CancellationToken,
}

impl RequestGuard {
    /// Token cancelled when the owning session closes.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The owning session.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.session.outstanding.fetch_sub(1, Ordering::AcqRel);
        self.session.touch();
    }
}

// ============================================================================
// Session Registry
// ============================================================================

/// Registry of open sessions.
///
/// Structural changes (open, close) take the write lock; lookups share the
/// read lock. Thread-safe and cheap to clone.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<SessionId, Arc<Session>>>>,
    max_sessions: usize,
}

impl SessionRegistry {
    /// Creates a registry that admits at most `max_sessions` open sessions.
    #[must_use]
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_sessions,
        }
    }

    /// Opens a session for a new connection.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::CapacityExceeded`] when the ceiling is reached.
    pub async fn open(&self, connection: Connection) -> Result<SessionId, SessionError> {
        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.max_sessions {
            warn!(limit = self.max_sessions, "rejecting session: capacity exceeded");
            return Err(SessionError::CapacityExceeded {
                limit: self.max_sessions,
            });
        }

        let id = SessionId::generate();
        let peer = connection.peer().map(String::from);
        sessions.insert(id.clone(), Arc::new(Session::new(id.clone(), connection)));
        let open = sessions.len();
        drop(sessions);

        info!(session_id = %id, peer = peer.as_deref().unwrap_or("-"), open, "session opened");
        Ok(id)
    }

    /// Closes a session and cancels its in-flight operations.
    ///
    /// Idempotent: returns `false` when the session was already gone.
    pub async fn close(&self, session_id: &SessionId) -> bool {
        let removed = self.sessions.write().await.remove(session_id);
        match removed {
            Some(session) => {
                let outstanding = session.outstanding();
                let lifetime_secs = (Utc::now() - session.created_at()).num_seconds();
                session.shutdown();
                info!(%session_id, outstanding, lifetime_secs, "session closed");
                true
            }
            None => {
                debug!(%session_id, "close on unknown session ignored");
                false
            }
        }
    }

    /// Looks up an open session.
    pub async fn lookup(&self, session_id: &SessionId) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Records activity on a session. Returns `false` if it is unknown.
    pub async fn touch(&self, session_id: &SessionId) -> bool {
        match self.lookup(session_id).await {
            Some(session) => {
                session.touch();
                true
            }
            None => false,
        }
    }

    /// Registers an in-flight request on a session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotFound`] for unknown sessions and
    /// [`SessionError::Closing`] for sessions that are being torn down.
    pub async fn begin_request(&self, session_id: &SessionId) -> Result<RequestGuard, SessionError> {
        let session = self
            .lookup(session_id)
            .await
            .ok_or_else(|| SessionError::NotFound {
                id: session_id.to_string(),
            })?;

        if session.state() != SessionState::Open {
            return Err(SessionError::Closing {
                id: session_id.to_string(),
            });
        }

        session.outstanding.fetch_add(1, Ordering::AcqRel);
        session.touch();
        let cancel = session.cancel.child_token();
        Ok(RequestGuard { session, cancel })
    }

    /// Closes every session idle for longer than `timeout`.
    ///
    /// Sessions with outstanding requests are not considered idle.
    pub async fn close_idle(&self, timeout: Duration) -> usize {
        let idle: Vec<SessionId> = self
            .sessions
            .read()
            .await
            .values()
            .filter(|s| s.outstanding() == 0 && s.idle_for() > timeout)
            .map(|s| s.id.clone())
            .collect();

        let mut closed = 0;
        for id in idle {
            info!(session_id = %id, timeout_secs = timeout.as_secs(), "closing idle session");
            if self.close(&id).await {
                closed += 1;
            }
        }
        closed
    }

    /// Closes every session. Returns how many were open.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<Arc<Session>> = self
            .sessions
            .write()
            .await
            .drain()
            .map(|(_, session)| session)
            .collect();
        for session in &drained {
            session.shutdown();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "closed all sessions");
        }
        drained.len()
    }

    /// Identifiers of all open sessions.
    pub async fn session_ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<SessionId> = self.sessions.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of open sessions.
    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Returns `true` when no session is open.
    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::EventReceiver;

    async fn open(registry: &SessionRegistry) -> (SessionId, EventReceiver) {
        let (conn, rx) = Connection::channel(8, Some("test".to_string()));
        let id = registry.open(conn).await.unwrap_or_else(|_| unreachable!());
        (id, rx)
    }

    #[tokio::test]
    async fn test_open_and_lookup() {
        let registry = SessionRegistry::new(2);
        let (id, _rx) = open(&registry).await;

        let session = registry.lookup(&id).await;
        assert!(session.is_some());
        let session = session.unwrap_or_else(|| unreachable!());
        assert_eq!(session.state(), SessionState::Open);
        assert_eq!(session.outstanding(), 0);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_open_rejects_beyond_capacity() {
        let registry = SessionRegistry::new(2);
        let (_a, _rx_a) = open(&registry).await;
        let (_b, _rx_b) = open(&registry).await;

        let (conn, _rx) = Connection::channel(8, None);
        let result = registry.open(conn).await;
        assert_eq!(result, Err(SessionError::CapacityExceeded { limit: 2 }));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let registry = SessionRegistry::new(2);
        let (id, _rx) = open(&registry).await;

        assert!(registry.close(&id).await);
        assert!(!registry.close(&id).await);
        assert!(registry.lookup(&id).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_close_frees_capacity() {
        let registry = SessionRegistry::new(1);
        let (id, _rx) = open(&registry).await;
        registry.close(&id).await;

        let (conn, _rx2) = Connection::channel(8, None);
        assert!(registry.open(conn).await.is_ok());
    }

    #[tokio::test]
    async fn test_close_cancels_in_flight_request() {
        let registry = SessionRegistry::new(2);
        let (id, _rx) = open(&registry).await;

        let guard = registry
            .begin_request(&id)
            .await
            .unwrap_or_else(|_| unreachable!());
        let token = guard.cancellation().clone();

        let op = tokio::spawn(async move {
            let _guard = guard;
            tokio::select! {
                () = token.cancelled() => "cancelled",
                () = tokio::time::sleep(Duration::from_secs(60)) => "finished",
            }
        });

        tokio::task::yield_now().await;
        registry.close(&id).await;

        assert_eq!(op.await.unwrap_or("join failed"), "cancelled");
        assert!(registry.lookup(&id).await.is_none());
    }

    #[tokio::test]
    async fn test_begin_request_tracks_outstanding() {
        let registry = SessionRegistry::new(2);
        let (id, _rx) = open(&registry).await;

        let g1 = registry.begin_request(&id).await.unwrap_or_else(|_| unreachable!());
        let g2 = registry.begin_request(&id).await.unwrap_or_else(|_| unreachable!());
        assert_eq!(g1.session().outstanding(), 2);
        drop(g1);
        assert_eq!(g2.session().outstanding(), 1);
    }

    #[tokio::test]
    async fn test_begin_request_unknown_session() {
        let registry = SessionRegistry::new(2);
        let result = registry.begin_request(&SessionId::from("nope")).await;
        assert!(matches!(result, Err(SessionError::NotFound { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_idle_sweeps_inactive_sessions() {
        let registry = SessionRegistry::new(4);
        let (stale, _rx_a) = open(&registry).await;
        let (fresh, _rx_b) = open(&registry).await;

        tokio::time::advance(Duration::from_secs(20)).await;
        assert!(registry.touch(&fresh).await);
        tokio::time::advance(Duration::from_secs(15)).await;

        let closed = registry.close_idle(Duration::from_secs(30)).await;
        assert_eq!(closed, 1);
        assert!(registry.lookup(&stale).await.is_none());
        assert!(registry.lookup(&fresh).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_idle_skips_busy_sessions() {
        let registry = SessionRegistry::new(4);
        let (id, _rx) = open(&registry).await;
        let _guard = registry.begin_request(&id).await.unwrap_or_else(|_| unreachable!());

        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(registry.close_idle(Duration::from_secs(30)).await, 0);
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = SessionRegistry::new(4);
        let (a, _rx_a) = open(&registry).await;
        let (_b, _rx_b) = open(&registry).await;
        let session = registry.lookup(&a).await.unwrap_or_else(|| unreachable!());

        assert_eq!(registry.close_all().await, 2);
        assert_eq!(registry.close_all().await, 0);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.cancellation().is_cancelled());
    }
}
