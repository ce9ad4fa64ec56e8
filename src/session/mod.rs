//! Session management.
//!
//! Sessions are opened by the host transport when a client connects, carry
//! the per-session event stream, and are closed on disconnect, idle timeout,
//! or server shutdown.

pub mod channel;
pub mod registry;

pub use channel::{Connection, EventChannel, EventReceiver};
pub use registry::{RequestGuard, Session, SessionRegistry, SessionState, Undelivered};
