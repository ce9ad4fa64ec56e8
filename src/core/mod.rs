//! Core data model shared by every subsystem.
//!
//! Identifiers, request/response envelopes, session events, and operation
//! results. Nothing here performs I/O.

pub mod envelope;
pub mod event;
pub mod ids;
pub mod result;

pub use envelope::{EnvelopeError, JSONRPC_VERSION, RequestEnvelope, RequestId, ResponseEnvelope};
pub use event::{Event, EventKind};
pub use ids::{ChunkSetId, SessionId};
pub use result::{OperationResult, OutputItem};
