//! Error types for querygate.
//!
//! Each subsystem has its own error enum. [`RpcError`] is the wire form
//! (`{code, message}`) that every protocol-level failure is converted into
//! before it reaches a client.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Convenience result alias for fallible crate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Session bookkeeping failure.
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// Chunk store failure.
    #[error("chunk error: {0}")]
    Chunk(#[from] ChunkError),

    /// Tool dispatch failure.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    /// Server lifecycle failure.
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Configuration failure.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// CLI command failure.
    #[error("command error: {0}")]
    Command(#[from] CommandError),

    /// I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session registry errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The concurrent session ceiling has been reached.
    #[error("session capacity exceeded ({limit} sessions open)")]
    CapacityExceeded {
        /// Configured ceiling.
        limit: usize,
    },

    /// No session with this identifier exists.
    #[error("session not found: {id}")]
    NotFound {
        /// The unknown session identifier.
        id: String,
    },

    /// The session exists but no longer accepts requests.
    #[error("session is closing: {id}")]
    Closing {
        /// The draining session identifier.
        id: String,
    },
}

/// Worker pool admission errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// All workers are busy and the wait queue is full.
    #[error("worker pool saturated ({workers} workers, {queued} queued)")]
    Saturated {
        /// Worker count.
        workers: usize,
        /// Wait queue depth.
        queued: usize,
    },

    /// The pool was shut down while the request waited.
    #[error("worker pool is shut down")]
    Closed,
}

/// Chunk store errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkError {
    /// Unknown or expired chunk set.
    #[error("chunk set not found: {id}")]
    NotFound {
        /// The chunk set identifier.
        id: String,
    },

    /// Index beyond the end of the set.
    #[error("chunk index {index} out of range for {id} ({count} chunks)")]
    OutOfRange {
        /// The chunk set identifier.
        id: String,
        /// Requested index.
        index: usize,
        /// Number of chunks in the set.
        count: usize,
    },

    /// Staging would exceed the store's byte ceiling.
    #[error("chunk store full ({requested} bytes requested, {available} available)")]
    StoreFull {
        /// Size of the rejected payload.
        requested: usize,
        /// Bytes still available.
        available: usize,
    },
}

/// Tool dispatch errors. Engine failures never surface here; they are
/// wrapped into an error-marked result by the dispatcher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// No tool with this name is registered.
    #[error("tool not found: {name}")]
    ToolNotFound {
        /// Requested tool name.
        name: String,
    },

    /// Arguments failed the tool's input schema.
    #[error("invalid arguments for '{name}': {message}")]
    InvalidArguments {
        /// Tool name.
        name: String,
        /// Validation failures joined by `; `.
        message: String,
    },
}

/// Query engine errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine could not be reached or was never configured.
    #[error("query engine unavailable: {message}")]
    Unavailable {
        /// Reason.
        message: String,
    },

    /// Transport-level request failure.
    #[error("engine request failed: {message}")]
    Request {
        /// Underlying error message.
        message: String,
    },

    /// The engine answered with a non-success status.
    #[error("engine returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The engine did not answer in time.
    #[error("engine request timed out after {secs}s")]
    Timeout {
        /// Configured timeout.
        secs: u64,
    },

    /// The operation was cancelled because its session closed.
    #[error("operation cancelled")]
    Cancelled,
}

/// Server lifecycle errors.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// `start()` called while not stopped.
    #[error("server is already running")]
    AlreadyRunning,

    /// An operation requires a running server.
    #[error("server is not running")]
    NotRunning,

    /// Startup failed; the server was returned to `stopped`.
    #[error("server failed to start: {0}")]
    Startup(#[from] ConfigError),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A configuration value is out of range.
    #[error("invalid value for {field}: {message}")]
    Invalid {
        /// Option name.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// The tool catalog file could not be read.
    #[error("failed to read catalog {}: {source}", path.display())]
    CatalogRead {
        /// Catalog path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The tool catalog file is not valid JSON.
    #[error("failed to parse catalog {}: {message}", path.display())]
    CatalogParse {
        /// Catalog path.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// Two tools share a name.
    #[error("duplicate tool name: {name}")]
    DuplicateTool {
        /// The repeated name.
        name: String,
    },

    /// A tool's input schema does not compile.
    #[error("invalid input schema for '{name}': {message}")]
    InvalidSchema {
        /// Tool name.
        name: String,
        /// Compiler message.
        message: String,
    },

    /// A tool's command template is malformed.
    #[error("invalid command template for '{name}': {message}")]
    InvalidTemplate {
        /// Tool name.
        name: String,
        /// What is wrong with it.
        message: String,
    },
}

/// CLI command errors.
#[derive(Error, Debug)]
pub enum CommandError {
    /// Generic execution failure.
    #[error("{0}")]
    ExecutionFailed(String),
}

/// JSON-RPC error codes.
///
/// `-32000..=-32019` covers session and transport failures,
/// `-32020..=-32039` covers tool failures.
pub mod codes {
    /// Body is not valid JSON.
    pub const PARSE_ERROR: i32 = -32700;
    /// Envelope is missing required members.
    pub const INVALID_REQUEST: i32 = -32600;
    /// Unknown method.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Malformed `params`.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Unexpected server failure.
    pub const INTERNAL_ERROR: i32 = -32603;

    /// Server is not in the `running` state.
    pub const SERVER_NOT_RUNNING: i32 = -32000;
    /// Session or worker-pool ceiling reached.
    pub const CAPACITY_EXCEEDED: i32 = -32001;
    /// Unknown or closing session.
    pub const SESSION_NOT_FOUND: i32 = -32002;
    /// Unknown, expired, or out-of-range chunk.
    pub const CHUNK_NOT_FOUND: i32 = -32003;

    /// Unknown tool.
    pub const TOOL_NOT_FOUND: i32 = -32020;
    /// Arguments failed the input schema.
    pub const INVALID_ARGUMENTS: i32 = -32021;
    /// Tool execution failed outside the result body.
    pub const TOOL_EXECUTION_FAILED: i32 = -32022;

    /// Returns `true` for codes in the tool-failure range.
    #[must_use]
    pub const fn is_tool_error(code: i32) -> bool {
        code <= -32020 && code >= -32039
    }

    /// Returns `true` for codes in the session/transport range.
    #[must_use]
    pub const fn is_session_error(code: i32) -> bool {
        code <= -32000 && code >= -32019
    }
}

/// Wire-level error object: `{"code": .., "message": ..}`.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message} ({code})")]
pub struct RpcError {
    /// Numeric JSON-RPC code, see [`codes`].
    pub code: i32,
    /// Human-readable message.
    pub message: String,
}

impl RpcError {
    /// Creates an error with an explicit code.
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Unknown method.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(codes::METHOD_NOT_FOUND, format!("Method not found: {method}"))
    }

    /// Malformed params.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }

    /// Server not running.
    #[must_use]
    pub fn not_running() -> Self {
        Self::new(codes::SERVER_NOT_RUNNING, "MCP server not running")
    }
}

impl From<&SessionError> for RpcError {
    fn from(err: &SessionError) -> Self {
        let code = match err {
            SessionError::CapacityExceeded { .. } => codes::CAPACITY_EXCEEDED,
            SessionError::NotFound { .. } | SessionError::Closing { .. } => {
                codes::SESSION_NOT_FOUND
            }
        };
        Self::new(code, err.to_string())
    }
}

impl From<&AdmissionError> for RpcError {
    fn from(err: &AdmissionError) -> Self {
        let code = match err {
            AdmissionError::Saturated { .. } => codes::CAPACITY_EXCEEDED,
            AdmissionError::Closed => codes::SERVER_NOT_RUNNING,
        };
        Self::new(code, err.to_string())
    }
}

impl From<&ChunkError> for RpcError {
    fn from(err: &ChunkError) -> Self {
        let code = match err {
            ChunkError::NotFound { .. } | ChunkError::OutOfRange { .. } => codes::CHUNK_NOT_FOUND,
            ChunkError::StoreFull { .. } => codes::CAPACITY_EXCEEDED,
        };
        Self::new(code, err.to_string())
    }
}

impl From<&DispatchError> for RpcError {
    fn from(err: &DispatchError) -> Self {
        let code = match err {
            DispatchError::ToolNotFound { .. } => codes::TOOL_NOT_FOUND,
            DispatchError::InvalidArguments { .. } => codes::INVALID_ARGUMENTS,
        };
        Self::new(code, err.to_string())
    }
}

impl From<&LifecycleError> for RpcError {
    fn from(err: &LifecycleError) -> Self {
        match err {
            LifecycleError::NotRunning => Self::not_running(),
            other => Self::new(codes::INTERNAL_ERROR, other.to_string()),
        }
    }
}
