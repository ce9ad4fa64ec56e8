//! MCP server: lifecycle, request routing, and host transport bindings.
//!
//! # Architecture
//!
//! ```text
//! GET /mcp/sse ──────► Server::open_session ─► SessionRegistry
//!                                                    ▲
//! POST /mcp/messages ─► RequestEnvelope::parse       │ events
//!                       Server::submit               │
//!                         ├─ begin_request + WorkerPool::reserve
//!                         └─ worker: process_message ─► Dispatcher
//!                                      │
//!                                      ▼
//!                               DeliveryRouter ─► message | blocks_available | error
//!                                      │
//!                                      └─► ChunkStore ◄── GET /mcp/blocks/{id}/{n}
//!
//! stdio ─► StdioHandler (rmcp) ─► Server::call_tool ─► inline result
//! ```

pub mod handler;
pub mod params;
pub mod server;
pub mod transport;

pub use handler::StdioHandler;
pub use params::CallToolParams;
pub use server::{CatalogSource, Reply, Server, ServerState, ServerStatus};
pub use transport::{router, serve_http, serve_stdio};
