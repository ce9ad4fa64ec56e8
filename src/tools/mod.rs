//! Tool catalog, dispatch, and query engine access.
//!
//! # Architecture
//!
//! ```text
//! tools/call ─► Dispatcher ─► ToolCatalog (lookup + schema validation)
//!                   │
//!                   ├─► internal method (server_info)
//!                   ├─► TemplateSet ──┐
//!                   └─► sql builder ──┴─► QueryEngine ─► ResponseParser ─► OperationResult
//! ```

pub mod catalog;
pub mod command;
pub mod dispatcher;
pub mod engine;
pub mod response;
pub mod sql;
#[cfg(feature = "http-engine")]
pub mod http_engine;
#[cfg(test)]
pub(crate) mod testing;

pub use catalog::{InternalMethod, ToolCatalog, ToolCommand, ToolDescriptor};
pub use command::{CommandTemplate, RenderError, TemplateSet, TemplateVariant};
pub use dispatcher::Dispatcher;
pub use engine::{EngineOutput, EngineQuery, QueryEngine, UnavailableEngine, create_engine};
pub use response::ResponseParser;
#[cfg(feature = "http-engine")]
pub use http_engine::HttpQueryEngine;
