//! # querygate
//!
//! An MCP server in front of a distributed query engine. Tools are declared
//! in a catalog, rendered into engine commands, and their results delivered
//! on a per-session event stream. Results above a size threshold are staged
//! as chunk sets that the client pulls piece by piece.
//!
//! ## Modules
//!
//! - [`core`]: identifiers, envelopes, events, and results
//! - [`session`]: session registry and event channel
//! - [`blocks`]: chunk store for large results
//! - [`tools`]: catalog, dispatcher, and query engines
//! - [`delivery`]: worker pool and delivery router
//! - [`mcp`]: server lifecycle and transport bindings
//! - [`cli`]: command-line interface
//!
//! ## Example
//!
//! ```no_run
//! use querygate::{CatalogSource, Server, ServerConfig};
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ServerConfig::from_env()?;
//! let server = Server::new(config, CatalogSource::Builtin)?;
//! server.start().await?;
//! querygate::mcp::serve_http(server, "127.0.0.1", 3000).await?;
//! # Ok(())
//! # }
//! ```

pub mod blocks;
pub mod cli;
pub mod config;
pub mod core;
pub mod delivery;
pub mod error;
pub mod logging;
pub mod mcp;
pub mod session;
pub mod tools;

pub use config::{Capabilities, ServerConfig};
pub use error::{Error, Result, RpcError};
pub use mcp::{CatalogSource, Server, ServerState, ServerStatus};
