//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// querygate: MCP server for distributed query engines.
///
/// Small results are streamed inline on the event stream; large results are
/// staged as chunk sets the client pulls over HTTP.
#[derive(Parser, Debug)]
#[command(name = "querygate")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to a JSON tool catalog. The built-in tools are used when unset.
    #[arg(short, long, env = "QUERYGATE_CATALOG", global = true)]
    pub catalog: Option<PathBuf>,

    /// Base URL of a query engine node (for example `http://10.0.0.5:32049`).
    #[arg(short, long, env = "QUERYGATE_ENGINE_URL", global = true)]
    pub engine_url: Option<String>,

    /// Comma-separated tool names to expose. All catalog tools when unset.
    #[arg(long, value_delimiter = ',', global = true)]
    pub enable_tools: Option<Vec<String>>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, default_value = "text", global = true)]
    pub format: String,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the MCP server.
    #[command(subcommand)]
    Serve(ServeCommands),

    /// List the tools the server would expose.
    #[command(after_help = r#"Examples:
  querygate tools                              # Built-in tools
  querygate --catalog ./tools.json tools       # Tools from a catalog file
  querygate --format json tools | jq '.[].name'
"#)]
    Tools,

    /// Check whether the query engine answers.
    #[command(after_help = r#"Examples:
  querygate --engine-url http://10.0.0.5:32049 probe
"#)]
    Probe,
}

/// Server transports.
#[derive(Subcommand, Debug)]
pub enum ServeCommands {
    /// Serve over HTTP: an SSE event stream per session, requests by POST,
    /// and chunk retrieval for large results.
    #[command(after_help = r#"Examples:
  querygate serve http                               # Listen on 127.0.0.1:3000
  querygate serve http --host 0.0.0.0 --port 8080
  querygate serve http --block-threshold 1048576     # Chunk results over 1 MiB
  querygate serve http --no-blocks                   # Always deliver inline
"#)]
    Http(HttpOptions),

    /// Serve over stdio. Results are always returned inline.
    #[command(after_help = r#"Examples:
  querygate serve stdio
  querygate --engine-url http://10.0.0.5:32049 serve stdio
"#)]
    Stdio,
}

/// Options of `serve http`. Unset values fall back to `QUERYGATE_*`
/// environment variables, then to defaults.
#[derive(Args, Debug, Clone, Default)]
pub struct HttpOptions {
    /// Host to bind to.
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to.
    #[arg(long)]
    pub port: Option<u16>,

    /// Results larger than this many bytes are delivered as chunk sets.
    #[arg(long)]
    pub block_threshold: Option<usize>,

    /// Chunk size in bytes.
    #[arg(long)]
    pub block_chunk_size: Option<usize>,

    /// Disable chunked delivery; large results go inline.
    #[arg(long)]
    pub no_blocks: bool,

    /// Maximum concurrent sessions.
    #[arg(long)]
    pub max_sessions: Option<usize>,

    /// Worker pool size.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Seconds of inactivity before a session is closed.
    #[arg(long)]
    pub idle_timeout: Option<u64>,
}
