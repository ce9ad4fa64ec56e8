//! CLI command implementations.

use std::time::Duration;

use crate::cli::output::{OutputFormat, format_probe, format_tools};
use crate::cli::parser::{Cli, Commands, HttpOptions, ServeCommands};
use crate::config::{ServerConfig, ServerConfigBuilder};
use crate::error::{CommandError, Result};
use crate::mcp::{CatalogSource, Server, serve_http, serve_stdio};
use crate::tools::{ToolCatalog, create_engine};

/// Executes the CLI command.
///
/// # Arguments
///
/// * `cli` - Parsed CLI arguments.
///
/// # Returns
///
/// Result with output string on success. Server commands return an empty
/// string once the server has stopped.
///
/// # Errors
///
/// Returns an error if configuration is invalid or the command fails.
pub fn execute(cli: &Cli) -> Result<String> {
    let format = OutputFormat::parse(&cli.format);

    match &cli.command {
        Commands::Serve(sub) => cmd_serve(cli, sub),
        Commands::Tools => cmd_tools(cli, format),
        Commands::Probe => cmd_probe(cli, format),
    }
}

/// Applies the global flags shared by every command.
fn base_config(cli: &Cli) -> ServerConfigBuilder {
    let mut builder = ServerConfig::builder();
    if let Some(url) = &cli.engine_url {
        builder = builder.engine_url(url.clone());
    }
    if let Some(path) = &cli.catalog {
        builder = builder.catalog_path(path.clone());
    }
    if let Some(names) = &cli.enable_tools {
        builder = builder.enabled_tools(names.clone());
    }
    builder
}

fn http_config(cli: &Cli, opts: &HttpOptions) -> Result<ServerConfig> {
    let mut builder = base_config(cli);
    if let Some(host) = &opts.host {
        builder = builder.host(host.clone());
    }
    if let Some(port) = opts.port {
        builder = builder.port(port);
    }
    if let Some(n) = opts.block_threshold {
        builder = builder.block_threshold_bytes(n);
    }
    if let Some(n) = opts.block_chunk_size {
        builder = builder.block_chunk_size_bytes(n);
    }
    if opts.no_blocks {
        builder = builder.block_transport_enabled(false);
    }
    if let Some(n) = opts.max_sessions {
        builder = builder.max_concurrent_sessions(n);
    }
    if let Some(n) = opts.workers {
        builder = builder.worker_pool_size(n);
    }
    if let Some(secs) = opts.idle_timeout {
        builder = builder.session_idle_timeout(Duration::from_secs(secs));
    }
    Ok(builder.from_env().build()?)
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| {
        CommandError::ExecutionFailed(format!("Failed to create async runtime: {e}")).into()
    })
}

fn cmd_serve(cli: &Cli, cmd: &ServeCommands) -> Result<String> {
    let config = match cmd {
        ServeCommands::Http(opts) => http_config(cli, opts)?,
        ServeCommands::Stdio => base_config(cli).from_env().build()?,
    };
    let catalog = CatalogSource::from_config(&config);
    let rt = runtime()?;

    rt.block_on(async {
        let server = Server::new(config, catalog)?;
        server.start().await?;
        match cmd {
            ServeCommands::Http(_) => {
                let host = server.config().host.clone();
                let port = server.config().port;
                serve_http(server, &host, port).await
            }
            ServeCommands::Stdio => serve_stdio(server).await,
        }
    })
    .map_err(|e| CommandError::ExecutionFailed(format!("MCP server error: {e}")))?;

    Ok(String::new())
}

fn cmd_tools(cli: &Cli, format: OutputFormat) -> Result<String> {
    let config = base_config(cli).from_env().build()?;
    let enabled = config.enabled_tools.as_deref();
    let catalog = match &config.catalog_path {
        Some(path) => ToolCatalog::load(path, enabled)?,
        None => ToolCatalog::builtin(enabled)?,
    };
    Ok(format_tools(catalog.list(), format))
}

fn cmd_probe(cli: &Cli, format: OutputFormat) -> Result<String> {
    let config = base_config(cli).from_env().build()?;
    let engine = create_engine(&config)?;
    let available = runtime()?.block_on(engine.probe());
    if available {
        Ok(format_probe(engine.name(), available, format))
    } else {
        Err(CommandError::ExecutionFailed(format_probe(engine.name(), available, format)).into())
    }
}
