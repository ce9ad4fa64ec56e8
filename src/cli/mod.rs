//! CLI layer for querygate.
//!
//! Provides the command-line interface using clap, with commands for
//! serving over HTTP or stdio and for inspecting the tool catalog.

pub mod commands;
pub mod output;
pub mod parser;

pub use commands::execute;
pub use output::OutputFormat;
pub use parser::{Cli, Commands, HttpOptions, ServeCommands};
