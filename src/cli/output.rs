//! Output formatting for CLI commands.

use std::fmt::Write as FmtWrite;

use serde_json::Value;

use crate::tools::ToolDescriptor;

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text.
    #[default]
    Text,
    /// JSON.
    Json,
}

impl OutputFormat {
    /// Parses a format name; anything other than `json` is text.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Text
        }
    }
}

/// Formats a tool listing.
#[must_use]
pub fn format_tools(tools: &[ToolDescriptor], format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            let wire: Vec<Value> = tools.iter().map(ToolDescriptor::to_wire).collect();
            serde_json::to_string_pretty(&wire).unwrap_or_default()
        }
        OutputFormat::Text => {
            let width = tools.iter().map(|t| t.name.len()).max().unwrap_or(0);
            let mut out = String::new();
            for tool in tools {
                let _ = writeln!(out, "{:<width$}  {}", tool.name, tool.description);
            }
            let _ = write!(out, "{} tools", tools.len());
            out
        }
    }
}

/// Formats the result of an engine probe.
#[must_use]
pub fn format_probe(engine: &str, available: bool, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => serde_json::json!({
            "engine": engine,
            "available": available,
        })
        .to_string(),
        OutputFormat::Text => {
            let state = if available { "available" } else { "unavailable" };
            format!("engine {engine}: {state}")
        }
    }
}
