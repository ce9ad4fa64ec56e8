//! Pluggable query engine.
//!
//! The dispatcher never talks to an engine node directly. It renders a
//! command from the tool's template and hands it to a [`QueryEngine`], which
//! owns the transport. This keeps tool dispatch testable without a live node.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::ServerConfig;
use crate::core::OutputItem;
use crate::error::{ConfigError, EngineError};

/// A rendered engine command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineQuery {
    /// Command text.
    pub command: String,
    /// Extra request headers configured on the tool.
    pub headers: BTreeMap<String, String>,
}

impl EngineQuery {
    /// Creates a query with no extra headers.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: BTreeMap::new(),
        }
    }
}

/// Raw engine answer.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineOutput {
    /// The body parsed as JSON.
    Json(Value),
    /// Anything else.
    Text(String),
}

impl EngineOutput {
    /// Classifies a response body.
    #[must_use]
    pub fn from_body(body: String) -> Self {
        serde_json::from_str(&body).map_or(Self::Text(body), Self::Json)
    }

    /// Splits the answer into output items.
    ///
    /// A JSON array yields one item per element (one per row for query
    /// results); anything else yields a single item.
    #[must_use]
    pub fn into_items(self) -> Vec<OutputItem> {
        match self {
            Self::Json(Value::Array(rows)) => rows.into_iter().map(OutputItem::Json).collect(),
            Self::Json(value) => vec![OutputItem::Json(value)],
            Self::Text(text) => vec![OutputItem::Text(text)],
        }
    }
}

/// Trait for query engine backends.
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Backend name, for logs and status.
    fn name(&self) -> &'static str;

    /// Checks whether the engine answers. Called once, at server start.
    async fn probe(&self) -> bool;

    /// Executes one command.
    ///
    /// Dropping the returned future abandons the request.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] on transport failures, non-success statuses,
    /// or timeouts.
    async fn execute(&self, query: &EngineQuery) -> Result<EngineOutput, EngineError>;
}

/// Engine used when no engine URL is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableEngine;

#[async_trait]
impl QueryEngine for UnavailableEngine {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn probe(&self) -> bool {
        false
    }

    async fn execute(&self, _query: &EngineQuery) -> Result<EngineOutput, EngineError> {
        Err(EngineError::Unavailable {
            message: "no query engine configured".to_string(),
        })
    }
}

/// Creates the engine described by `config`.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] if the HTTP client cannot be built, or if
/// an engine URL is set but HTTP support was compiled out.
pub fn create_engine(config: &ServerConfig) -> Result<Arc<dyn QueryEngine>, ConfigError> {
    match config.engine_url.as_deref() {
        None => Ok(Arc::new(UnavailableEngine)),
        #[cfg(feature = "http-engine")]
        Some(url) => Ok(Arc::new(super::http_engine::HttpQueryEngine::new(
            url,
            config.request_timeout,
        )?)),
        #[cfg(not(feature = "http-engine"))]
        Some(_) => Err(ConfigError::Invalid {
            field: "engine_url",
            message: "built without the http-engine feature".to_string(),
        }),
    }
}
