//! HTTP query engine client.
//!
//! Engine nodes accept commands over their REST port: a `GET` on the base
//! URL with the command text in a `command` header. Tool-specific headers
//! (for example `destination: network` for distributed queries) are sent
//! alongside.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::engine::{EngineOutput, EngineQuery, QueryEngine};
use crate::error::{ConfigError, EngineError};

/// User agent engine nodes expect on REST commands.
const ENGINE_USER_AGENT: &str = "anylog";
/// Header carrying the command text.
const COMMAND_HEADER: &str = "command";
/// Command used by the startup probe.
const PROBE_COMMAND: &str = "get status";

/// REST client for an engine node.
pub struct HttpQueryEngine {
    http: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpQueryEngine {
    /// Creates a client for the node at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ConfigError> {
        let http = Client::builder()
            .user_agent(ENGINE_USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Invalid {
                field: "engine_url",
                message: e.to_string(),
            })?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    fn map_error(&self, err: &reqwest::Error) -> EngineError {
        if err.is_timeout() {
            EngineError::Timeout {
                secs: self.timeout.as_secs(),
            }
        } else if err.is_connect() {
            EngineError::Unavailable {
                message: err.to_string(),
            }
        } else {
            EngineError::Request {
                message: err.to_string(),
            }
        }
    }
}

impl std::fmt::Debug for HttpQueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpQueryEngine")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl QueryEngine for HttpQueryEngine {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn probe(&self) -> bool {
        match self.execute(&EngineQuery::new(PROBE_COMMAND)).await {
            Ok(_) => true,
            Err(e) => {
                debug!(url = %self.base_url, error = %e, "engine probe failed");
                false
            }
        }
    }

    async fn execute(&self, query: &EngineQuery) -> Result<EngineOutput, EngineError> {
        debug!(url = %self.base_url, command = %query.command, "engine request");

        let mut request = self
            .http
            .get(&self.base_url)
            .header(COMMAND_HEADER, &query.command);
        for (name, value) in &query.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(|e| self.map_error(&e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| self.map_error(&e))?;

        if !status.is_success() {
            return Err(EngineError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(EngineOutput::from_body(body))
    }
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use serde_json::json;

    use super::*;

    async fn node(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|_| unreachable!());
        let addr = listener.local_addr().unwrap_or_else(|_| unreachable!());
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    async fn echo(headers: HeaderMap) -> String {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        };
        json!({
            "command": header("command"),
            "agent": header("user-agent"),
            "destination": header("destination"),
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_execute_sends_command_header() {
        let url = node(Router::new().route("/", get(echo))).await;
        let engine = HttpQueryEngine::new(&url, Duration::from_secs(5))
            .unwrap_or_else(|_| unreachable!());

        let mut query = EngineQuery::new("sql lsl \"select 1\"");
        query
            .headers
            .insert("destination".to_string(), "network".to_string());
        let out = engine.execute(&query).await;

        assert_eq!(
            out,
            Ok(EngineOutput::Json(json!({
                "command": "sql lsl \"select 1\"",
                "agent": "anylog",
                "destination": "network",
            })))
        );
        assert!(engine.probe().await);
    }

    #[tokio::test]
    async fn test_execute_maps_error_status() {
        let router = Router::new().route(
            "/",
            get(|| async { (StatusCode::BAD_REQUEST, "bad command") }),
        );
        let url = node(router).await;
        let engine = HttpQueryEngine::new(&url, Duration::from_secs(5))
            .unwrap_or_else(|_| unreachable!());

        let out = engine.execute(&EngineQuery::new("nonsense")).await;
        assert_eq!(
            out,
            Err(EngineError::Status {
                status: 400,
                body: "bad command".to_string()
            })
        );
        assert!(!engine.probe().await);
    }

    #[tokio::test]
    async fn test_unreachable_node_is_unavailable() {
        let engine = HttpQueryEngine::new("http://127.0.0.1:9", Duration::from_secs(2))
            .unwrap_or_else(|_| unreachable!());
        let out = engine.execute(&EngineQuery::new("get status")).await;
        assert!(out.is_err());
    }
}
