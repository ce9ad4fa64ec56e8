//! Tool dispatcher.
//!
//! Resolves a tool by name, validates its arguments, and executes it. Engine
//! failures never escape as errors: they become results carrying the error
//! marker, so the caller always has something to deliver.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::catalog::{InternalMethod, ToolCatalog, ToolCommand, ToolDescriptor};
use super::engine::{EngineQuery, QueryEngine};
use super::response::ResponseParser;
use super::sql;
use crate::config::{Capabilities, ServerConfig};
use crate::core::{OperationResult, OutputItem};
use crate::error::{DispatchError, EngineError};

/// Executes catalog tools against a query engine.
pub struct Dispatcher {
    catalog: Arc<ToolCatalog>,
    engine: Arc<dyn QueryEngine>,
    capabilities: Capabilities,
    server_info: Value,
}

impl Dispatcher {
    /// Creates a dispatcher.
    ///
    /// `capabilities` is the outcome of the startup probe; the dispatcher
    /// never probes the engine itself.
    #[must_use]
    pub fn new(
        catalog: Arc<ToolCatalog>,
        engine: Arc<dyn QueryEngine>,
        capabilities: Capabilities,
        config: &ServerConfig,
    ) -> Self {
        let server_info = json!({
            "server_name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "engine": engine.name(),
            "engine_available": capabilities.engine_available,
            "configuration": {
                "total_tools": catalog.len(),
                "request_timeout": config.request_timeout.as_secs(),
                "max_workers": config.worker_pool_size,
                "block_transport_enabled": capabilities.block_transport,
                "block_threshold_bytes": config.block_threshold_bytes,
                "block_chunk_size_bytes": config.block_chunk_size_bytes,
            }
        });
        Self {
            catalog,
            engine,
            capabilities,
            server_info,
        }
    }

    /// Tools in catalog order.
    #[must_use]
    pub fn list(&self) -> &[ToolDescriptor] {
        self.catalog.list()
    }

    /// The underlying catalog.
    #[must_use]
    pub const fn catalog(&self) -> &Arc<ToolCatalog> {
        &self.catalog
    }

    /// Calls a tool.
    ///
    /// Arguments are validated before the engine is reached. Cancelling
    /// `cancel` abandons an in-flight engine request.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::ToolNotFound`] or
    /// [`DispatchError::InvalidArguments`]. Execution failures are returned
    /// as `Ok` results with the error marker set.
    pub async fn call(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<OperationResult, DispatchError> {
        self.catalog.validate(name, arguments)?;
        let descriptor = self
            .catalog
            .get(name)
            .ok_or_else(|| DispatchError::ToolNotFound {
                name: name.to_string(),
            })?;

        let invalid = |message: String| DispatchError::InvalidArguments {
            name: name.to_string(),
            message,
        };
        let (command, headers, parser) = match &descriptor.command {
            ToolCommand::Internal { method } => return Ok(self.internal(*method)),
            ToolCommand::Engine {
                headers,
                parse_response,
                ..
            } => {
                let command = self
                    .catalog
                    .templates(name)
                    .ok_or_else(|| DispatchError::ToolNotFound {
                        name: name.to_string(),
                    })?
                    .select(arguments)
                    .render(arguments)
                    .map_err(|e| invalid(e.to_string()))?;
                (command, headers, *parse_response)
            }
            ToolCommand::BuildSql { headers } => {
                (sql::build_command(arguments).map_err(invalid)?, headers, None)
            }
        };

        if !self.capabilities.engine_available {
            warn!(tool = name, "query engine unavailable");
            return Ok(OperationResult::failure("query engine unavailable"));
        }

        let query = EngineQuery {
            command,
            headers: headers.clone(),
        };
        Ok(self.execute(name, &query, parser, arguments, cancel).await)
    }

    async fn execute(
        &self,
        name: &str,
        query: &EngineQuery,
        parser: Option<ResponseParser>,
        arguments: &Map<String, Value>,
        cancel: &CancellationToken,
    ) -> OperationResult {
        debug!(tool = name, command = %query.command, "executing tool");

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(EngineError::Cancelled),
            result = self.engine.execute(query) => result,
        };

        match outcome {
            Ok(output) => {
                let output = match parser {
                    Some(parser) => parser.apply(output, arguments),
                    None => output,
                };
                let items = output.into_items();
                info!(tool = name, items = items.len(), "tool completed");
                OperationResult::success(items)
            }
            Err(EngineError::Cancelled) => {
                info!(tool = name, "tool cancelled");
                OperationResult::failure(EngineError::Cancelled.to_string())
            }
            Err(e) => {
                warn!(tool = name, error = %e, "tool execution failed");
                OperationResult::failure(e.to_string())
            }
        }
    }

    fn internal(&self, method: InternalMethod) -> OperationResult {
        match method {
            InternalMethod::ServerInfo => {
                let text = serde_json::to_string_pretty(&self.server_info)
                    .unwrap_or_else(|_| self.server_info.to_string());
                OperationResult::success(vec![OutputItem::Text(text)])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::tools::EngineOutput;
    use crate::tools::testing::MockEngine;

    fn dispatcher(engine: Arc<MockEngine>, available: bool) -> Dispatcher {
        let catalog = Arc::new(ToolCatalog::builtin(None).unwrap_or_else(|_| unreachable!()));
        let capabilities = Capabilities {
            engine_available: available,
            block_transport: true,
        };
        Dispatcher::new(catalog, engine, capabilities, &ServerConfig::default())
    }

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_never_reaches_engine() {
        let engine = Arc::new(MockEngine::rows(3));
        let d = dispatcher(Arc::clone(&engine), true);

        let result = d.call("nope", &Map::new(), &CancellationToken::new()).await;
        assert!(matches!(result, Err(DispatchError::ToolNotFound { .. })));
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_argument_never_reaches_engine() {
        let engine = Arc::new(MockEngine::rows(3));
        let d = dispatcher(Arc::clone(&engine), true);

        let result = d.call("list_tables", &Map::new(), &CancellationToken::new()).await;
        assert!(matches!(result, Err(DispatchError::InvalidArguments { .. })));
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_rows_become_items() {
        let engine = Arc::new(MockEngine::rows(3));
        let d = dispatcher(Arc::clone(&engine), true);

        let result = d
            .call("node_status", &Map::new(), &CancellationToken::new())
            .await
            .unwrap_or_else(|_| unreachable!());
        assert!(!result.is_error());
        assert_eq!(result.items().len(), 3);
        assert_eq!(engine.calls(), 1);
        assert_eq!(
            engine.last_command().as_deref(),
            Some("get status where format = json")
        );
    }

    fn table_listing() -> MockEngine {
        MockEngine::answering(EngineOutput::Json(json!([
            {"table": {"dbms": "plant", "name": "sensors"}},
            {"table": {"dbms": "fleet", "name": "trucks"}},
            {"table": {"dbms": "plant", "name": "alarms"}}
        ])))
    }

    #[tokio::test]
    async fn test_list_schema_reduces_to_database_names() {
        let engine = Arc::new(table_listing());
        let d = dispatcher(Arc::clone(&engine), true);

        let result = d
            .call("list_schema", &Map::new(), &CancellationToken::new())
            .await
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(
            result.items(),
            &[
                OutputItem::Json(json!("fleet")),
                OutputItem::Json(json!("plant"))
            ]
        );
        assert_eq!(engine.last_command().as_deref(), Some("blockchain get table"));
    }

    #[tokio::test]
    async fn test_list_tables_filters_by_database() {
        let engine = Arc::new(table_listing());
        let d = dispatcher(Arc::clone(&engine), true);

        let result = d
            .call(
                "list_tables",
                &args(json!({"database": "plant"})),
                &CancellationToken::new(),
            )
            .await
            .unwrap_or_else(|_| unreachable!());
        let names: Vec<String> = result.items().iter().map(OutputItem::text).collect();
        assert_eq!(names, vec!["sensors", "alarms"]);
    }

    #[tokio::test]
    async fn test_select_builds_sql() {
        let engine = Arc::new(MockEngine::rows(2));
        let d = dispatcher(Arc::clone(&engine), true);

        let result = d
            .call(
                "select",
                &args(json!({
                    "database": "plant",
                    "table": "readings",
                    "select": ["device", "max(value)"],
                    "group_by": ["device"],
                    "order_by": [{"column": "device", "direction": "desc"}],
                    "limit": 10
                })),
                &CancellationToken::new(),
            )
            .await
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(result.items().len(), 2);
        assert_eq!(
            engine.last_command().as_deref(),
            Some(
                "sql plant format = json \"SELECT device, max(value) FROM readings \
                 GROUP BY device ORDER BY device DESC LIMIT 10\""
            )
        );
        assert_eq!(
            engine.last_headers().get("destination").map(String::as_str),
            Some("network")
        );
    }

    #[tokio::test]
    async fn test_double_quote_in_query_rejected() {
        let engine = Arc::new(MockEngine::rows(1));
        let d = dispatcher(Arc::clone(&engine), true);

        let result = d
            .call(
                "query",
                &args(json!({"database": "lsl", "query": "select * from t where a = \"x\""})),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(DispatchError::InvalidArguments { .. })));
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_template_and_headers_reach_engine() {
        let engine = Arc::new(MockEngine::rows(1));
        let d = dispatcher(Arc::clone(&engine), true);

        let _ = d
            .call(
                "query",
                &args(json!({"database": "lsl", "query": "select count(*) from t"})),
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(
            engine.last_command().as_deref(),
            Some("sql lsl format = json and stat = false \"select count(*) from t\"")
        );
        assert_eq!(
            engine.last_headers().get("destination").map(String::as_str),
            Some("network")
        );
    }

    #[tokio::test]
    async fn test_engine_failure_becomes_error_result() {
        let engine = Arc::new(MockEngine::failing(EngineError::Status {
            status: 500,
            body: "node down".to_string(),
        }));
        let d = dispatcher(engine, true);

        let result = d
            .call("list_schema", &Map::new(), &CancellationToken::new())
            .await
            .unwrap_or_else(|_| unreachable!());
        assert!(result.is_error());
        assert!(result.items()[0].text().starts_with("Error: "));
        assert!(result.items()[0].text().contains("node down"));
    }

    #[tokio::test]
    async fn test_unavailable_engine_is_not_called() {
        let engine = Arc::new(MockEngine::rows(3));
        let d = dispatcher(Arc::clone(&engine), false);

        let result = d
            .call("list_schema", &Map::new(), &CancellationToken::new())
            .await
            .unwrap_or_else(|_| unreachable!());
        assert!(result.is_error());
        assert_eq!(engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancellation_abandons_engine_call() {
        let engine = Arc::new(MockEngine::rows(1).with_delay(Duration::from_secs(60)));
        let d = dispatcher(engine, true);
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let result = d
            .call("list_schema", &Map::new(), &cancel)
            .await
            .unwrap_or_else(|_| unreachable!());
        assert!(result.is_error());
        assert_eq!(result.items()[0].text(), "Error: operation cancelled");
    }

    #[tokio::test]
    async fn test_server_info_is_internal() {
        let engine = Arc::new(MockEngine::rows(1));
        let d = dispatcher(Arc::clone(&engine), false);

        let result = d
            .call("server_info", &Map::new(), &CancellationToken::new())
            .await
            .unwrap_or_else(|_| unreachable!());
        assert!(!result.is_error());
        let info: Value =
            serde_json::from_str(&result.items()[0].text()).unwrap_or_default();
        assert_eq!(info["configuration"]["total_tools"], 7);
        assert_eq!(info["version"], env!("CARGO_PKG_VERSION"));
        assert_eq!(engine.calls(), 0);
    }
}
