//! rmcp handler for the stdio binding.
//!
//! Serves the same catalog and dispatcher as the HTTP binding. Stdio has no
//! chunk retrieval path, so every result is returned inline.

use rmcp::model::{
    CallToolRequestParams, CallToolResult, ErrorCode, Implementation, ListToolsResult,
    PaginatedRequestParams, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use rmcp::service::RequestContext;
use rmcp::{ErrorData as McpError, RoleServer, ServerHandler};
use tracing::debug;

use super::params::CallToolParams;
use super::server::Server;
use crate::error::RpcError;
use crate::tools::ToolDescriptor;

fn to_mcp_error(error: RpcError) -> McpError {
    McpError::new(ErrorCode(error.code), error.message, None)
}

/// rmcp server handler backed by a running [`Server`].
#[derive(Debug, Clone)]
pub struct StdioHandler {
    server: Server,
}

impl StdioHandler {
    /// Wraps `server`, which must already be started.
    #[must_use]
    pub const fn new(server: Server) -> Self {
        Self { server }
    }
}

impl ServerHandler for StdioHandler {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "querygate".to_string(),
                title: Some("querygate MCP server".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Query a distributed data network. Call `list_schema` or `list_tables` to \
                 discover data, `get_columns` for a table's columns, `query` to run SQL, and \
                 `select` to build a query from its parts."
                    .to_string(),
            ),
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let tools = self
            .server
            .tool_descriptors()
            .await
            .map_err(to_mcp_error)?
            .iter()
            .map(ToolDescriptor::to_tool)
            .collect();
        Ok(ListToolsResult {
            tools,
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        debug!(tool = %request.name, "stdio tool call");
        let params = CallToolParams {
            name: request.name.to_string(),
            arguments: request.arguments,
        };
        let result = self
            .server
            .call_tool(&params, &context.ct)
            .await
            .map_err(to_mcp_error)?;
        Ok(result.to_call_tool_result())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;

    #[test]
    fn test_error_code_preserved() {
        let err = to_mcp_error(RpcError::new(codes::TOOL_NOT_FOUND, "tool not found: x"));
        assert_eq!(err.code, ErrorCode(codes::TOOL_NOT_FOUND));
        assert_eq!(err.message, "tool not found: x");
    }

    #[tokio::test]
    async fn test_server_info_advertises_tools() {
        let server = Server::with_engine(
            crate::config::ServerConfig::default(),
            crate::mcp::CatalogSource::Builtin,
            std::sync::Arc::new(crate::tools::UnavailableEngine),
        );
        let info = StdioHandler::new(server).get_info();
        assert_eq!(info.server_info.name, "querygate");
        assert!(info.capabilities.tools.is_some());
    }
}
