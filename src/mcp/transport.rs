//! Host transport bindings for HTTP/SSE and stdio.
//!
//! The HTTP binding pairs a long-lived SSE stream (one session per stream)
//! with short-lived POSTs that carry requests. Responses never travel on the
//! POST; they arrive on the stream as `message`, `blocks_available`, or
//! `error` events.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::Stream;
use rmcp::ServiceExt;
use rmcp::transport::io::stdio;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use super::handler::StdioHandler;
use super::server::Server;
use crate::core::{ChunkSetId, Event, RequestEnvelope, RequestId, ResponseEnvelope, SessionId};
use crate::error::{RpcError, codes};
use crate::session::Connection;

/// Starts the stdio binding on a running server.
///
/// The server reads JSON-RPC messages from stdin and writes responses to
/// stdout. Tool results are returned inline.
///
/// # Errors
///
/// Returns an error if the rmcp service fails to start or stops abnormally.
pub async fn serve_stdio(server: Server) -> anyhow::Result<()> {
    let service = StdioHandler::new(server.clone()).serve(stdio()).await?;
    service.waiting().await?;
    server.stop().await;
    Ok(())
}

/// Starts the HTTP/SSE binding on a running server.
///
/// Stops the server on Ctrl-C, which closes every event stream and lets
/// the listener shut down gracefully.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails.
pub async fn serve_http(server: Server, host: &str, port: u16) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    // stdout is reserved for the stdio binding
    #[allow(clippy::print_stderr)]
    {
        eprintln!("querygate listening on http://{addr}/mcp/sse");
    }

    let app = router(server.clone()).into_make_service_with_connect_info::<SocketAddr>();
    let stopping = server.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
            stopping.stop().await;
        })
        .await?;

    server.stop().await;
    Ok(())
}

/// Builds the `/mcp` router.
///
/// Must be served with `into_make_service_with_connect_info::<SocketAddr>()`
/// so the stream endpoint can record the client address.
pub fn router(server: Server) -> Router {
    Router::new()
        .route("/mcp/sse", get(open_stream))
        .route("/mcp/messages/{session_id}", post(post_message))
        .route("/mcp/blocks/{chunk_set_id}/{index}", get(fetch_block))
        .route("/mcp/status", get(status))
        .with_state(server)
}

/// HTTP status for a wire error returned directly to an HTTP caller.
const fn http_status(code: i32) -> StatusCode {
    match code {
        codes::SERVER_NOT_RUNNING => StatusCode::SERVICE_UNAVAILABLE,
        codes::CAPACITY_EXCEEDED => StatusCode::TOO_MANY_REQUESTS,
        codes::SESSION_NOT_FOUND | codes::CHUNK_NOT_FOUND => StatusCode::NOT_FOUND,
        codes::INTERNAL_ERROR => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

fn error_response(error: RpcError, id: Option<RequestId>) -> Response {
    let status = http_status(error.code);
    (status, Json(ResponseEnvelope::failure(id, error).to_value())).into_response()
}

fn to_sse(event: &Event) -> SseEvent {
    SseEvent::default()
        .event(event.kind.as_str())
        .id(event.sequence.to_string())
        .data(event.payload.to_string())
}

/// GET /mcp/sse
async fn open_stream(
    State(server): State<Server>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    let (connection, rx) = Connection::channel(server.config().event_buffer, Some(peer.to_string()));
    let session_id = match server.open_session(connection).await {
        Ok(id) => id,
        Err(e) => return error_response(e, None),
    };
    info!(%session_id, %peer, "event stream opened");

    let endpoint = SseEvent::default()
        .event("endpoint")
        .data(format!("/mcp/messages/{session_id}"));
    let events = tokio_stream::once(endpoint)
        .chain(ReceiverStream::new(rx).map(|event| to_sse(&event)))
        .map(Ok::<_, Infallible>);

    let keep_alive = KeepAlive::new()
        .interval(server.config().keepalive_interval)
        .text("keep-alive");
    let stream = SessionStream {
        inner: Box::pin(events),
        _guard: CloseOnDrop { server, session_id },
    };
    Sse::new(stream).keep_alive(keep_alive).into_response()
}

/// POST /mcp/messages/{session_id}
async fn post_message(
    State(server): State<Server>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Response {
    let session_id = SessionId::from(session_id);
    let envelope = match RequestEnvelope::parse(&body, session_id.clone()) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(%session_id, error = %e.error, "unparseable request");
            server.reject(&session_id, e.id.as_ref(), &e.error).await;
            return (StatusCode::BAD_REQUEST, Json(e.into_response().to_value())).into_response();
        }
    };

    let id = envelope.id().clone();
    match server.submit(envelope).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(e, Some(id)),
    }
}

/// GET /mcp/blocks/{chunk_set_id}/{index}
async fn fetch_block(
    State(server): State<Server>,
    Path((chunk_set_id, index)): Path<(String, usize)>,
) -> Response {
    let chunk_set_id = ChunkSetId::from(chunk_set_id);
    match server.fetch_chunk(&chunk_set_id, index).await {
        Ok(lease) => {
            let chunk = lease.chunk();
            let headers = [
                ("content-type", "application/octet-stream".to_string()),
                ("x-chunk-index", chunk.index().to_string()),
                ("x-chunk-count", lease.chunk_count().to_string()),
                ("x-chunk-length", chunk.len().to_string()),
                ("x-total-size", lease.total_size().to_string()),
                ("x-chunk-created-at", chunk.created_at().to_rfc3339()),
            ];
            (StatusCode::OK, headers, Bytes::copy_from_slice(chunk.payload())).into_response()
        }
        Err(e) => {
            debug!(%chunk_set_id, index, error = %e, "chunk fetch failed");
            error_response(e, None)
        }
    }
}

/// GET /mcp/status
async fn status(State(server): State<Server>) -> Response {
    Json(server.status().await).into_response()
}

/// Closes the session when its event stream is dropped.
struct CloseOnDrop {
    server: Server,
    session_id: SessionId,
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let server = self.server.clone();
        let session_id = self.session_id.clone();
        handle.spawn(async move {
            if server.close_session(&session_id).await {
                info!(%session_id, "event stream closed by client");
            }
        });
    }
}

type EventStream = Pin<Box<dyn Stream<Item = Result<SseEvent, Infallible>> + Send>>;

struct SessionStream {
    inner: EventStream,
    _guard: CloseOnDrop,
}

impl Stream for SessionStream {
    type Item = Result<SseEvent, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::{Value, json};

    use super::*;
    use crate::config::ServerConfig;
    use crate::mcp::server::CatalogSource;
    use crate::tools::ToolCatalog;
    use crate::tools::testing::MockEngine;

    const THRESHOLD: usize = 256;

    async fn spawn(engine: MockEngine) -> (Server, String) {
        let config = ServerConfig::builder()
            .block_threshold_bytes(THRESHOLD)
            .block_chunk_size_bytes(100)
            .keepalive_interval(Duration::from_secs(3600))
            .build()
            .unwrap_or_else(|_| unreachable!());
        let catalog = CatalogSource::Descriptors(
            ToolCatalog::builtin(None)
                .unwrap_or_else(|_| unreachable!())
                .list()
                .to_vec(),
        );
        let server = Server::with_engine(config, catalog, Arc::new(engine));
        server.start().await.unwrap_or_else(|_| unreachable!());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .unwrap_or_else(|_| unreachable!());
        let addr = listener.local_addr().unwrap_or_else(|_| unreachable!());
        let app = router(server.clone()).into_make_service_with_connect_info::<SocketAddr>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (server, format!("http://{addr}"))
    }

    /// Reads SSE frames until one with the given event name arrives.
    async fn next_frame(stream: &mut reqwest::Response, buf: &mut String, event: &str) -> (String, String) {
        loop {
            while let Some(end) = buf.find("\n\n") {
                let frame: String = buf.drain(..end + 2).collect();
                let mut name = String::new();
                let mut id = String::new();
                let mut data = String::new();
                for line in frame.lines() {
                    if let Some(v) = line.strip_prefix("event:") {
                        name = v.trim().to_string();
                    } else if let Some(v) = line.strip_prefix("id:") {
                        id = v.trim().to_string();
                    } else if let Some(v) = line.strip_prefix("data:") {
                        data.push_str(v.trim_start());
                    }
                }
                if name == event {
                    return (id, data);
                }
            }
            let chunk = tokio::time::timeout(Duration::from_secs(5), stream.chunk())
                .await
                .unwrap_or_else(|_| unreachable!())
                .unwrap_or_else(|_| unreachable!())
                .unwrap_or_else(|| unreachable!());
            buf.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    async fn connect(base: &str) -> (reqwest::Response, String, String) {
        let mut stream = reqwest::get(format!("{base}/mcp/sse"))
            .await
            .unwrap_or_else(|_| unreachable!());
        let mut buf = String::new();
        let (_, endpoint) = next_frame(&mut stream, &mut buf, "endpoint").await;
        (stream, buf, endpoint)
    }

    async fn post(base: &str, endpoint: &str, body: &Value) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("{base}{endpoint}"))
            .body(body.to_string())
            .send()
            .await
            .unwrap_or_else(|_| unreachable!())
    }

    #[tokio::test]
    async fn test_tools_list_over_sse() {
        let (server, base) = spawn(MockEngine::rows(1)).await;
        let (mut stream, mut buf, endpoint) = connect(&base).await;
        assert!(endpoint.starts_with("/mcp/messages/"));

        let response = post(&base, &endpoint, &json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"})).await;
        assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

        let (id, data) = next_frame(&mut stream, &mut buf, "message").await;
        assert_eq!(id, "1");
        let payload: Value = serde_json::from_str(&data).unwrap_or_default();
        assert_eq!(payload["id"], 1);
        assert_eq!(payload["result"]["tools"].as_array().map(Vec::len), Some(6));
        server.stop().await;
    }

    #[tokio::test]
    async fn test_large_result_fetched_as_blocks() {
        let (server, base) = spawn(MockEngine::text(4 * THRESHOLD)).await;
        let (mut stream, mut buf, endpoint) = connect(&base).await;

        let call = json!({"id": "big", "method": "tools/call", "params": {"name": "list_schema"}});
        assert_eq!(post(&base, &endpoint, &call).await.status(), reqwest::StatusCode::ACCEPTED);

        let (_, data) = next_frame(&mut stream, &mut buf, "blocks_available").await;
        let announced: Value = serde_json::from_str(&data).unwrap_or_default();
        let set = announced["chunk_set_id"].as_str().unwrap_or_default().to_string();
        let count = announced["chunk_count"].as_u64().unwrap_or_default();
        let total = announced["total_size"].as_u64().unwrap_or_default();

        let mut bytes = Vec::new();
        for index in 0..count {
            let response = reqwest::get(format!("{base}/mcp/blocks/{set}/{index}"))
                .await
                .unwrap_or_else(|_| unreachable!());
            assert_eq!(response.status(), reqwest::StatusCode::OK);
            let header = |name: &str| {
                response
                    .headers()
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
            };
            assert_eq!(header("x-chunk-index"), Some(index));
            assert_eq!(header("x-chunk-count"), Some(count));
            assert_eq!(header("x-total-size"), Some(total));
            assert!(response.headers().contains_key("x-chunk-created-at"));
            bytes.extend_from_slice(&response.bytes().await.unwrap_or_default());
        }
        assert_eq!(bytes.len() as u64, total);
        let result: Value = serde_json::from_slice(&bytes).unwrap_or_default();
        assert_eq!(result["isError"], false);

        let missing = reqwest::get(format!("{base}/mcp/blocks/{set}/{count}"))
            .await
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let (server, base) = spawn(MockEngine::rows(1)).await;
        let response = post(
            &base,
            "/mcp/messages/nope",
            &json!({"id": 5, "method": "tools/list"}),
        )
        .await;
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        let body: Value = response.json().await.unwrap_or_default();
        assert_eq!(body["error"]["code"], codes::SESSION_NOT_FOUND);
        assert_eq!(body["id"], 5);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_malformed_body_is_rejected_and_pushed() {
        let (server, base) = spawn(MockEngine::rows(1)).await;
        let (mut stream, mut buf, endpoint) = connect(&base).await;

        let response = reqwest::Client::new()
            .post(format!("{base}{endpoint}"))
            .body("{not json")
            .send()
            .await
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let (_, data) = next_frame(&mut stream, &mut buf, "error").await;
        let payload: Value = serde_json::from_str(&data).unwrap_or_default();
        assert_eq!(payload["error"]["code"], codes::PARSE_ERROR);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_dropping_stream_closes_session() {
        let (server, base) = spawn(MockEngine::rows(1)).await;
        let (stream, _, _) = connect(&base).await;

        let status: Value = reqwest::get(format!("{base}/mcp/status"))
            .await
            .unwrap_or_else(|_| unreachable!())
            .json()
            .await
            .unwrap_or_default();
        assert_eq!(status["state"], "running");
        assert_eq!(status["sessions"].as_array().map(Vec::len), Some(1));

        drop(stream);
        let closed = tokio::time::timeout(Duration::from_secs(5), async {
            while !server.status().await.sessions.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(closed.is_ok());
        server.stop().await;
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(http_status(codes::SERVER_NOT_RUNNING), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(http_status(codes::CAPACITY_EXCEEDED), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(http_status(codes::CHUNK_NOT_FOUND), StatusCode::NOT_FOUND);
        assert_eq!(http_status(codes::INVALID_ARGUMENTS), StatusCode::BAD_REQUEST);
    }
}
