//! Server configuration with builder pattern and environment variable support.
//!
//! Configuration is resolved in order: explicit values → environment variables → defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::error::ConfigError;

/// Default large-result threshold (10 MiB). Results strictly larger are chunked.
pub const DEFAULT_BLOCK_THRESHOLD_BYTES: usize = 10 * 1024 * 1024;
/// Default chunk size (1 MiB), well inside common proxy and frame limits.
pub const DEFAULT_BLOCK_CHUNK_SIZE_BYTES: usize = 1024 * 1024;
/// Default concurrent session ceiling.
const DEFAULT_MAX_CONCURRENT_SESSIONS: usize = 100;
/// Default idle timeout before a session is swept.
const DEFAULT_SESSION_IDLE_TIMEOUT_SECS: u64 = 300;
/// Default worker count.
const DEFAULT_WORKER_POOL_SIZE: usize = 10;
/// Default number of requests allowed to wait for a worker.
const DEFAULT_WORKER_QUEUE_DEPTH: usize = 64;
/// Default chunk set retention.
const DEFAULT_BLOCK_RETENTION_SECS: u64 = 600;
/// Default ceiling on bytes held by the chunk store (512 MiB).
const DEFAULT_MAX_STAGED_BYTES: usize = 512 * 1024 * 1024;
/// Default per-session event buffer.
const DEFAULT_EVENT_BUFFER: usize = 64;
/// Default SSE keep-alive interval.
const DEFAULT_KEEPALIVE_INTERVAL_SECS: u64 = 30;
/// Default interval of the idle and eviction sweeps.
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;
/// Default wait for a full event buffer before the session is closed.
const DEFAULT_EVENT_SEND_TIMEOUT_SECS: u64 = 30;
/// Default engine request timeout.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 20;
/// Default bind host.
const DEFAULT_HOST: &str = "127.0.0.1";
/// Default bind port.
const DEFAULT_PORT: u16 = 3000;

/// Configuration for the server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerConfig {
    /// Host to bind the HTTP binding to.
    pub host: String,
    /// Port to bind the HTTP binding to.
    pub port: u16,
    /// Whether large results may be staged as chunk sets.
    pub block_transport_enabled: bool,
    /// Results strictly larger than this are chunked.
    pub block_threshold_bytes: usize,
    /// Size of each chunk.
    pub block_chunk_size_bytes: usize,
    /// How long a chunk set stays retrievable.
    #[serde(with = "duration_secs")]
    pub block_retention: Duration,
    /// Ceiling on bytes held by the chunk store.
    pub max_staged_bytes: usize,
    /// Maximum number of open sessions.
    pub max_concurrent_sessions: usize,
    /// Sessions idle longer than this are closed.
    #[serde(with = "duration_secs")]
    pub session_idle_timeout: Duration,
    /// Number of requests executed concurrently.
    pub worker_pool_size: usize,
    /// Number of requests allowed to wait for a worker.
    pub worker_queue_depth: usize,
    /// Events buffered per session before pushes wait.
    pub event_buffer: usize,
    /// How long a push may wait on a full buffer before the session closes.
    #[serde(with = "duration_secs")]
    pub event_send_timeout: Duration,
    /// SSE keep-alive interval.
    #[serde(with = "duration_secs")]
    pub keepalive_interval: Duration,
    /// Interval of the idle-session and chunk-eviction sweeps.
    #[serde(with = "duration_secs")]
    pub sweep_interval: Duration,
    /// Timeout for a single engine request.
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,
    /// Base URL of the query engine node, if any.
    pub engine_url: Option<String>,
    /// Path to the JSON tool catalog.
    pub catalog_path: Option<PathBuf>,
    /// Restricts the catalog to these tool names.
    pub enabled_tools: Option<Vec<String>>,
}

impl ServerConfig {
    /// Creates a new builder for `ServerConfig`.
    #[must_use]
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// Creates configuration from environment variables with defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a resolved value is out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::builder().from_env().build()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            block_transport_enabled: true,
            block_threshold_bytes: DEFAULT_BLOCK_THRESHOLD_BYTES,
            block_chunk_size_bytes: DEFAULT_BLOCK_CHUNK_SIZE_BYTES,
            block_retention: Duration::from_secs(DEFAULT_BLOCK_RETENTION_SECS),
            max_staged_bytes: DEFAULT_MAX_STAGED_BYTES,
            max_concurrent_sessions: DEFAULT_MAX_CONCURRENT_SESSIONS,
            session_idle_timeout: Duration::from_secs(DEFAULT_SESSION_IDLE_TIMEOUT_SECS),
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            worker_queue_depth: DEFAULT_WORKER_QUEUE_DEPTH,
            event_buffer: DEFAULT_EVENT_BUFFER,
            event_send_timeout: Duration::from_secs(DEFAULT_EVENT_SEND_TIMEOUT_SECS),
            keepalive_interval: Duration::from_secs(DEFAULT_KEEPALIVE_INTERVAL_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            engine_url: None,
            catalog_path: None,
            enabled_tools: None,
        }
    }
}

/// Capability flags negotiated once at startup.
///
/// Components consult these flags instead of probing collaborators again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Capabilities {
    /// The query engine answered the startup probe.
    pub engine_available: bool,
    /// Large results may be staged in the chunk store.
    pub block_transport: bool,
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone, Default)]
pub struct ServerConfigBuilder {
    host: Option<String>,
    port: Option<u16>,
    block_transport_enabled: Option<bool>,
    block_threshold_bytes: Option<usize>,
    block_chunk_size_bytes: Option<usize>,
    block_retention: Option<Duration>,
    max_staged_bytes: Option<usize>,
    max_concurrent_sessions: Option<usize>,
    session_idle_timeout: Option<Duration>,
    worker_pool_size: Option<usize>,
    worker_queue_depth: Option<usize>,
    event_buffer: Option<usize>,
    event_send_timeout: Option<Duration>,
    keepalive_interval: Option<Duration>,
    sweep_interval: Option<Duration>,
    request_timeout: Option<Duration>,
    engine_url: Option<String>,
    catalog_path: Option<PathBuf>,
    enabled_tools: Option<Vec<String>>,
}

fn parse<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

fn secs(value: Option<String>) -> Option<Duration> {
    parse::<u64>(value).map(Duration::from_secs)
}

impl ServerConfigBuilder {
    /// Populates unset fields from environment variables.
    #[must_use]
    pub fn from_env(self) -> Self {
        self.from_lookup(|key| std::env::var(key).ok())
    }

    /// Populates unset fields from `QUERYGATE_*` keys resolved by `var`.
    #[must_use]
    pub fn from_lookup(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if self.host.is_none() {
            self.host = var("QUERYGATE_HOST");
        }
        if self.port.is_none() {
            self.port = parse(var("QUERYGATE_PORT"));
        }
        if self.block_transport_enabled.is_none() {
            self.block_transport_enabled = parse(var("QUERYGATE_BLOCK_TRANSPORT_ENABLED"));
        }
        if self.block_threshold_bytes.is_none() {
            self.block_threshold_bytes = parse(var("QUERYGATE_BLOCK_THRESHOLD_BYTES"));
        }
        if self.block_chunk_size_bytes.is_none() {
            self.block_chunk_size_bytes = parse(var("QUERYGATE_BLOCK_CHUNK_SIZE_BYTES"));
        }
        if self.block_retention.is_none() {
            self.block_retention = secs(var("QUERYGATE_BLOCK_RETENTION_SECONDS"));
        }
        if self.max_staged_bytes.is_none() {
            self.max_staged_bytes = parse(var("QUERYGATE_MAX_STAGED_BYTES"));
        }
        if self.max_concurrent_sessions.is_none() {
            self.max_concurrent_sessions = parse(var("QUERYGATE_MAX_CONCURRENT_SESSIONS"));
        }
        if self.session_idle_timeout.is_none() {
            self.session_idle_timeout = secs(var("QUERYGATE_SESSION_IDLE_TIMEOUT_SECONDS"));
        }
        if self.worker_pool_size.is_none() {
            self.worker_pool_size = parse(var("QUERYGATE_WORKER_POOL_SIZE"));
        }
        if self.worker_queue_depth.is_none() {
            self.worker_queue_depth = parse(var("QUERYGATE_WORKER_QUEUE_DEPTH"));
        }
        if self.event_buffer.is_none() {
            self.event_buffer = parse(var("QUERYGATE_EVENT_BUFFER"));
        }
        if self.event_send_timeout.is_none() {
            self.event_send_timeout = secs(var("QUERYGATE_EVENT_SEND_TIMEOUT_SECONDS"));
        }
        if self.keepalive_interval.is_none() {
            self.keepalive_interval = secs(var("QUERYGATE_KEEPALIVE_INTERVAL_SECONDS"));
        }
        if self.sweep_interval.is_none() {
            self.sweep_interval = secs(var("QUERYGATE_SWEEP_INTERVAL_SECONDS"));
        }
        if self.request_timeout.is_none() {
            self.request_timeout = secs(var("QUERYGATE_REQUEST_TIMEOUT_SECONDS"));
        }
        if self.engine_url.is_none() {
            self.engine_url = var("QUERYGATE_ENGINE_URL");
        }
        if self.catalog_path.is_none() {
            self.catalog_path = var("QUERYGATE_CATALOG").map(PathBuf::from);
        }
        if self.enabled_tools.is_none() {
            self.enabled_tools = var("QUERYGATE_ENABLED_TOOLS").map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            });
        }
        self
    }

    /// Sets the bind host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Sets the bind port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Enables or disables chunked delivery.
    #[must_use]
    pub const fn block_transport_enabled(mut self, enabled: bool) -> Self {
        self.block_transport_enabled = Some(enabled);
        self
    }

    /// Sets the large-result threshold.
    #[must_use]
    pub const fn block_threshold_bytes(mut self, n: usize) -> Self {
        self.block_threshold_bytes = Some(n);
        self
    }

    /// Sets the chunk size.
    #[must_use]
    pub const fn block_chunk_size_bytes(mut self, n: usize) -> Self {
        self.block_chunk_size_bytes = Some(n);
        self
    }

    /// Sets the chunk set retention window.
    #[must_use]
    pub const fn block_retention(mut self, retention: Duration) -> Self {
        self.block_retention = Some(retention);
        self
    }

    /// Sets the chunk store byte ceiling.
    #[must_use]
    pub const fn max_staged_bytes(mut self, n: usize) -> Self {
        self.max_staged_bytes = Some(n);
        self
    }

    /// Sets the concurrent session ceiling.
    #[must_use]
    pub const fn max_concurrent_sessions(mut self, n: usize) -> Self {
        self.max_concurrent_sessions = Some(n);
        self
    }

    /// Sets the session idle timeout.
    #[must_use]
    pub const fn session_idle_timeout(mut self, timeout: Duration) -> Self {
        self.session_idle_timeout = Some(timeout);
        self
    }

    /// Sets the worker count.
    #[must_use]
    pub const fn worker_pool_size(mut self, n: usize) -> Self {
        self.worker_pool_size = Some(n);
        self
    }

    /// Sets the worker wait-queue depth.
    #[must_use]
    pub const fn worker_queue_depth(mut self, n: usize) -> Self {
        self.worker_queue_depth = Some(n);
        self
    }

    /// Sets the per-session event buffer.
    #[must_use]
    pub const fn event_buffer(mut self, n: usize) -> Self {
        self.event_buffer = Some(n);
        self
    }

    /// Sets how long a push may wait on a full event buffer.
    #[must_use]
    pub const fn event_send_timeout(mut self, timeout: Duration) -> Self {
        self.event_send_timeout = Some(timeout);
        self
    }

    /// Sets the SSE keep-alive interval.
    #[must_use]
    pub const fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = Some(interval);
        self
    }

    /// Sets the sweep interval.
    #[must_use]
    pub const fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Sets the engine request timeout.
    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the engine base URL.
    #[must_use]
    pub fn engine_url(mut self, url: impl Into<String>) -> Self {
        self.engine_url = Some(url.into());
        self
    }

    /// Sets the tool catalog path.
    #[must_use]
    pub fn catalog_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.catalog_path = Some(path.into());
        self
    }

    /// Restricts the catalog to the named tools.
    #[must_use]
    pub fn enabled_tools(mut self, names: Vec<String>) -> Self {
        self.enabled_tools = Some(names);
        self
    }

    /// Builds the [`ServerConfig`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for zero sizes, a zero worker pool,
    /// or a zero session ceiling.
    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        let defaults = ServerConfig::default();

        let config = ServerConfig {
            host: self.host.unwrap_or(defaults.host),
            port: self.port.unwrap_or(defaults.port),
            block_transport_enabled: self
                .block_transport_enabled
                .unwrap_or(defaults.block_transport_enabled),
            block_threshold_bytes: self
                .block_threshold_bytes
                .unwrap_or(defaults.block_threshold_bytes),
            block_chunk_size_bytes: self
                .block_chunk_size_bytes
                .unwrap_or(defaults.block_chunk_size_bytes),
            block_retention: self.block_retention.unwrap_or(defaults.block_retention),
            max_staged_bytes: self.max_staged_bytes.unwrap_or(defaults.max_staged_bytes),
            max_concurrent_sessions: self
                .max_concurrent_sessions
                .unwrap_or(defaults.max_concurrent_sessions),
            session_idle_timeout: self
                .session_idle_timeout
                .unwrap_or(defaults.session_idle_timeout),
            worker_pool_size: self.worker_pool_size.unwrap_or(defaults.worker_pool_size),
            worker_queue_depth: self
                .worker_queue_depth
                .unwrap_or(defaults.worker_queue_depth),
            event_buffer: self.event_buffer.unwrap_or(defaults.event_buffer),
            event_send_timeout: self
                .event_send_timeout
                .unwrap_or(defaults.event_send_timeout),
            keepalive_interval: self
                .keepalive_interval
                .unwrap_or(defaults.keepalive_interval),
            sweep_interval: self.sweep_interval.unwrap_or(defaults.sweep_interval),
            request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
            engine_url: self.engine_url,
            catalog_path: self.catalog_path,
            enabled_tools: self.enabled_tools,
        };

        let positive = [
            ("block_threshold_bytes", config.block_threshold_bytes),
            ("block_chunk_size_bytes", config.block_chunk_size_bytes),
            ("max_concurrent_sessions", config.max_concurrent_sessions),
            ("worker_pool_size", config.worker_pool_size),
            ("event_buffer", config.event_buffer),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    message: "must be greater than zero".to_string(),
                });
            }
        }
        let durations = [
            ("sweep_interval", config.sweep_interval),
            ("event_send_timeout", config.event_send_timeout),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::Invalid {
                    field,
                    message: "must be greater than zero".to_string(),
                });
            }
        }

        Ok(config)
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}
