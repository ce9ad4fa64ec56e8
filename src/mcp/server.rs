//! Server lifecycle controller.
//!
//! A [`Server`] is an explicit handle: whoever starts it owns it and passes
//! it to the transports. There is no process-wide instance.
//!
//! ```text
//! stopped ──start()──► starting ──► running ──stop()──► stopping ──► stopped
//!    ▲                    │
//!    └──── startup error ─┘
//! ```
//!
//! While running, the server owns the session registry, the chunk store, the
//! dispatcher, the worker pool, and two background sweeps (idle sessions and
//! expired chunk sets).

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::params::CallToolParams;
use crate::blocks::{ChunkLease, ChunkStore};
use crate::config::{Capabilities, ServerConfig};
use crate::core::{ChunkSetId, OperationResult, RequestEnvelope, SessionId};
use crate::delivery::{DeliveryRouter, WorkerPool};
use crate::error::{ChunkError, ConfigError, LifecycleError, RpcError};
use crate::session::{Connection, EventChannel, SessionRegistry};
use crate::tools::catalog::restrict;
use crate::tools::{Dispatcher, QueryEngine, ToolCatalog, ToolDescriptor, create_engine};

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    /// Not serving.
    Stopped,
    /// `start()` in progress.
    Starting,
    /// Serving requests.
    Running,
    /// `stop()` in progress.
    Stopping,
}

/// Where the tool catalog comes from.
#[derive(Debug, Clone)]
pub enum CatalogSource {
    /// The built-in tools.
    Builtin,
    /// A JSON catalog file.
    File(PathBuf),
    /// Declarations supplied by the embedder.
    Descriptors(Vec<ToolDescriptor>),
}

impl CatalogSource {
    /// Picks the file from `config` if one is set, the built-in set otherwise.
    #[must_use]
    pub fn from_config(config: &ServerConfig) -> Self {
        config
            .catalog_path
            .clone()
            .map_or(Self::Builtin, Self::File)
    }

    fn load(&self, enabled: Option<&[String]>) -> Result<ToolCatalog, ConfigError> {
        match self {
            Self::Builtin => ToolCatalog::builtin(enabled),
            Self::File(path) => ToolCatalog::load(path, enabled),
            Self::Descriptors(descriptors) => {
                ToolCatalog::from_descriptors(restrict(descriptors.clone(), enabled))
            }
        }
    }
}

/// Answer to a processed request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// `tools/list` result object.
    Tools(Value),
    /// `tools/call` result.
    Called(OperationResult),
}

/// Snapshot of the server for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    /// Lifecycle state.
    pub state: ServerState,
    /// Crate version.
    pub version: &'static str,
    /// When the server entered `running`.
    pub started_at: Option<DateTime<Utc>>,
    /// Engine backend name.
    pub engine: &'static str,
    /// Capabilities negotiated at start.
    pub capabilities: Capabilities,
    /// Open sessions.
    pub sessions: Vec<SessionId>,
    /// Number of catalog tools.
    pub tools: usize,
    /// Chunk sets currently staged.
    pub staged_chunk_sets: usize,
    /// Requests admitted and not yet finished.
    pub in_flight: usize,
}

/// Everything that exists only while the server runs.
struct Running {
    registry: SessionRegistry,
    store: Option<Arc<ChunkStore>>,
    dispatcher: Arc<Dispatcher>,
    router: DeliveryRouter,
    pool: WorkerPool,
    capabilities: Capabilities,
    tasks: TaskTracker,
    shutdown: CancellationToken,
    started_at: DateTime<Utc>,
}

struct Slot {
    state: ServerState,
    running: Option<Arc<Running>>,
}

struct Inner {
    config: ServerConfig,
    catalog: CatalogSource,
    engine: Arc<dyn QueryEngine>,
    slot: RwLock<Slot>,
}

/// Server handle. Cheap to clone; clones share one lifecycle.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("engine", &self.inner.engine.name())
            .field("catalog", &self.inner.catalog)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Creates a stopped server with the engine described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the engine client cannot be created.
    pub fn new(config: ServerConfig, catalog: CatalogSource) -> Result<Self, ConfigError> {
        let engine = create_engine(&config)?;
        Ok(Self::with_engine(config, catalog, engine))
    }

    /// Creates a stopped server around an existing engine.
    #[must_use]
    pub fn with_engine(
        config: ServerConfig,
        catalog: CatalogSource,
        engine: Arc<dyn QueryEngine>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                catalog,
                engine,
                slot: RwLock::new(Slot {
                    state: ServerState::Stopped,
                    running: None,
                }),
            }),
        }
    }

    /// Server configuration.
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> ServerState {
        self.inner.slot.read().await.state
    }

    /// Starts the server.
    ///
    /// Probes the engine once and records the outcome; components consult
    /// the recorded capabilities afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::AlreadyRunning`] unless stopped, or
    /// [`LifecycleError::Startup`] if the catalog cannot be loaded. A failed
    /// start leaves the server stopped.
    pub async fn start(&self) -> Result<Capabilities, LifecycleError> {
        {
            let mut slot = self.inner.slot.write().await;
            if slot.state != ServerState::Stopped {
                return Err(LifecycleError::AlreadyRunning);
            }
            slot.state = ServerState::Starting;
        }
        info!(engine = self.inner.engine.name(), "starting server");

        match self.build().await {
            Ok(running) => {
                let capabilities = running.capabilities;
                let mut slot = self.inner.slot.write().await;
                slot.running = Some(Arc::new(running));
                slot.state = ServerState::Running;
                drop(slot);
                info!(
                    engine_available = capabilities.engine_available,
                    block_transport = capabilities.block_transport,
                    "server running"
                );
                Ok(capabilities)
            }
            Err(e) => {
                warn!(error = %e, "server failed to start");
                self.inner.slot.write().await.state = ServerState::Stopped;
                Err(LifecycleError::Startup(e))
            }
        }
    }

    async fn build(&self) -> Result<Running, ConfigError> {
        let config = &self.inner.config;
        let catalog = Arc::new(self.inner.catalog.load(config.enabled_tools.as_deref())?);

        let engine_available = self.inner.engine.probe().await;
        if !engine_available {
            warn!(engine = self.inner.engine.name(), "query engine did not answer the probe");
        }
        let capabilities = Capabilities {
            engine_available,
            block_transport: config.block_transport_enabled,
        };

        let registry = SessionRegistry::new(config.max_concurrent_sessions);
        let store = capabilities.block_transport.then(|| {
            Arc::new(ChunkStore::new(
                config.block_chunk_size_bytes,
                config.block_retention,
                config.max_staged_bytes,
            ))
        });
        let dispatcher = Arc::new(Dispatcher::new(
            catalog,
            Arc::clone(&self.inner.engine),
            capabilities,
            config,
        ));
        let router = DeliveryRouter::new(
            EventChannel::new(registry.clone(), config.event_send_timeout),
            store.clone(),
            config.block_threshold_bytes,
        );

        let running = Running {
            registry,
            store,
            dispatcher,
            router,
            pool: WorkerPool::new(config.worker_pool_size, config.worker_queue_depth),
            capabilities,
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            started_at: Utc::now(),
        };
        Self::spawn_sweeps(&running, config);
        Ok(running)
    }

    fn spawn_sweeps(running: &Running, config: &ServerConfig) {
        let registry = running.registry.clone();
        let shutdown = running.shutdown.clone();
        let idle_timeout = config.session_idle_timeout;
        let period = config.sweep_interval;
        running.tasks.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let closed = registry.close_idle(idle_timeout).await;
                        if closed > 0 {
                            debug!(closed, "idle sweep");
                        }
                    }
                }
            }
        });

        if let Some(store) = running.store.clone() {
            let shutdown = running.shutdown.clone();
            running.tasks.spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        _ = ticker.tick() => {
                            store.evict_expired().await;
                        }
                    }
                }
            });
        }
    }

    /// Stops the server.
    ///
    /// Closes every session (cancelling their in-flight work), stops the
    /// sweeps, and drops staged chunk sets. Returns `false` without side
    /// effects if the server was not running.
    pub async fn stop(&self) -> bool {
        let running = {
            let mut slot = self.inner.slot.write().await;
            if slot.state != ServerState::Running {
                debug!(state = ?slot.state, "stop ignored");
                return false;
            }
            slot.state = ServerState::Stopping;
            slot.running.take()
        };
        info!("stopping server");

        if let Some(running) = running {
            running.shutdown.cancel();
            running.pool.close();
            let sessions = running.registry.close_all().await;
            let chunk_sets = match &running.store {
                Some(store) => store.clear().await,
                None => 0,
            };
            running.tasks.close();
            running.tasks.wait().await;
            info!(sessions, chunk_sets, "server stopped");
        }

        self.inner.slot.write().await.state = ServerState::Stopped;
        true
    }

    async fn running(&self) -> Result<Arc<Running>, RpcError> {
        let slot = self.inner.slot.read().await;
        match (&slot.state, &slot.running) {
            (ServerState::Running, Some(running)) => Ok(Arc::clone(running)),
            _ => Err(RpcError::not_running()),
        }
    }

    /// Opens a session for a new client connection.
    ///
    /// # Errors
    ///
    /// `-32000` when not running, `-32001` at the session ceiling.
    pub async fn open_session(&self, connection: Connection) -> Result<SessionId, RpcError> {
        let running = self.running().await?;
        running
            .registry
            .open(connection)
            .await
            .map_err(|e| RpcError::from(&e))
    }

    /// Closes a session. Idempotent.
    pub async fn close_session(&self, session_id: &SessionId) -> bool {
        match self.running().await {
            Ok(running) => running.registry.close(session_id).await,
            Err(_) => false,
        }
    }

    /// Records client activity on a session.
    pub async fn touch_session(&self, session_id: &SessionId) -> bool {
        match self.running().await {
            Ok(running) => running.registry.touch(session_id).await,
            Err(_) => false,
        }
    }

    /// Routes one request and returns its reply without delivering it.
    ///
    /// # Errors
    ///
    /// `-32000` when not running, `-32601` for methods other than
    /// `tools/list` and `tools/call`, `-32602` for malformed call params,
    /// and the tool range for dispatch failures.
    pub async fn process_message(
        &self,
        envelope: &RequestEnvelope,
        cancel: &CancellationToken,
    ) -> Result<Reply, RpcError> {
        let running = self.running().await?;
        debug!(
            session_id = %envelope.session_id(),
            request_id = %envelope.id(),
            method = envelope.method(),
            "processing request"
        );

        match envelope.method() {
            "tools/list" => Ok(Reply::Tools(tools_result(running.dispatcher.list()))),
            "tools/call" => {
                let params = CallToolParams::from_params(envelope.params())?;
                running
                    .dispatcher
                    .call(&params.name, &params.arguments(), cancel)
                    .await
                    .map(Reply::Called)
                    .map_err(|e| RpcError::from(&e))
            }
            other => Err(RpcError::method_not_found(other)),
        }
    }

    /// Admits a request from `session_id`, processes it on the worker pool,
    /// and delivers the reply on the session's event stream.
    ///
    /// Returns as soon as the request is admitted. Failures after admission
    /// are delivered as `error` events.
    ///
    /// # Errors
    ///
    /// `-32000` when not running, `-32002` for unknown sessions, `-32001`
    /// when the worker pool is saturated (also pushed as an `error` event).
    pub async fn submit(&self, envelope: RequestEnvelope) -> Result<(), RpcError> {
        let running = self.running().await?;
        let session_id = envelope.session_id().clone();

        let guard = running
            .registry
            .begin_request(&session_id)
            .await
            .map_err(|e| RpcError::from(&e))?;

        let ticket = match running.pool.reserve() {
            Ok(ticket) => ticket,
            Err(e) => {
                let error = RpcError::from(&e);
                warn!(%session_id, request_id = %envelope.id(), "request rejected: {e}");
                running
                    .router
                    .deliver_error(&session_id, Some(envelope.id()), &error)
                    .await;
                return Err(error);
            }
        };

        let server = self.clone();
        let router = running.router.clone();
        running.tasks.spawn(async move {
            let request_id = envelope.id().clone();
            let permit = match ticket.start().await {
                Ok(permit) => permit,
                Err(e) => {
                    router
                        .deliver_error(&session_id, Some(&request_id), &RpcError::from(&e))
                        .await;
                    return;
                }
            };

            let cancel = guard.cancellation().clone();
            let reply = server.process_message(&envelope, &cancel).await;
            // Delivery may wait on a slow reader; it must not hold a worker.
            drop(permit);
            if cancel.is_cancelled() {
                debug!(%session_id, %request_id, "session closed, reply dropped");
                return;
            }

            match reply {
                Ok(Reply::Tools(result)) => {
                    router.deliver_response(&session_id, &request_id, result).await;
                }
                Ok(Reply::Called(result)) => {
                    router.deliver(&session_id, &request_id, &result).await;
                }
                Err(error) => {
                    router
                        .deliver_error(&session_id, Some(&request_id), &error)
                        .await;
                }
            }
            drop(guard);
        });
        Ok(())
    }

    /// Pushes a failure for a request that never made it past parsing.
    pub async fn reject(
        &self,
        session_id: &SessionId,
        request_id: Option<&crate::core::RequestId>,
        error: &RpcError,
    ) -> Option<u64> {
        let running = self.running().await.ok()?;
        running
            .router
            .deliver_error(session_id, request_id, error)
            .await
    }

    /// Calls a tool on the worker pool, bypassing sessions and delivery.
    ///
    /// Used by the stdio binding, which returns results inline.
    ///
    /// # Errors
    ///
    /// `-32001` when the worker pool is saturated, otherwise as for
    /// `tools/call` in [`Server::process_message`].
    pub async fn call_tool(
        &self,
        params: &CallToolParams,
        cancel: &CancellationToken,
    ) -> Result<OperationResult, RpcError> {
        let running = self.running().await?;
        let ticket = running.pool.reserve().map_err(|e| {
            warn!(tool = %params.name, "tool call rejected: {e}");
            RpcError::from(&e)
        })?;

        let arguments = params.arguments();
        let work = async {
            let _permit = match ticket.start().await {
                Ok(permit) => permit,
                Err(e) => return Err(RpcError::from(&e)),
            };
            running
                .dispatcher
                .call(&params.name, &arguments, cancel)
                .await
                .map_err(|e| RpcError::from(&e))
        };
        tokio::select! {
            biased;
            () = running.shutdown.cancelled() => Ok(OperationResult::failure("operation cancelled")),
            result = work => result,
        }
    }

    /// Tools in catalog order.
    ///
    /// # Errors
    ///
    /// `-32000` when not running.
    pub async fn tool_descriptors(&self) -> Result<Vec<ToolDescriptor>, RpcError> {
        Ok(self.running().await?.dispatcher.list().to_vec())
    }

    /// Leases one chunk of a staged result.
    ///
    /// # Errors
    ///
    /// `-32000` when not running, `-32003` for unknown, expired or
    /// out-of-range chunks.
    pub async fn fetch_chunk(
        &self,
        chunk_set_id: &ChunkSetId,
        index: usize,
    ) -> Result<ChunkLease, RpcError> {
        let running = self.running().await?;
        let Some(store) = &running.store else {
            return Err(RpcError::from(&ChunkError::NotFound {
                id: chunk_set_id.to_string(),
            }));
        };
        store
            .fetch(chunk_set_id, index)
            .await
            .map_err(|e| RpcError::from(&e))
    }

    /// Current status.
    pub async fn status(&self) -> ServerStatus {
        let (state, running) = {
            let slot = self.inner.slot.read().await;
            (slot.state, slot.running.clone())
        };

        let mut status = ServerStatus {
            state,
            version: env!("CARGO_PKG_VERSION"),
            started_at: None,
            engine: self.inner.engine.name(),
            capabilities: Capabilities::default(),
            sessions: Vec::new(),
            tools: 0,
            staged_chunk_sets: 0,
            in_flight: 0,
        };
        if let Some(running) = running {
            status.started_at = Some(running.started_at);
            status.capabilities = running.capabilities;
            status.sessions = running.registry.session_ids().await;
            status.tools = running.dispatcher.list().len();
            status.staged_chunk_sets = match &running.store {
                Some(store) => store.len().await,
                None => 0,
            };
            status.in_flight = running.pool.admitted();
        }
        status
    }
}

fn tools_result(tools: &[ToolDescriptor]) -> Value {
    json!({ "tools": tools.iter().map(ToolDescriptor::to_wire).collect::<Vec<_>>() })
}
