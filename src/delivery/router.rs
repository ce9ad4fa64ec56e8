//! Delivery router.
//!
//! Decides, per result, between inline delivery on the event stream and
//! staging in the chunk store. A result is chunked only when its serialized
//! size is strictly greater than the threshold. When chunking is disabled or
//! staging fails the result is delivered inline anyway, and the degradation
//! is logged.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::blocks::{ChunkStore, StagedBlocks};
use crate::core::{EventKind, OperationResult, RequestId, ResponseEnvelope, SessionId};
use crate::error::RpcError;
use crate::session::EventChannel;

/// How a result was delivered. `sequence` is `None` when the push failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Pushed as a single `message` event.
    Inline {
        /// Sequence number of the event.
        sequence: Option<u64>,
    },
    /// Staged as a chunk set, announced with a `blocks_available` event.
    Chunked {
        /// The staged set.
        staged: StagedBlocks,
        /// Sequence number of the announcement.
        sequence: Option<u64>,
    },
    /// Large result pushed inline because chunking was not possible.
    Degraded {
        /// Why chunking was skipped.
        reason: String,
        /// Sequence number of the event.
        sequence: Option<u64>,
    },
}

impl Delivery {
    /// Sequence number of the event that carried the result.
    #[must_use]
    pub const fn sequence(&self) -> Option<u64> {
        match self {
            Self::Inline { sequence }
            | Self::Chunked { sequence, .. }
            | Self::Degraded { sequence, .. } => *sequence,
        }
    }
}

/// Routes results to the event stream or the chunk store.
#[derive(Clone)]
pub struct DeliveryRouter {
    channel: EventChannel,
    store: Option<Arc<ChunkStore>>,
    threshold: usize,
}

impl DeliveryRouter {
    /// Creates a router. `store` is `None` when block transport is disabled.
    #[must_use]
    pub const fn new(channel: EventChannel, store: Option<Arc<ChunkStore>>, threshold: usize) -> Self {
        Self {
            channel,
            store,
            threshold,
        }
    }

    /// Delivers a tool result to `session_id`.
    pub async fn deliver(
        &self,
        session_id: &SessionId,
        request_id: &RequestId,
        result: &OperationResult,
    ) -> Delivery {
        let size = result.size();
        if size <= self.threshold {
            debug!(%session_id, %request_id, size, "delivering inline");
            let sequence = self.push_inline(session_id, request_id, result).await;
            return Delivery::Inline { sequence };
        }

        let Some(store) = &self.store else {
            return self
                .degrade(session_id, request_id, result, "block transport disabled".to_string())
                .await;
        };

        match store.stage(request_id, result).await {
            Ok(staged) => {
                let payload = json!({
                    "id": request_id,
                    "chunk_set_id": staged.chunk_set_id,
                    "chunk_count": staged.chunk_count,
                    "chunk_size": staged.chunk_size,
                    "total_size": staged.total_size,
                });
                let sequence = self
                    .channel
                    .push(session_id, EventKind::BlocksAvailable, payload)
                    .await;
                debug!(
                    %session_id,
                    %request_id,
                    chunk_set_id = %staged.chunk_set_id,
                    chunk_count = staged.chunk_count,
                    "delivered as chunk set"
                );
                Delivery::Chunked { staged, sequence }
            }
            Err(e) => self.degrade(session_id, request_id, result, e.to_string()).await,
        }
    }

    /// Pushes an arbitrary successful response (for example a tool listing).
    pub async fn deliver_response(
        &self,
        session_id: &SessionId,
        request_id: &RequestId,
        result: Value,
    ) -> Option<u64> {
        let envelope = ResponseEnvelope::success(request_id.clone(), result);
        self.channel
            .push(session_id, EventKind::Message, envelope.to_value())
            .await
    }

    /// Pushes a protocol-level failure as an `error` event.
    pub async fn deliver_error(
        &self,
        session_id: &SessionId,
        request_id: Option<&RequestId>,
        error: &RpcError,
    ) -> Option<u64> {
        let envelope = ResponseEnvelope::failure(request_id.cloned(), error.clone());
        self.channel
            .push(session_id, EventKind::Error, envelope.to_value())
            .await
    }

    async fn push_inline(
        &self,
        session_id: &SessionId,
        request_id: &RequestId,
        result: &OperationResult,
    ) -> Option<u64> {
        self.deliver_response(session_id, request_id, result.to_value())
            .await
    }

    async fn degrade(
        &self,
        session_id: &SessionId,
        request_id: &RequestId,
        result: &OperationResult,
        reason: String,
    ) -> Delivery {
        warn!(
            %session_id,
            %request_id,
            size = result.size(),
            threshold = self.threshold,
            reason = %reason,
            "large result delivered inline (degraded mode)"
        );
        let sequence = self.push_inline(session_id, request_id, result).await;
        Delivery::Degraded { reason, sequence }
    }
}
