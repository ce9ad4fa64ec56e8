//! Chunk store for large results.
//!
//! A staged result is split into fixed-size chunks addressed by
//! `(chunk_set_id, index)`. Sets expire after the retention window but are
//! never evicted while a [`ChunkLease`] on them is alive.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::{ChunkSetId, OperationResult, RequestId};
use crate::error::ChunkError;

/// One contiguous slice of a staged payload.
#[derive(Debug, Clone)]
pub struct Chunk {
    index: usize,
    payload: Arc<[u8]>,
    created_at: DateTime<Utc>,
}

impl Chunk {
    /// Position within the set, starting at 0.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Chunk bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns `true` for the empty chunk of a zero-byte result.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Staging timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// A staged result.
#[derive(Debug)]
pub struct ChunkSet {
    id: ChunkSetId,
    chunks: Vec<Chunk>,
    total_size: usize,
    staged_at: Instant,
    leases: AtomicUsize,
}

impl ChunkSet {
    /// Set identifier.
    #[must_use]
    pub const fn id(&self) -> &ChunkSetId {
        &self.id
    }

    /// Number of chunks.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Size of the original payload.
    #[must_use]
    pub const fn total_size(&self) -> usize {
        self.total_size
    }

    fn is_expired(&self, retention: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.staged_at) > retention
    }

    fn is_leased(&self) -> bool {
        self.leases.load(Ordering::Acquire) > 0
    }
}

/// Description of a freshly staged set, as announced to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StagedBlocks {
    /// Set identifier.
    pub chunk_set_id: ChunkSetId,
    /// Number of chunks.
    pub chunk_count: usize,
    /// Nominal size of every chunk but the last.
    pub chunk_size: usize,
    /// Size of the original payload.
    pub total_size: usize,
}

/// Pins a chunk set against eviction while a chunk is transferred.
#[derive(Debug)]
pub struct ChunkLease {
    set: Arc<ChunkSet>,
    index: usize,
}

impl ChunkLease {
    /// The leased chunk.
    #[must_use]
    pub fn chunk(&self) -> &Chunk {
        &self.set.chunks[self.index]
    }

    /// Number of chunks in the owning set.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.set.chunk_count()
    }

    /// Size of the original payload.
    #[must_use]
    pub fn total_size(&self) -> usize {
        self.set.total_size
    }
}

impl Drop for ChunkLease {
    fn drop(&mut self) {
        self.set.leases.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Default)]
struct Sets {
    by_id: HashMap<ChunkSetId, Arc<ChunkSet>>,
    staged_bytes: usize,
}

impl Sets {
    fn remove(&mut self, id: &ChunkSetId) -> Option<Arc<ChunkSet>> {
        let removed = self.by_id.remove(id)?;
        self.staged_bytes = self.staged_bytes.saturating_sub(removed.total_size);
        Some(removed)
    }
}

/// Holds staged chunk sets until they expire.
pub struct ChunkStore {
    sets: RwLock<Sets>,
    chunk_size: usize,
    retention: Duration,
    max_staged_bytes: usize,
}

impl ChunkStore {
    /// Creates a store producing chunks of `chunk_size` bytes.
    #[must_use]
    pub fn new(chunk_size: usize, retention: Duration, max_staged_bytes: usize) -> Self {
        Self {
            sets: RwLock::new(Sets::default()),
            chunk_size: chunk_size.max(1),
            retention,
            max_staged_bytes,
        }
    }

    /// Stages the serialized form of `result`.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::StoreFull`] if the store cannot hold the payload.
    pub async fn stage(
        &self,
        request_id: &RequestId,
        result: &OperationResult,
    ) -> Result<StagedBlocks, ChunkError> {
        self.stage_bytes(request_id, result.encoded()).await
    }

    /// Splits `payload` into chunks and stages them under a new id.
    ///
    /// A zero-byte payload yields exactly one empty chunk.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::StoreFull`] if the store cannot hold the payload.
    pub async fn stage_bytes(
        &self,
        request_id: &RequestId,
        payload: &[u8],
    ) -> Result<StagedBlocks, ChunkError> {
        let total_size = payload.len();
        let created_at = Utc::now();
        let chunks: Vec<Chunk> = if payload.is_empty() {
            vec![Chunk {
                index: 0,
                payload: Arc::from(Vec::new()),
                created_at,
            }]
        } else {
            payload
                .chunks(self.chunk_size)
                .enumerate()
                .map(|(index, slice)| Chunk {
                    index,
                    payload: Arc::from(slice),
                    created_at,
                })
                .collect()
        };

        let id = ChunkSetId::for_request(request_id);
        let staged = StagedBlocks {
            chunk_set_id: id.clone(),
            chunk_count: chunks.len(),
            chunk_size: self.chunk_size,
            total_size,
        };
        let set = Arc::new(ChunkSet {
            id: id.clone(),
            chunks,
            total_size,
            staged_at: Instant::now(),
            leases: AtomicUsize::new(0),
        });

        let mut sets = self.sets.write().await;
        let available = self.max_staged_bytes.saturating_sub(sets.staged_bytes);
        if total_size > available {
            warn!(%request_id, requested = total_size, available, "chunk store full");
            return Err(ChunkError::StoreFull {
                requested: total_size,
                available,
            });
        }
        sets.staged_bytes += total_size;
        sets.by_id.insert(id, set);
        drop(sets);

        debug!(
            %request_id,
            chunk_set_id = %staged.chunk_set_id,
            chunk_count = staged.chunk_count,
            total_size,
            "staged chunk set"
        );
        Ok(staged)
    }

    /// Leases one chunk for transfer.
    ///
    /// An expired set without outstanding leases is evicted on the spot.
    ///
    /// # Errors
    ///
    /// Returns [`ChunkError::NotFound`] for unknown or expired sets and
    /// [`ChunkError::OutOfRange`] for an index past the end.
    pub async fn fetch(&self, id: &ChunkSetId, index: usize) -> Result<ChunkLease, ChunkError> {
        let not_found = || ChunkError::NotFound { id: id.to_string() };

        {
            let sets = self.sets.read().await;
            let set = sets.by_id.get(id).ok_or_else(not_found)?;
            if !set.is_expired(self.retention, Instant::now()) {
                let count = set.chunk_count();
                if index >= count {
                    return Err(ChunkError::OutOfRange {
                        id: id.to_string(),
                        index,
                        count,
                    });
                }
                set.leases.fetch_add(1, Ordering::AcqRel);
                return Ok(ChunkLease {
                    set: Arc::clone(set),
                    index,
                });
            }
        }

        let mut sets = self.sets.write().await;
        if sets.by_id.get(id).is_some_and(|s| !s.is_leased()) {
            sets.remove(id);
            debug!(chunk_set_id = %id, "evicted expired chunk set on fetch");
        }
        Err(not_found())
    }

    /// Removes every expired set that has no outstanding lease.
    pub async fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut sets = self.sets.write().await;
        let expired: Vec<ChunkSetId> = sets
            .by_id
            .values()
            .filter(|s| s.is_expired(self.retention, now) && !s.is_leased())
            .map(|s| s.id.clone())
            .collect();
        for id in &expired {
            sets.remove(id);
        }
        drop(sets);

        if !expired.is_empty() {
            info!(count = expired.len(), "evicted expired chunk sets");
        }
        expired.len()
    }

    /// Drops every staged set.
    pub async fn clear(&self) -> usize {
        let mut sets = self.sets.write().await;
        let count = sets.by_id.len();
        sets.by_id.clear();
        sets.staged_bytes = 0;
        count
    }

    /// Number of staged sets.
    pub async fn len(&self) -> usize {
        self.sets.read().await.by_id.len()
    }

    /// Returns `true` when nothing is staged.
    pub async fn is_empty(&self) -> bool {
        self.sets.read().await.by_id.is_empty()
    }

    /// Bytes currently held.
    pub async fn staged_bytes(&self) -> usize {
        self.sets.read().await.staged_bytes
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    const CHUNK: usize = 16;
    const THRESHOLD: usize = 64;

    fn store() -> ChunkStore {
        ChunkStore::new(CHUNK, Duration::from_secs(60), 1024 * 1024)
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    async fn reassemble(store: &ChunkStore, staged: &StagedBlocks) -> Vec<u8> {
        let mut out = Vec::new();
        for index in 0..staged.chunk_count {
            let lease = store
                .fetch(&staged.chunk_set_id, index)
                .await
                .unwrap_or_else(|_| unreachable!());
            assert_eq!(lease.chunk().index(), index);
            out.extend_from_slice(lease.chunk().payload());
        }
        out
    }

    #[test_case(0, 1 ; "empty payload")]
    #[test_case(1, 1 ; "one byte")]
    #[test_case(THRESHOLD - 1, 4 ; "just under threshold")]
    #[test_case(THRESHOLD + 1, 5 ; "just over threshold")]
    #[test_case(10 * CHUNK + 1, 11 ; "ten chunks and a byte")]
    #[tokio::test]
    async fn test_stage_and_reassemble(len: usize, expected_chunks: usize) {
        let store = store();
        let bytes = payload(len);
        let staged = store
            .stage_bytes(&RequestId::Number(1), &bytes)
            .await
            .unwrap_or_else(|_| unreachable!());

        assert_eq!(staged.chunk_count, expected_chunks);
        assert_eq!(staged.total_size, len);
        assert_eq!(staged.chunk_size, CHUNK);
        assert_eq!(reassemble(&store, &staged).await, bytes);
    }

    #[tokio::test]
    async fn test_stage_operation_result() {
        let store = store();
        let result = OperationResult::failure("x".repeat(100));
        let staged = store
            .stage(&RequestId::from("q"), &result)
            .await
            .unwrap_or_else(|_| unreachable!());
        assert_eq!(staged.total_size, result.size());
        assert_eq!(reassemble(&store, &staged).await, result.encoded().to_vec());
    }

    #[tokio::test]
    async fn test_fetch_out_of_range() {
        let store = store();
        let staged = store
            .stage_bytes(&RequestId::Number(1), &payload(20))
            .await
            .unwrap_or_else(|_| unreachable!());

        let err = store.fetch(&staged.chunk_set_id, 2).await.err();
        assert!(matches!(
            err,
            Some(ChunkError::OutOfRange {
                index: 2,
                count: 2,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_fetch_unknown_set() {
        let store = store();
        let err = store.fetch(&ChunkSetId::from("blk-none"), 0).await.err();
        assert!(matches!(err, Some(ChunkError::NotFound { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_sets_are_evicted() {
        let store = store();
        let staged = store
            .stage_bytes(&RequestId::Number(1), &payload(40))
            .await
            .unwrap_or_else(|_| unreachable!());

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(store.evict_expired().await, 0);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(store.evict_expired().await, 1);
        assert!(store.is_empty().await);
        assert_eq!(store.staged_bytes().await, 0);
        assert!(matches!(
            store.fetch(&staged.chunk_set_id, 0).await.err(),
            Some(ChunkError::NotFound { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_blocks_eviction() {
        let store = store();
        let staged = store
            .stage_bytes(&RequestId::Number(1), &payload(40))
            .await
            .unwrap_or_else(|_| unreachable!());
        let lease = store
            .fetch(&staged.chunk_set_id, 1)
            .await
            .unwrap_or_else(|_| unreachable!());

        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(store.evict_expired().await, 0);
        assert_eq!(lease.chunk().len(), CHUNK);
        assert_eq!(lease.total_size(), 40);

        drop(lease);
        assert_eq!(store.evict_expired().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_evicts_expired_set_lazily() {
        let store = store();
        let staged = store
            .stage_bytes(&RequestId::Number(1), &payload(8))
            .await
            .unwrap_or_else(|_| unreachable!());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(store.fetch(&staged.chunk_set_id, 0).await.is_err());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_stage_rejects_when_full() {
        let store = ChunkStore::new(CHUNK, Duration::from_secs(60), 50);
        assert!(
            store
                .stage_bytes(&RequestId::Number(1), &payload(40))
                .await
                .is_ok()
        );

        let err = store.stage_bytes(&RequestId::Number(2), &payload(20)).await;
        assert_eq!(
            err,
            Err(ChunkError::StoreFull {
                requested: 20,
                available: 10
            })
        );
    }

    #[tokio::test]
    async fn test_clear() {
        let store = store();
        for n in 0..3 {
            let _ = store.stage_bytes(&RequestId::Number(n), &payload(5)).await;
        }
        assert_eq!(store.clear().await, 3);
        assert!(store.is_empty().await);
    }
}
