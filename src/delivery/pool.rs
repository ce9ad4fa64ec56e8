//! Bounded worker pool.
//!
//! At most `size` requests execute at once and at most `queue_depth` more
//! may wait for a worker. Admission is decided synchronously, so a request
//! that would overflow the queue is rejected before anything is spawned.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::AdmissionError;

/// Worker pool handle. Cheap to clone.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    workers: Arc<Semaphore>,
    admitted: Arc<AtomicUsize>,
    size: usize,
    queue_depth: usize,
}

impl WorkerPool {
    /// Creates a pool of `size` workers with a wait queue of `queue_depth`.
    #[must_use]
    pub fn new(size: usize, queue_depth: usize) -> Self {
        let size = size.max(1);
        Self {
            workers: Arc::new(Semaphore::new(size)),
            admitted: Arc::new(AtomicUsize::new(0)),
            size,
            queue_depth,
        }
    }

    /// Reserves a place for one request.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Saturated`] when every worker is busy and
    /// the queue is full, or [`AdmissionError::Closed`] after [`close`].
    ///
    /// [`close`]: WorkerPool::close
    pub fn reserve(&self) -> Result<Ticket, AdmissionError> {
        if self.workers.is_closed() {
            return Err(AdmissionError::Closed);
        }
        let capacity = self.size + self.queue_depth;
        self.admitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .map_err(|admitted| {
                debug!(admitted, capacity, "worker pool saturated");
                AdmissionError::Saturated {
                    workers: self.size,
                    queued: self.queue_depth,
                }
            })?;
        Ok(Ticket { pool: self.clone() })
    }

    /// Rejects new work and wakes every waiting ticket with an error.
    pub fn close(&self) {
        self.workers.close();
    }

    /// Requests admitted and not yet finished, running or waiting.
    #[must_use]
    pub fn admitted(&self) -> usize {
        self.admitted.load(Ordering::Acquire)
    }
}

/// An admitted request waiting for a worker.
#[derive(Debug)]
pub struct Ticket {
    pool: WorkerPool,
}

impl Ticket {
    /// Waits for a free worker.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Closed`] if the pool closes while waiting.
    pub async fn start(self) -> Result<WorkerPermit, AdmissionError> {
        let permit = Arc::clone(&self.pool.workers)
            .acquire_owned()
            .await
            .map_err(|_| AdmissionError::Closed)?;
        Ok(WorkerPermit {
            _permit: permit,
            _ticket: self,
        })
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.pool.admitted.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A running request. Dropping it frees the worker.
#[derive(Debug)]
pub struct WorkerPermit {
    _permit: OwnedSemaphorePermit,
    _ticket: Ticket,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_rejects_beyond_queue_depth() {
        let pool = WorkerPool::new(2, 1);
        let tickets: Vec<Ticket> = (0..3)
            .map(|_| pool.reserve().unwrap_or_else(|_| unreachable!()))
            .collect();
        assert_eq!(pool.admitted(), 3);

        assert_eq!(
            pool.reserve().err(),
            Some(AdmissionError::Saturated {
                workers: 2,
                queued: 1
            })
        );

        drop(tickets);
        assert_eq!(pool.admitted(), 0);
        assert!(pool.reserve().is_ok());
    }

    #[tokio::test]
    async fn test_waiting_ticket_starts_when_worker_frees() {
        let pool = WorkerPool::new(1, 1);
        let first = pool
            .reserve()
            .unwrap_or_else(|_| unreachable!())
            .start()
            .await
            .unwrap_or_else(|_| unreachable!());
        let waiting = pool.reserve().unwrap_or_else(|_| unreachable!());

        let handle = tokio::spawn(async move { waiting.start().await.is_ok() });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!handle.is_finished());

        drop(first);
        assert!(handle.await.unwrap_or(false));
        assert_eq!(pool.admitted(), 0);
    }

    #[tokio::test]
    async fn test_close_fails_waiting_tickets() {
        let pool = WorkerPool::new(1, 4);
        let _running = pool
            .reserve()
            .unwrap_or_else(|_| unreachable!())
            .start()
            .await
            .unwrap_or_else(|_| unreachable!());
        let waiting = pool.reserve().unwrap_or_else(|_| unreachable!());

        pool.close();
        assert_eq!(waiting.start().await.err(), Some(AdmissionError::Closed));
        assert_eq!(pool.reserve().err(), Some(AdmissionError::Closed));
    }
}
