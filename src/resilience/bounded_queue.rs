//! Bounded concurrency gate.
//!
//! Limits the number of in-flight operations. Callers beyond the limit wait
//! in a FIFO queue and are released in submission order as slots free up.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Returned when acquiring a slot on a closed queue.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Concurrency gate is closed")]
pub struct QueueClosedError;

/// FIFO concurrency gate backed by a fair semaphore.
pub struct BoundedQueue {
    max_concurrent: usize,
    semaphore: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
}

impl BoundedQueue {
    /// Creates a gate admitting at most `max_concurrent` operations at once.
    ///
    /// A limit of zero is raised to one.
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            max_concurrent,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            waiting: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Waits for a free slot.
    ///
    /// The slot is held until the returned permit is dropped. Dropping the
    /// returned future while it waits removes the caller from the queue.
    pub async fn acquire(&self) -> Result<QueuePermit, QueueClosedError> {
        let _waiting = WaitingGuard::enter(&self.waiting);

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| QueueClosedError)?;

        Ok(QueuePermit { _permit: permit })
    }

    /// Runs `operation` once a slot is free and releases the slot when it completes.
    ///
    /// The slot is released on success, on error and when the returned
    /// future is dropped mid-flight.
    pub async fn run<F, Fut, T>(&self, operation: F) -> Result<T, QueueClosedError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire().await?;
        Ok(operation().await)
    }

    /// Number of operations currently holding a slot.
    pub fn active(&self) -> usize {
        self.max_concurrent
            .saturating_sub(self.semaphore.available_permits())
    }

    /// Number of callers waiting for a slot.
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Configured concurrency limit.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Closes the gate: queued and future callers fail with [`QueueClosedError`].
    ///
    /// Operations already holding a slot run to completion.
    pub fn close(&self) {
        self.semaphore.close();
        tracing::info!("Concurrency gate closed");
    }

    /// Returns true if the gate has been closed.
    pub fn is_closed(&self) -> bool {
        self.semaphore.is_closed()
    }
}

impl std::fmt::Debug for BoundedQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedQueue")
            .field("max_concurrent", &self.max_concurrent)
            .field("active", &self.active())
            .field("waiting", &self.waiting())
            .finish()
    }
}

/// A held concurrency slot, released on drop.
#[derive(Debug)]
pub struct QueuePermit {
    _permit: OwnedSemaphorePermit,
}

struct WaitingGuard<'a>(&'a AtomicUsize);

impl<'a> WaitingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
