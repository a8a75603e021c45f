//! Bounded pool that runs avatar fetches
//!
//! Every submitted task is spawned on the tokio runtime but has to acquire one
//! of `concurrency` permits before it starts, so at most `concurrency` fetches
//! are in flight while the rest queue in FIFO order. Results come back through a
//! oneshot channel that the cache entry polls lazily.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Semaphore, oneshot};
use tracing::trace;

pub struct FetchPool {
    permits: Arc<Semaphore>,
    concurrency: usize,
    submitted: AtomicU64,
}

impl FetchPool {
    pub fn new(concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            submitted: AtomicU64::new(0),
        }
    }

    /// Queue `task` on the pool.
    ///
    /// Must be called from within a tokio runtime. If the task panics the
    /// returned receiver reports the channel as closed.
    pub fn submit<F, T>(&self, task: F) -> oneshot::Receiver<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let permits = Arc::clone(&self.permits);
        let ticket = self.submitted.fetch_add(1, Ordering::Relaxed) + 1;

        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return;
            };
            trace!("Fetch task {} started", ticket);
            let output = task.await;
            // receiver is gone when the entry was evicted meanwhile
            let _ = tx.send(output);
        });

        rx
    }

    /// Configured number of concurrent workers
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Workers currently idle
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Total number of tasks ever submitted
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for FetchPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchPool")
            .field("concurrency", &self.concurrency)
            .field("available", &self.available())
            .field("submitted", &self.submitted())
            .finish()
    }
}
