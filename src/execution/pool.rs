//! Bounded worker pool.
//!
//! The `WorkerPool` limits how many dispatch workers are in flight with a
//! semaphore. Shutting the pool down closes the semaphore: later
//! submissions, and workers still waiting for a permit, are rejected.

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;

/// Errors reported by the worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The pool no longer accepts work.
    #[error("worker pool is shut down")]
    ShutDown,
}

/// Pool of dispatch workers with a concurrency limit.
#[derive(Debug)]
pub struct WorkerPool {
    /// Maximum number of workers holding a permit at once.
    max_workers: usize,
    /// Semaphore for concurrency control.
    permits: Arc<Semaphore>,
}

impl WorkerPool {
    /// Create a new pool with the given concurrency limit.
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers,
            permits: Arc::new(Semaphore::new(max_workers)),
        }
    }

    /// Create a pool sized from configuration.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.workers)
    }

    /// Get the maximum concurrency limit.
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Get the number of available permits.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Stop accepting work. Workers already holding a permit finish normally.
    pub fn shutdown(&self) {
        self.permits.close();
    }

    /// Check if the pool has been shut down.
    pub fn is_shut_down(&self) -> bool {
        self.permits.is_closed()
    }

    /// Spawn a worker.
    ///
    /// The worker first waits for a permit and is then handed either the
    /// permit, or [`PoolError::ShutDown`] if the pool was shut down while it
    /// waited. The permit is released when the worker drops it.
    pub fn spawn<F, Fut>(&self, work: F) -> JoinHandle<()>
    where
        F: FnOnce(Result<OwnedSemaphorePermit, PoolError>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        tokio::spawn(async move {
            let permit = permits
                .acquire_owned()
                .await
                .map_err(|_| PoolError::ShutDown);
            work(permit).await;
        })
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(4) // Default to 4 concurrent workers
    }
}
