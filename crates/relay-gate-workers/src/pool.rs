// crates/relay-gate-workers/src/pool.rs
// ============================================================================
// Module: Worker Task Pool
// Description: Bounded-parallel execution for worker batches.
// Purpose: Run a batch of tasks with a fixed concurrency limit.
// Dependencies: tokio
// ============================================================================

//! ## Overview
//! Each worker loop hands one batch of futures to the pool; at most
//! `size` run at once and the pool drains completely before the loop
//! continues. A panicking task is contained at the task boundary and
//! surfaced as an error string so the worker can convert it to an
//! `INTERNAL` failure instead of dying.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

// ============================================================================
// SECTION: Pool
// ============================================================================

/// Fixed-size task pool shared by one worker loop.
pub struct TaskPool {
    /// Concurrency limit.
    semaphore: Arc<Semaphore>,
}

impl TaskPool {
    /// Creates a pool running at most `size` tasks concurrently.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(size.max(1))),
        }
    }

    /// Runs every future to completion under the concurrency limit.
    ///
    /// Completion order is not defined. A panicked task yields an `Err`
    /// with the panic description; the batch still drains fully.
    pub async fn run_all<F, T>(&self, futures: Vec<F>) -> Vec<Result<T, String>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut set = JoinSet::new();
        for future in futures {
            let semaphore = Arc::clone(&self.semaphore);
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                future.await
            });
        }
        let mut results = Vec::new();
        while let Some(joined) = set.join_next().await {
            results.push(joined.map_err(|err| format!("worker task failed: {err}")));
        }
        results
    }
}
