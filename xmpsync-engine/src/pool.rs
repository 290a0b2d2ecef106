//! Bounded worker pool with cooperative cancellation.
//!
//! Work items are independent files. Results come back in input order no
//! matter which worker finishes first, so aggregation stays deterministic.
//! Cancellation is checked before each item starts: items already running
//! finish, items not yet started come back as `None`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use xmpsync_core::EngineConfig;

use crate::error::EngineError;

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can be reused for the next batch.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Fixed-size pool shared by scanning and execution.
pub struct WorkerPool {
    pool: rayon::ThreadPool,
    workers: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .finish()
    }
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<Self, EngineError> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("xmpsync-worker-{i}"))
            .build()?;
        Ok(Self { pool, workers })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Self::new(config.effective_workers())
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Apply `f` to every item on the pool. Output order matches input order;
    /// items skipped because of cancellation are `None`.
    pub fn map_ordered<T, R, F>(&self, items: &[T], cancel: &CancelToken, f: F) -> Vec<Option<R>>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Sync + Send,
    {
        self.pool.install(|| {
            items
                .par_iter()
                .map(|item| {
                    if cancel.is_cancelled() {
                        None
                    } else {
                        Some(f(item))
                    }
                })
                .collect()
        })
    }
}
