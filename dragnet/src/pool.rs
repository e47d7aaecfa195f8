use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no worker pool registered for key {0:?}")]
    UnknownKey(String),
    #[error("worker pool has been shut down")]
    Closed,
}

/// Bounded concurrent executor partitioned by pool key.
///
/// Each key (one per stage) owns an independent concurrency budget.
/// Submission is bounded-blocking: `submit` waits for a free slot instead
/// of rejecting, which throttles upstream fan-out without extra signaling.
/// A successfully submitted unit of work runs exactly once; submission only
/// fails for an unregistered key or after `shutdown`, and the caller is
/// always told.
#[derive(Default)]
pub struct WorkerPool {
    budgets: DashMap<String, Arc<Semaphore>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or resize by replacement) the budget for `key`.
    pub fn register(&self, key: &str, permits: usize) {
        self.budgets
            .insert(key.to_string(), Arc::new(Semaphore::new(permits)));
    }

    /// Queue `work` under `key`'s budget, waiting for capacity. The
    /// returned handle resolves when the work finishes; awaiting it is the
    /// caller's per-step completion signal.
    pub async fn submit<F>(&self, key: &str, work: F) -> Result<JoinHandle<()>, PoolError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let budget = self
            .budgets
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PoolError::UnknownKey(key.to_string()))?;

        let permit = budget
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        Ok(tokio::spawn(async move {
            let _permit = permit;
            work.await;
        }))
    }

    /// Close every budget. In-flight work keeps running; further
    /// submissions fail with [`PoolError::Closed`].
    pub fn shutdown(&self) {
        for entry in self.budgets.iter() {
            entry.value().close();
        }
    }
}
