use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinSet};

/// Bounded set of worker slots shared by the tasks of one batch.
///
/// Tasks may be submitted all at once; at most `size` of them run their body
/// concurrently. A pool of size 1 runs bodies strictly one after another.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: NonZeroUsize,
}

impl WorkerPool {
    pub fn new(size: NonZeroUsize) -> Self {
        Self {
            // Sizes past the semaphore's limit are indistinguishable from unbounded.
            permits: Arc::new(Semaphore::new(size.get().min(Semaphore::MAX_PERMITS))),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size.get()
    }

    /// Spawn `task` onto `set`; the body starts once a worker slot is free and
    /// keeps the slot until it finishes.
    pub fn spawn<T, F>(&self, set: &mut JoinSet<T>, task: F) -> AbortHandle
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = Arc::clone(&self.permits);
        set.spawn(async move {
            // The semaphore is never closed, so acquisition only waits.
            let _permit = permits.acquire_owned().await.ok();
            task.await
        })
    }
}
