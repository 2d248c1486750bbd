//! Bounded pool for long-running poll loops
//!
//! Poll loops run on their own tokio tasks, never on the request task that
//! started them. A semaphore caps how many run at once; excess jobs wait for
//! a permit inside their spawned task.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Jobs currently holding a permit.
    pub fn busy(&self) -> usize {
        self.size - self.permits.available_permits()
    }

    /// Run `job` on a new task once a permit is free.
    pub fn spawn<F>(&self, job: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permits = self.permits.clone();
        tokio::spawn(async move {
            let permit = permits.acquire_owned().await;
            if permit.is_err() {
                debug!("worker pool closed, running job without a permit");
            }
            let output = job.await;
            drop(permit);
            output
        })
    }
}
