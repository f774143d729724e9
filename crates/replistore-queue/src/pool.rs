//! Worker pool
//!
//! A fixed set of workers, each running on its own tokio task, draining one
//! shared [`TaskQueue`]. Two ways to stop:
//! - [`WorkerPool::stop`] closes the queue and waits until every queued task
//!   has been processed
//! - [`WorkerPool::shutdown_now`] lets in-flight tasks finish, then discards
//!   whatever is still queued and reports it as lost

use crate::handler::TaskHandler;
use crate::queue::TaskQueue;
use crate::task::Task;
use crate::worker::{Worker, WorkerStats};
use parking_lot::Mutex;
use replistore_common::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Pool and queue statistics
#[derive(Clone, Debug, Serialize)]
pub struct PoolStats {
    pub running: bool,
    pub size: usize,
    pub capacity: usize,
    /// Queue fill level in percent
    pub capacity_used: f64,
    pub worker_count: usize,
    pub workers: Vec<WorkerStats>,
}

/// Fixed set of workers draining one queue
pub struct WorkerPool {
    queue: Arc<TaskQueue>,
    handler: Arc<dyn TaskHandler>,
    workers: Vec<Arc<Worker>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Create a pool with `worker_count` workers named `worker-1..=N`
    pub fn new(queue: Arc<TaskQueue>, handler: Arc<dyn TaskHandler>, worker_count: usize) -> Self {
        let mut pool = Self {
            queue,
            handler,
            workers: Vec::with_capacity(worker_count),
            handles: Mutex::new(Vec::new()),
            cancel: CancellationToken::new(),
        };
        for i in 1..=worker_count {
            pool.add_worker(format!("worker-{i}"));
        }
        pool
    }

    /// Register another worker before the pool starts
    pub fn add_worker(&mut self, id: impl Into<String>) {
        self.workers.push(Arc::new(Worker::new(id)));
    }

    #[must_use]
    pub const fn queue(&self) -> &Arc<TaskQueue> {
        &self.queue
    }

    #[must_use]
    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    /// Start the queue and spawn every worker
    pub fn start(&self) -> Result<()> {
        if self.workers.is_empty() {
            return Err(Error::invalid_argument("worker pool has no workers"));
        }
        self.queue.start()?;

        let mut handles = self.handles.lock();
        for worker in &self.workers {
            worker.start()?;
            handles.push(tokio::spawn(Arc::clone(worker).run(
                Arc::clone(&self.queue),
                Arc::clone(&self.handler),
                self.cancel.clone(),
            )));
        }

        info!(
            "Worker pool started with {} workers (queue capacity {})",
            self.workers.len(),
            self.queue.capacity()
        );
        Ok(())
    }

    /// Submit a task to the shared queue
    pub fn enqueue(&self, task: Task) -> Result<()> {
        self.queue.enqueue(task)
    }

    /// Close the queue, let workers drain it and wait for them to exit
    pub async fn stop(&self) {
        self.queue.close();
        self.join_workers().await;
        info!("Worker pool stopped");
    }

    /// Stop after in-flight tasks, discarding anything still queued
    ///
    /// Returns the number of tasks dropped.
    pub async fn shutdown_now(&self) -> usize {
        self.cancel.cancel();
        self.queue.close();
        self.join_workers().await;

        let dropped = self.queue.discard_pending().await;
        if dropped > 0 {
            error!(
                "Worker pool shut down with {} queued task(s) dropped, their work is lost",
                dropped
            );
        } else {
            info!("Worker pool shut down");
        }
        dropped
    }

    async fn join_workers(&self) {
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Worker task panicked: {}", e);
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let queue = self.queue.stats();
        #[allow(clippy::cast_precision_loss)]
        let capacity_used = queue.size as f64 / queue.capacity as f64 * 100.0;
        PoolStats {
            running: queue.running,
            size: queue.size,
            capacity: queue.capacity,
            capacity_used,
            worker_count: self.workers.len(),
            workers: self.workers.iter().map(|w| w.stats()).collect(),
        }
    }
}
