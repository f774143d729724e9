//! Queue consumers

use crate::handler::TaskHandler;
use crate::queue::TaskQueue;
use crate::task::Task;
use replistore_common::{Error, Result};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-worker statistics
#[derive(Clone, Debug, Serialize)]
pub struct WorkerStats {
    pub id: String,
    pub running: bool,
    pub tasks_processed: u64,
    pub tasks_failed: u64,
}

/// A single consume loop over the shared queue
///
/// Started at most once; a stopped worker is never restarted.
#[derive(Debug)]
pub struct Worker {
    id: String,
    started: AtomicBool,
    running: AtomicBool,
    tasks_processed: AtomicU64,
    tasks_failed: AtomicU64,
}

impl Worker {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            started: AtomicBool::new(false),
            running: AtomicBool::new(false),
            tasks_processed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn tasks_processed(&self) -> u64 {
        self.tasks_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn tasks_failed(&self) -> u64 {
        self.tasks_failed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            id: self.id.clone(),
            running: self.is_running(),
            tasks_processed: self.tasks_processed(),
            tasks_failed: self.tasks_failed(),
        }
    }

    /// Mark the worker as started
    pub(crate) fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(Error::AlreadyRunning);
        }
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    /// Consume tasks until the queue is closed and drained, or `cancel` fires
    ///
    /// Cancellation only interrupts the wait for the next task; a task that
    /// has been dequeued always runs to completion.
    pub(crate) async fn run(
        self: Arc<Self>,
        queue: Arc<TaskQueue>,
        handler: Arc<dyn TaskHandler>,
        cancel: CancellationToken,
    ) {
        info!("Worker {} started", self.id);

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    info!("Worker {} cancelled", self.id);
                    break;
                }
                task = queue.recv() => task,
            };

            let Some(task) = next else {
                info!("Worker {} stopped (queue closed)", self.id);
                break;
            };

            self.process(handler.as_ref(), &task).await;
        }

        self.running.store(false, Ordering::Release);
    }

    async fn process(&self, handler: &dyn TaskHandler, task: &Task) {
        self.tasks_processed.fetch_add(1, Ordering::Relaxed);
        match handler.handle(task).await {
            Ok(()) => debug!(
                "Worker {} completed task {} ({} {})",
                self.id, task.id, task.kind, task.target_key
            ),
            Err(e) => {
                self.tasks_failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Worker {} failed task {} ({} {}): {}",
                    self.id, task.id, task.kind, task.target_key, e
                );
            }
        }
    }
}
