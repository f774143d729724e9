//! Bounded task queue
//!
//! Tasks travel through a bounded tokio `mpsc` channel. Lifecycle state and the
//! sender live behind one `RwLock`, so `close` cannot race an in-progress
//! `enqueue`; the queued length is tracked separately in an atomic so `stats`
//! never touches the channel.

use crate::task::Task;
use parking_lot::RwLock;
use replistore_common::{Error, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueueState {
    Created,
    Running,
    Closed,
}

struct Inner {
    state: QueueState,
    sender: Option<mpsc::Sender<Task>>,
}

/// Point-in-time queue statistics
#[derive(Clone, Copy, Debug, Serialize)]
pub struct QueueStats {
    pub size: usize,
    pub capacity: usize,
    pub running: bool,
}

/// Bounded FIFO of deferred tasks
pub struct TaskQueue {
    capacity: usize,
    inner: RwLock<Inner>,
    len: AtomicUsize,
    receiver: tokio::sync::Mutex<mpsc::Receiver<Task>>,
}

impl TaskQueue {
    /// Create a queue holding at most `capacity` tasks
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::invalid_argument("queue capacity must be at least 1"));
        }
        let (sender, receiver) = mpsc::channel(capacity);
        Ok(Self {
            capacity,
            inner: RwLock::new(Inner {
                state: QueueState::Created,
                sender: Some(sender),
            }),
            len: AtomicUsize::new(0),
            receiver: tokio::sync::Mutex::new(receiver),
        })
    }

    /// Accept tasks from now on
    pub fn start(&self) -> Result<()> {
        let mut inner = self.inner.write();
        match inner.state {
            QueueState::Created => {
                inner.state = QueueState::Running;
                info!("Task queue started (capacity {})", self.capacity);
                Ok(())
            }
            QueueState::Running => Err(Error::AlreadyRunning),
            QueueState::Closed => Err(Error::NotRunning),
        }
    }

    /// Add a task without waiting
    ///
    /// Fails with `QueueFull` when the queue is at capacity and `NotRunning`
    /// before `start` or after `close`.
    pub fn enqueue(&self, task: Task) -> Result<()> {
        let inner = self.inner.read();
        let sender = match (inner.state, &inner.sender) {
            (QueueState::Running, Some(sender)) => sender,
            _ => return Err(Error::NotRunning),
        };

        // Reserve a slot before sending: the count never exceeds capacity and a
        // fast consumer never sees it underflow
        if self
            .len
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.capacity).then_some(n + 1)
            })
            .is_err()
        {
            return Err(Error::QueueFull {
                capacity: self.capacity,
            });
        }

        let kind = task.kind;
        let key = task.target_key.clone();
        match sender.try_send(task) {
            Ok(()) => {
                debug!("Task enqueued: {} ({})", kind, key);
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.len.fetch_sub(1, Ordering::AcqRel);
                Err(Error::QueueFull {
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Closed(_)) => {
                self.len.fetch_sub(1, Ordering::AcqRel);
                Err(Error::NotRunning)
            }
        }
    }

    /// Stop accepting tasks; queued tasks stay receivable
    pub fn close(&self) {
        let mut inner = self.inner.write();
        if inner.state != QueueState::Closed {
            inner.state = QueueState::Closed;
            inner.sender = None;
            info!(
                "Task queue closed with {} task(s) pending",
                self.len.load(Ordering::Acquire)
            );
        }
    }

    /// Wait for the next task; `None` once the queue is closed and drained
    pub(crate) async fn recv(&self) -> Option<Task> {
        let mut receiver = self.receiver.lock().await;
        let task = receiver.recv().await;
        if task.is_some() {
            self.len.fetch_sub(1, Ordering::AcqRel);
        }
        task
    }

    /// Remove every task still queued, returning how many were dropped
    pub(crate) async fn discard_pending(&self) -> usize {
        let mut receiver = self.receiver.lock().await;
        let mut dropped = 0;
        while receiver.try_recv().is_ok() {
            self.len.fetch_sub(1, Ordering::AcqRel);
            dropped += 1;
        }
        dropped
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.read().state == QueueState::Running
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            size: self.len(),
            capacity: self.capacity,
            running: self.is_running(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskKind;

    fn task(key: &str) -> Task {
        Task::new(TaskKind::Cleanup, key)
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(TaskQueue::new(0), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_enqueue_before_start() {
        let queue = TaskQueue::new(4).unwrap();
        assert!(matches!(queue.enqueue(task("a")), Err(Error::NotRunning)));
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_full_queue_rejects_without_blocking() {
        let queue = TaskQueue::new(2).unwrap();
        queue.start().unwrap();
        queue.enqueue(task("a")).unwrap();
        queue.enqueue(task("b")).unwrap();

        let err = queue.enqueue(task("c")).unwrap_err();
        assert!(matches!(err, Error::QueueFull { capacity: 2 }));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.stats().size, 2);
    }

    #[test]
    fn test_size_never_exceeds_capacity_under_contention() {
        let queue = TaskQueue::new(2).unwrap();
        queue.start().unwrap();
        queue.enqueue(task("a")).unwrap();
        queue.enqueue(task("b")).unwrap();

        let stop = std::sync::atomic::AtomicBool::new(false);
        let max_seen = std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    while !stop.load(Ordering::Relaxed) {
                        assert!(matches!(
                            queue.enqueue(task("x")),
                            Err(Error::QueueFull { capacity: 2 })
                        ));
                    }
                });
            }
            let mut max_seen = 0;
            for _ in 0..200_000 {
                max_seen = max_seen.max(queue.stats().size);
            }
            stop.store(true, Ordering::Relaxed);
            max_seen
        });

        assert_eq!(max_seen, 2);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_and_consumer_stay_bounded() {
        let queue = std::sync::Arc::new(TaskQueue::new(4).unwrap());
        queue.start().unwrap();

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = std::sync::Arc::clone(&queue);
                tokio::task::spawn_blocking(move || {
                    let mut accepted = 0;
                    for i in 0..2_000 {
                        if queue.enqueue(task(&format!("{p}-{i}"))).is_ok() {
                            accepted += 1;
                        }
                        assert!(queue.stats().size <= 4);
                    }
                    accepted
                })
            })
            .collect();

        let consumer = {
            let queue = std::sync::Arc::clone(&queue);
            tokio::spawn(async move {
                let mut received = 0usize;
                while queue.recv().await.is_some() {
                    received += 1;
                    assert!(queue.len() <= 4);
                }
                received
            })
        };

        let mut accepted = 0usize;
        for producer in producers {
            accepted += producer.await.unwrap();
        }
        queue.close();
        assert_eq!(consumer.await.unwrap(), accepted);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_start_twice_and_after_close() {
        let queue = TaskQueue::new(1).unwrap();
        queue.start().unwrap();
        assert!(matches!(queue.start(), Err(Error::AlreadyRunning)));
        queue.close();
        assert!(!queue.is_running());
        assert!(matches!(queue.start(), Err(Error::NotRunning)));
        assert!(matches!(queue.enqueue(task("a")), Err(Error::NotRunning)));
    }

    #[tokio::test]
    async fn test_fifo_and_drain_after_close() {
        let queue = TaskQueue::new(8).unwrap();
        queue.start().unwrap();
        for key in ["a", "b", "c"] {
            queue.enqueue(task(key)).unwrap();
        }
        queue.close();

        let mut seen = Vec::new();
        while let Some(task) = queue.recv().await {
            seen.push(task.target_key);
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_discard_pending() {
        let queue = TaskQueue::new(8).unwrap();
        queue.start().unwrap();
        queue.enqueue(task("a")).unwrap();
        queue.enqueue(task("b")).unwrap();
        queue.close();

        assert_eq!(queue.discard_pending().await, 2);
        assert_eq!(queue.len(), 0);
        assert!(queue.recv().await.is_none());
    }
}
