//! Replistore Queue - deferred work
//!
//! A bounded in-memory task queue drained by a fixed pool of workers. Request
//! handlers enqueue post-write hooks and storage deletions here so that the
//! client never waits on them.

pub mod handler;
pub mod pool;
pub mod queue;
pub mod task;
pub mod worker;

pub use handler::{StorageTaskHandler, TaskHandler};
pub use pool::{PoolStats, WorkerPool};
pub use queue::{QueueStats, TaskQueue};
pub use task::{Task, TaskKind};
pub use worker::{Worker, WorkerStats};
