//! Object service
//!
//! Orchestrates one client operation across the storage tier, the metadata
//! index and the task queue:
//! - upload: write to every node, record the nodes that hold the object, then
//!   queue post-write work
//! - read: look up metadata, read primary-then-fallback, re-replicate objects
//!   served by the third-party source
//! - delete: drop metadata now, remove the bytes from the nodes later

use replistore_common::{BlobObject, ObjectRecord, Result};
use replistore_meta_store::MetadataIndex;
use replistore_queue::{PoolStats, Task, TaskKind, WorkerPool};
use replistore_storage::{ReadSource, ReplicationManager, WriteReport};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of a completed upload
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub record: ObjectRecord,
    pub report: WriteReport,
}

/// Result of a read
#[derive(Debug, Clone)]
pub struct ObjectRead {
    pub object: BlobObject,
    /// Metadata after the read (refreshed when the object was self-healed)
    pub record: ObjectRecord,
    pub source: ReadSource,
}

/// Client-facing object operations
pub struct ObjectService {
    manager: Arc<ReplicationManager>,
    metadata: Arc<dyn MetadataIndex>,
    pool: Arc<WorkerPool>,
}

impl ObjectService {
    pub fn new(
        manager: Arc<ReplicationManager>,
        metadata: Arc<dyn MetadataIndex>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            manager,
            metadata,
            pool,
        }
    }

    #[must_use]
    pub const fn manager(&self) -> &Arc<ReplicationManager> {
        &self.manager
    }

    #[must_use]
    pub fn metadata(&self) -> &dyn MetadataIndex {
        self.metadata.as_ref()
    }

    /// Write `object` to every node, persist its metadata and queue
    /// post-write tasks
    pub async fn execute_upload_flow(&self, object: &BlobObject) -> Result<UploadOutcome> {
        info!("Starting upload flow for {}", object.key());

        let report = self.manager.write_to_all_nodes(object).await?;

        let record = ObjectRecord::for_object(object, report.written.clone());
        self.metadata.save(&record)?;

        let hash = object.content_hash().to_hex();
        let completed = Task::new(TaskKind::UploadCompleted, object.key())
            .with_field("object_id", object.id().to_string())
            .with_field("size", object.size())
            .with_field("content_type", object.content_type())
            .with_field("md5_hash", hash.clone());
        if let Err(e) = self.pool.enqueue(completed) {
            warn!("Failed to enqueue upload_completed for {}: {}", object.key(), e);
        }

        if report.is_degraded() {
            let check = Task::new(TaskKind::ReplicationCheck, object.key()).with_field("md5_hash", hash);
            if let Err(e) = self.pool.enqueue(check) {
                warn!("Failed to enqueue replication_check for {}: {}", object.key(), e);
            }
        }

        info!(
            "Upload flow completed for {} ({}/{} nodes)",
            object.key(),
            report.successes,
            report.total
        );
        Ok(UploadOutcome { record, report })
    }

    /// Read an object that has a metadata record
    ///
    /// An object served by the third-party source is written back through the
    /// upload flow; a failed write-back is logged and the object still returned.
    pub async fn read_object(&self, key: &str) -> Result<ObjectRead> {
        let mut record = self.metadata.get(key)?;
        let read = self.manager.read_primary_then_fallback(key).await?;

        if read.source == ReadSource::ThirdParty {
            match self.execute_upload_flow(&read.object).await {
                Ok(outcome) => {
                    info!("Self-healed {} from third party source", key);
                    record = outcome.record;
                }
                Err(e) => warn!("Self-heal of {} failed: {}", key, e),
            }
        }

        Ok(ObjectRead {
            object: read.object,
            record,
            source: read.source,
        })
    }

    /// Metadata for `key` without touching the storage nodes
    pub fn head_object(&self, key: &str) -> Result<ObjectRecord> {
        self.metadata.get(key)
    }

    /// Remove the metadata record now and the stored bytes asynchronously
    ///
    /// Fails only when there is no record; a failed enqueue is logged.
    pub fn delete_object(&self, key: &str) -> Result<()> {
        self.metadata.delete(key)?;
        if let Err(e) = self.enqueue_delete_task(key) {
            warn!("Failed to enqueue delete task for {}: {}", key, e);
        }
        Ok(())
    }

    /// Queue removal of `key` from every storage node
    pub fn enqueue_delete_task(&self, key: &str) -> Result<()> {
        self.pool.enqueue(Task::delete_from_storage(key))
    }

    #[must_use]
    pub fn queue_stats(&self) -> PoolStats {
        self.pool.stats()
    }
}
