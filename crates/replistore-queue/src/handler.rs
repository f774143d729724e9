//! Task handlers
//!
//! Workers hand every dequeued task to a [`TaskHandler`]. The default
//! [`StorageTaskHandler`] runs the built-in task kinds against the storage
//! tier; embedders can supply their own handler instead.

use crate::task::{Task, TaskKind};
use async_trait::async_trait;
use replistore_common::{ContentHash, Error, Result};
use replistore_storage::ReplicationManager;
use std::sync::Arc;
use tracing::{info, warn};

/// Processes a single task
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<()>;
}

/// Handler for the built-in task kinds
pub struct StorageTaskHandler {
    manager: Arc<ReplicationManager>,
}

impl StorageTaskHandler {
    pub const fn new(manager: Arc<ReplicationManager>) -> Self {
        Self { manager }
    }

    fn upload_completed(task: &Task) {
        info!(
            "Upload completed for {} (size: {}, content type: {})",
            task.target_key,
            task.field_u64("size").unwrap_or_default(),
            task.field_str("content_type").unwrap_or("unknown")
        );
    }

    fn cleanup(task: &Task) {
        info!("Cleanup requested for {}", task.target_key);
    }

    /// Read the key from every node and report missing or divergent replicas
    async fn replication_check(&self, task: &Task) -> Result<()> {
        let key = &task.target_key;
        let expected = match task.field_str("md5_hash") {
            Some(hex) => Some(
                hex.parse::<ContentHash>()
                    .map_err(|e| Error::InvalidHash(e.to_string()))?,
            ),
            None => None,
        };

        let mut reference = expected;
        let mut healthy = 0;
        let mut missing = Vec::new();
        let mut divergent = Vec::new();

        for (node, result) in self.manager.read_each_node(key).await {
            match result {
                Ok(object) => {
                    let hash = object.content_hash();
                    match reference {
                        Some(want) if want != hash => divergent.push(node.to_string()),
                        Some(_) => healthy += 1,
                        None => {
                            reference = Some(hash);
                            healthy += 1;
                        }
                    }
                }
                Err(e) if e.is_not_found() => missing.push(node.to_string()),
                Err(e) => {
                    warn!("Replication check could not read {} from {}: {}", key, node, e);
                    missing.push(node.to_string());
                }
            }
        }

        if missing.is_empty() && divergent.is_empty() {
            info!(
                "Replication check for {}: all {} replicas consistent",
                key, healthy
            );
        } else {
            warn!(
                "Replication check for {}: {} consistent, missing on [{}], divergent on [{}]",
                key,
                healthy,
                missing.join(", "),
                divergent.join(", ")
            );
        }
        Ok(())
    }

    async fn delete_from_storage(&self, task: &Task) -> Result<()> {
        let key = task.target_key.as_str();
        if key.is_empty() {
            return Err(Error::invalid_argument("delete task has no target key"));
        }

        let report = self.manager.delete_from_all_nodes(key).await;
        if report.all_failed() {
            return Err(Error::AllDeletesFailed {
                key: key.to_string(),
                attempted: report.attempted,
                last: report.last_error.unwrap_or_default(),
            });
        }

        info!(
            "Deleted {} from storage: {}/{} nodes succeeded",
            key, report.succeeded, report.attempted
        );
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for StorageTaskHandler {
    async fn handle(&self, task: &Task) -> Result<()> {
        match task.kind {
            TaskKind::UploadCompleted => {
                Self::upload_completed(task);
                Ok(())
            }
            TaskKind::Cleanup => {
                Self::cleanup(task);
                Ok(())
            }
            TaskKind::ReplicationCheck => self.replication_check(task).await,
            TaskKind::DeleteFromStorage => self.delete_from_storage(task).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replistore_common::{BlobObject, NodeId};
    use replistore_storage::StorageNode;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mode {
        Healthy,
        Down,
        Hanging,
    }

    struct MemNode {
        id: NodeId,
        mode: Mode,
        objects: Mutex<HashMap<String, BlobObject>>,
    }

    impl MemNode {
        fn arc(id: &str, mode: Mode) -> Arc<Self> {
            Arc::new(Self {
                id: NodeId::new(id),
                mode,
                objects: Mutex::new(HashMap::new()),
            })
        }

        fn put(&self, object: BlobObject) {
            self.objects
                .lock()
                .unwrap()
                .insert(object.key().to_string(), object);
        }

        fn has(&self, key: &str) -> bool {
            self.objects.lock().unwrap().contains_key(key)
        }

        async fn check(&self) -> Result<()> {
            if self.mode == Mode::Hanging {
                std::future::pending::<()>().await;
            }
            if self.mode == Mode::Down {
                return Err(Error::ConnectionFailed(format!("{} is down", self.id)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl StorageNode for MemNode {
        fn id(&self) -> &NodeId {
            &self.id
        }

        async fn write(&self, object: &BlobObject) -> Result<()> {
            self.check().await?;
            self.put(object.clone());
            Ok(())
        }

        async fn read(&self, key: &str) -> Result<BlobObject> {
            self.check().await?;
            self.objects
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| Error::not_found(key))
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.check().await?;
            self.objects.lock().unwrap().remove(key);
            Ok(())
        }
    }

    fn handler(nodes: &[Arc<MemNode>]) -> StorageTaskHandler {
        handler_with_timeout(nodes, None)
    }

    fn handler_with_timeout(nodes: &[Arc<MemNode>], timeout: Option<Duration>) -> StorageTaskHandler {
        let mut builder = ReplicationManager::builder().node_timeout(timeout);
        for node in nodes {
            builder = builder.node(node.clone());
        }
        StorageTaskHandler::new(Arc::new(builder.build().unwrap()))
    }

    #[tokio::test]
    async fn test_delete_succeeds_when_one_node_succeeds() {
        let n1 = MemNode::arc("stg1", Mode::Healthy);
        let n2 = MemNode::arc("stg2", Mode::Down);
        let n3 = MemNode::arc("stg3", Mode::Healthy);
        n1.put(BlobObject::new("b/obj1", "", &b"hello"[..]));

        let handler = handler(&[n1.clone(), n2, n3]);
        handler
            .handle(&Task::delete_from_storage("b/obj1"))
            .await
            .unwrap();
        assert!(!n1.has("b/obj1"));
    }

    #[tokio::test]
    async fn test_delete_fails_when_every_node_fails() {
        let handler = handler(&[
            MemNode::arc("stg1", Mode::Down),
            MemNode::arc("stg2", Mode::Down),
        ]);
        let err = handler
            .handle(&Task::delete_from_storage("b/obj1"))
            .await
            .unwrap_err();
        match err {
            Error::AllDeletesFailed { attempted, last, .. } => {
                assert_eq!(attempted, 2);
                assert!(last.contains("stg2"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_delete_with_no_nodes_is_ok() {
        let handler = handler(&[]);
        handler
            .handle(&Task::delete_from_storage("b/obj1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_replication_check_tolerates_divergence() {
        let n1 = MemNode::arc("stg1", Mode::Healthy);
        let n2 = MemNode::arc("stg2", Mode::Healthy);
        let n3 = MemNode::arc("stg3", Mode::Down);
        let good = BlobObject::new("b/k", "", &b"good"[..]);
        n1.put(good.clone());
        n2.put(BlobObject::new("b/k", "", &b"stale"[..]));

        let handler = handler(&[n1, n2, n3]);
        let task = Task::new(TaskKind::ReplicationCheck, "b/k")
            .with_field("md5_hash", good.content_hash().to_hex());
        handler.handle(&task).await.unwrap();
    }

    #[tokio::test]
    async fn test_replication_check_does_not_wait_on_stuck_node() {
        let stuck = MemNode::arc("stg1", Mode::Hanging);
        let n2 = MemNode::arc("stg2", Mode::Healthy);
        n2.put(BlobObject::new("b/k", "", &b"data"[..]));

        let handler = handler_with_timeout(&[stuck, n2], Some(Duration::from_millis(20)));
        let task = Task::new(TaskKind::ReplicationCheck, "b/k");
        let result = tokio::time::timeout(Duration::from_secs(1), handler.handle(&task)).await;
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn test_replication_check_rejects_bad_hash() {
        let handler = handler(&[MemNode::arc("stg1", Mode::Healthy)]);
        let task = Task::new(TaskKind::ReplicationCheck, "b/k").with_field("md5_hash", "xyz");
        assert!(matches!(
            handler.handle(&task).await,
            Err(Error::InvalidHash(_))
        ));
    }

    #[tokio::test]
    async fn test_placeholder_kinds_succeed() {
        let handler = handler(&[]);
        for kind in [TaskKind::UploadCompleted, TaskKind::Cleanup] {
            handler.handle(&Task::new(kind, "b/k")).await.unwrap();
        }
    }
}
