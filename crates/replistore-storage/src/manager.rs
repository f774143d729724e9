//! Replication manager
//!
//! Owns the ordered node list and the optional fallback origin. Writes fan out
//! sequentially to every node and succeed when at least one node accepts the
//! object; reads go to the primary node first and fall back to the origin.
//!
//! ```text
//!            write_to_all_nodes              read_primary_then_fallback
//!                    │                                  │
//!        ┌───────────┼───────────┐                      ▼
//!        ▼           ▼           ▼                 ┌─────────┐  miss   ┌─────────────┐
//!   ┌─────────┐ ┌─────────┐ ┌─────────┐            │ primary │ ──────▶ │ third party │
//!   │  stg1   │ │  stg2   │ │  stg3   │            └─────────┘         └─────────────┘
//!   └─────────┘ └─────────┘ └─────────┘
//! ```

use crate::node::StorageNode;
use crate::third_party::ThirdPartySource;
use replistore_common::{BlobObject, DEFAULT_PRIMARY_NODE, Error, NodeId, Result};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Outcome of a write fan-out
#[derive(Debug, Clone, Default)]
pub struct WriteReport {
    /// Number of nodes that stored the object
    pub successes: usize,
    /// Number of nodes attempted
    pub total: usize,
    /// Nodes that stored the object, in write order
    pub written: Vec<NodeId>,
    /// Nodes that failed, with the error message
    pub failures: Vec<(NodeId, String)>,
}

impl WriteReport {
    /// True when some, but not all, nodes hold the object
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        self.successes > 0 && self.successes < self.total
    }
}

/// Outcome of a delete fan-out
#[derive(Debug, Clone, Default)]
pub struct FanOutReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub last_error: Option<String>,
}

impl FanOutReport {
    /// True when nodes were attempted and none succeeded
    #[must_use]
    pub const fn all_failed(&self) -> bool {
        self.attempted > 0 && self.succeeded == 0
    }
}

/// Where a fallback read was served from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    Primary,
    ThirdParty,
}

/// Result of [`ReplicationManager::read_primary_then_fallback`]
#[derive(Debug, Clone)]
pub struct FallbackRead {
    pub object: BlobObject,
    pub source: ReadSource,
}

/// Builder for [`ReplicationManager`]
pub struct ReplicationManagerBuilder {
    nodes: Vec<Arc<dyn StorageNode>>,
    third_party: Option<Arc<dyn ThirdPartySource>>,
    primary: Option<NodeId>,
    node_timeout: Option<Duration>,
}

impl Default for ReplicationManagerBuilder {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            third_party: None,
            primary: Some(NodeId::new(DEFAULT_PRIMARY_NODE)),
            node_timeout: None,
        }
    }
}

impl ReplicationManagerBuilder {
    /// Append a node; writes visit nodes in the order they are added
    #[must_use]
    pub fn node(mut self, node: Arc<dyn StorageNode>) -> Self {
        self.nodes.push(node);
        self
    }

    #[must_use]
    pub fn third_party(mut self, source: Arc<dyn ThirdPartySource>) -> Self {
        self.third_party = Some(source);
        self
    }

    /// Designate the node read first (`None` disables primary reads)
    #[must_use]
    pub fn primary(mut self, id: Option<NodeId>) -> Self {
        self.primary = id;
        self
    }

    /// Deadline applied to each node call and to the fallback fetch
    #[must_use]
    pub const fn node_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.node_timeout = timeout;
        self
    }

    /// Validate node ids and build the manager
    ///
    /// A primary id that names no configured node is accepted; reads then go
    /// straight to the fallback origin.
    pub fn build(self) -> Result<ReplicationManager> {
        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id().clone()) {
                return Err(Error::configuration(format!(
                    "duplicate storage node id: {}",
                    node.id()
                )));
            }
        }

        if let Some(primary) = &self.primary
            && !self.nodes.is_empty()
            && !seen.contains(primary)
        {
            warn!(
                "Primary node {} is not configured, reads will use the third party source",
                primary
            );
        }

        Ok(ReplicationManager {
            nodes: self.nodes,
            third_party: self.third_party,
            primary: self.primary,
            node_timeout: self.node_timeout.filter(|t| !t.is_zero()),
        })
    }
}

/// Coordinates writes and reads across the configured storage nodes
pub struct ReplicationManager {
    nodes: Vec<Arc<dyn StorageNode>>,
    third_party: Option<Arc<dyn ThirdPartySource>>,
    primary: Option<NodeId>,
    node_timeout: Option<Duration>,
}

impl ReplicationManager {
    #[must_use]
    pub fn builder() -> ReplicationManagerBuilder {
        ReplicationManagerBuilder::default()
    }

    /// Configured node ids in write order
    #[must_use]
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|n| n.id().clone()).collect()
    }

    #[must_use]
    pub fn nodes(&self) -> &[Arc<dyn StorageNode>] {
        &self.nodes
    }

    /// Look up a node by id
    #[must_use]
    pub fn node(&self, id: &NodeId) -> Option<&Arc<dyn StorageNode>> {
        self.nodes.iter().find(|n| n.id() == id)
    }

    /// The configured primary node, if it is part of the node list
    #[must_use]
    pub fn primary(&self) -> Option<&Arc<dyn StorageNode>> {
        self.primary.as_ref().and_then(|id| self.node(id))
    }

    /// Name of the fallback origin, if one is configured
    #[must_use]
    pub fn third_party_name(&self) -> Option<&str> {
        self.third_party.as_deref().map(|source| source.name())
    }

    async fn with_deadline<T>(&self, fut: impl Future<Output = Result<T>> + Send) -> Result<T> {
        match self.node_timeout {
            Some(deadline) => tokio::time::timeout(deadline, fut)
                .await
                .map_err(|_| Error::Timeout)?,
            None => fut.await,
        }
    }

    /// Write `object` to every node, in order
    ///
    /// Fails only when no node stored the object.
    pub async fn write_to_all_nodes(&self, object: &BlobObject) -> Result<WriteReport> {
        let mut report = WriteReport {
            total: self.nodes.len(),
            ..WriteReport::default()
        };
        let mut last_error = None;

        for (step, node) in self.nodes.iter().enumerate() {
            match self.with_deadline(node.write(object)).await {
                Ok(()) => {
                    debug!(
                        "Step {}: wrote {} to node {}",
                        step + 1,
                        object.key(),
                        node.id()
                    );
                    report.successes += 1;
                    report.written.push(node.id().clone());
                }
                Err(e) => {
                    warn!("Failed to write {} to node {}: {}", object.key(), node.id(), e);
                    report.failures.push((node.id().clone(), e.to_string()));
                    last_error = Some(e);
                }
            }
        }

        if report.successes == 0 {
            let last = last_error.unwrap_or(Error::NoNodesConfigured);
            error!(
                "Failed to write {} to any of {} storage nodes",
                object.key(),
                report.total
            );
            return Err(Error::AllNodesFailed {
                total: report.total,
                last: Box::new(last),
            });
        }

        if report.is_degraded() {
            warn!(
                "Degraded replication for {}: only {} of {} nodes wrote successfully",
                object.key(),
                report.successes,
                report.total
            );
        } else {
            info!(
                "Replicated {} to all {} nodes",
                object.key(),
                report.total
            );
        }

        Ok(report)
    }

    /// Read from the primary node, falling back to the third-party source
    ///
    /// Self-heal after a third-party hit is left to the caller.
    pub async fn read_primary_then_fallback(&self, key: &str) -> Result<FallbackRead> {
        if let Some(primary) = self.primary() {
            match self.with_deadline(primary.read(key)).await {
                Ok(object) => {
                    debug!("Read {} from primary node {}", key, primary.id());
                    return Ok(FallbackRead {
                        object,
                        source: ReadSource::Primary,
                    });
                }
                Err(e) => {
                    warn!("Failed to read {} from primary node {}: {}", key, primary.id(), e);
                }
            }
        }

        let Some(source) = &self.third_party else {
            return Err(Error::NoSourceAvailable {
                key: key.to_string(),
            });
        };

        info!("Fetching {} from third party source {}", key, source.name());
        let object = self
            .with_deadline(source.fetch(key))
            .await
            .map_err(|e| Error::ThirdPartyFetch {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        Ok(FallbackRead {
            object,
            source: ReadSource::ThirdParty,
        })
    }

    /// Read from the first node that has `key`; no fallback origin
    pub async fn read_from_any_node(&self, key: &str) -> Result<BlobObject> {
        for node in &self.nodes {
            match self.with_deadline(node.read(key)).await {
                Ok(object) => return Ok(object),
                Err(e) => debug!("Failed to read {} from node {}: {}", key, node.id(), e),
            }
        }
        Err(Error::AllNodesMiss {
            key: key.to_string(),
        })
    }

    /// Read `key` from every node concurrently, each call under the node deadline
    ///
    /// Results are in node order; no fallback origin is consulted.
    pub async fn read_each_node(&self, key: &str) -> Vec<(NodeId, Result<BlobObject>)> {
        futures::future::join_all(self.nodes.iter().map(|node| async move {
            (node.id().clone(), self.with_deadline(node.read(key)).await)
        }))
        .await
    }

    /// Best-effort delete of `key` from every node
    ///
    /// A node reporting the key as absent counts as a success.
    pub async fn delete_from_all_nodes(&self, key: &str) -> FanOutReport {
        let mut report = FanOutReport {
            attempted: self.nodes.len(),
            ..FanOutReport::default()
        };

        for node in &self.nodes {
            match self.with_deadline(node.delete(key)).await {
                Ok(()) => report.succeeded += 1,
                Err(e) if e.is_not_found() => report.succeeded += 1,
                Err(e) => {
                    warn!("Failed to delete {} from node {}: {}", key, node.id(), e);
                    report.last_error = Some(e.to_string());
                }
            }
        }

        report
    }
}

impl std::fmt::Debug for ReplicationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicationManager")
            .field("nodes", &self.node_ids())
            .field("primary", &self.primary)
            .field("third_party", &self.third_party_name())
            .field("node_timeout", &self.node_timeout)
            .finish()
    }
}
