//! Storage node capability and the directory-backed implementation
//!
//! A file node maps an object key onto a relative path under its base
//! directory, keeping the `bucket/path/to/object` hierarchy on disk. Each
//! payload file has a JSON sidecar (`<file>.meta`) holding the content type
//! and identity of the object.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use replistore_common::types::ObjectKeyError;
use replistore_common::{BlobObject, ContentHash, Error, NodeId, ObjectId, ObjectKey, Result};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Suffix of the per-object sidecar file
pub const SIDECAR_SUFFIX: &str = ".meta";

/// A single backend that stores, retrieves and deletes blobs by key
#[async_trait]
pub trait StorageNode: Send + Sync {
    /// Node identifier
    fn id(&self) -> &NodeId;

    /// Durably store `object`, verifying the declared content hash
    async fn write(&self, object: &BlobObject) -> Result<()>;

    /// Retrieve the object stored under `key`
    async fn read(&self, key: &str) -> Result<BlobObject>;

    /// Remove the object stored under `key`; absent keys are not an error
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Sidecar contents persisted next to each payload file
#[derive(Debug, Serialize, Deserialize)]
struct Sidecar {
    id: ObjectId,
    content_type: String,
    content_hash: ContentHash,
    created_at: DateTime<Utc>,
}

/// Directory-backed storage node
#[derive(Debug)]
pub struct FileStorageNode {
    id: NodeId,
    base_path: PathBuf,
}

impl FileStorageNode {
    /// Create a node rooted at `base_path` without touching the filesystem
    pub fn new(id: impl Into<NodeId>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            base_path: base_path.into(),
        }
    }

    /// Create a node and make sure its base directory exists
    pub async fn open(id: impl Into<NodeId>, base_path: impl Into<PathBuf>) -> Result<Self> {
        let node = Self::new(id, base_path);
        tokio::fs::create_dir_all(&node.base_path).await?;
        Ok(node)
    }

    /// Base directory of this node
    #[must_use]
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve the on-disk path for `key`
    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let key = ObjectKey::new(key)?;
        // A key ending in the sidecar suffix would shadow another key's sidecar
        if let Some(last) = key.as_str().rsplit('/').next()
            && last.ends_with(SIDECAR_SUFFIX)
        {
            return Err(ObjectKeyError::InvalidSegment(last.to_string()).into());
        }
        Ok(self.base_path.join(key.as_str()))
    }

    fn sidecar_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(SIDECAR_SUFFIX);
        PathBuf::from(name)
    }

    fn temp_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(format!(".tmp-{}", uuid::Uuid::new_v4().simple()));
        PathBuf::from(name)
    }

    async fn load_sidecar(path: &Path) -> Option<Sidecar> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Failed to read sidecar {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(sidecar) => Some(sidecar),
            Err(e) => {
                warn!("Ignoring corrupt sidecar {}: {}", path.display(), e);
                None
            }
        }
    }

    async fn remove_if_exists(path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write `data` to a fresh temp file next to `path`
    ///
    /// The temp file is removed again if the write fails part way.
    async fn stage(path: &Path, data: &[u8]) -> Result<PathBuf> {
        let tmp = Self::temp_path(path);
        if let Err(e) = tokio::fs::write(&tmp, data).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(tmp)
    }

    async fn discard(paths: &[&Path]) {
        for path in paths {
            let _ = tokio::fs::remove_file(path).await;
        }
    }
}

#[async_trait]
impl StorageNode for FileStorageNode {
    fn id(&self) -> &NodeId {
        &self.id
    }

    async fn write(&self, object: &BlobObject) -> Result<()> {
        let path = self.object_path(object.key())?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let tmp = Self::stage(&path, object.payload()).await?;

        // Verify what actually landed on disk before making it visible
        let stored = match tokio::fs::read(&tmp).await {
            Ok(stored) => stored,
            Err(e) => {
                Self::discard(&[&tmp]).await;
                return Err(e.into());
            }
        };
        let actual = ContentHash::compute(&stored);
        if actual != object.content_hash() {
            Self::discard(&[&tmp]).await;
            return Err(Error::Integrity {
                key: object.key().to_string(),
                expected: object.content_hash().to_hex(),
                actual: actual.to_hex(),
            });
        }

        let sidecar = Sidecar {
            id: object.id(),
            content_type: object.content_type().to_string(),
            content_hash: actual,
            created_at: object.created_at(),
        };
        let sidecar_bytes = match serde_json::to_vec(&sidecar) {
            Ok(bytes) => bytes,
            Err(e) => {
                Self::discard(&[&tmp]).await;
                return Err(Error::Serialization(e.to_string()));
            }
        };
        let sidecar_path = Self::sidecar_path(&path);
        let sidecar_tmp = match Self::stage(&sidecar_path, &sidecar_bytes).await {
            Ok(staged) => staged,
            Err(e) => {
                Self::discard(&[&tmp]).await;
                return Err(e);
            }
        };

        // Payload first: a failure here leaves the previous payload and
        // sidecar pair untouched
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            Self::discard(&[&tmp, &sidecar_tmp]).await;
            return Err(e.into());
        }
        // The new payload is in place but its sidecar is not; drop both so the
        // node reports a miss instead of mislabelled bytes
        if let Err(e) = tokio::fs::rename(&sidecar_tmp, &sidecar_path).await {
            Self::discard(&[&sidecar_tmp, &path, &sidecar_path]).await;
            return Err(e.into());
        }

        debug!(
            "Node {} stored {} ({} bytes)",
            self.id,
            object.key(),
            object.size()
        );
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<BlobObject> {
        let path = self.object_path(key)?;

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(Error::not_found(key)),
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(Error::not_found(key)),
            Err(e) => return Err(e.into()),
        }

        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(Error::not_found(key)),
            Err(e) => return Err(e.into()),
        };

        let hash = ContentHash::compute(&data);
        let object = match Self::load_sidecar(&Self::sidecar_path(&path)).await {
            Some(sidecar) => {
                BlobObject::with_declared_hash(key, sidecar.content_type, data, hash)
                    .with_id(sidecar.id)
                    .with_created_at(sidecar.created_at)
            }
            None => BlobObject::with_declared_hash(key, String::new(), data, hash),
        };
        Ok(object)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key)?;
        Self::remove_if_exists(&path).await?;
        Self::remove_if_exists(&Self::sidecar_path(&path)).await?;
        debug!("Node {} deleted {}", self.id, key);
        Ok(())
    }
}
