//! Core type definitions for Replistore
//!
//! This module defines the fundamental types used throughout the system
//! including identifiers, the blob object and the metadata record.

use crate::checksum::ContentHash;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Content type used when a client does not send one
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Node id that is read first by convention
pub const DEFAULT_PRIMARY_NODE: &str = "stg1";

/// Unique identifier for an object
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, From, Into)]
pub struct ObjectId(Uuid);

impl ObjectId {
    /// Generate a new random object ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Object key (`bucket/path/to/object`)
///
/// Keys map directly onto relative paths on file-backed nodes, so anything
/// that could escape a node's base directory is rejected here.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Create a new object key
    pub fn new(key: impl Into<String>) -> Result<Self, ObjectKeyError> {
        let key = key.into();
        Self::validate(&key)?;
        Ok(Self(key))
    }

    /// Build the namespaced key for an object inside a bucket
    pub fn in_bucket(bucket: &str, key: &str) -> Result<Self, ObjectKeyError> {
        Self::new(format!("{bucket}/{key}"))
    }

    /// Get the object key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate object key
    fn validate(key: &str) -> Result<(), ObjectKeyError> {
        // Maximum length: 1024 bytes (UTF-8)
        if key.len() > 1024 {
            return Err(ObjectKeyError::TooLong);
        }

        if key.is_empty() {
            return Err(ObjectKeyError::Empty);
        }

        if key.starts_with('/') || key.starts_with('\\') {
            return Err(ObjectKeyError::Absolute);
        }

        for segment in key.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." || segment.contains('\\')
            {
                return Err(ObjectKeyError::InvalidSegment(segment.to_string()));
            }
        }

        Ok(())
    }
}

impl fmt::Debug for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectKey({:?})", self.0)
    }
}

impl AsRef<str> for ObjectKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Errors that can occur when creating an object key
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObjectKeyError {
    #[error("object key cannot be empty")]
    Empty,
    #[error("object key cannot exceed 1024 bytes")]
    TooLong,
    #[error("object key cannot be an absolute path")]
    Absolute,
    #[error("object key contains invalid segment {0:?}")]
    InvalidSegment(String),
}

/// Identifier of a configured storage node (e.g. `stg1`)
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, From)]
#[serde(transparent)]
#[display("{_0}")]
pub struct NodeId(String);

impl NodeId {
    /// Create a node ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the node ID as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// An object payload plus its descriptive metadata
///
/// Immutable once constructed. `content_hash` is what the writer claims the
/// payload hashes to; storage nodes verify it against the bytes they persist.
#[derive(Clone)]
pub struct BlobObject {
    id: ObjectId,
    key: String,
    content_type: String,
    payload: Bytes,
    content_hash: ContentHash,
    created_at: DateTime<Utc>,
}

impl BlobObject {
    /// Create an object, computing the content hash from the payload
    pub fn new(
        key: impl Into<String>,
        content_type: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Self {
        let payload = payload.into();
        let content_hash = ContentHash::compute(&payload);
        Self::with_declared_hash(key, content_type, payload, content_hash)
    }

    /// Create an object with a caller-supplied hash (e.g. from `Content-MD5`)
    pub fn with_declared_hash(
        key: impl Into<String>,
        content_type: impl Into<String>,
        payload: impl Into<Bytes>,
        content_hash: ContentHash,
    ) -> Self {
        let content_type = content_type.into();
        Self {
            id: ObjectId::new(),
            key: key.into(),
            content_type: if content_type.is_empty() {
                DEFAULT_CONTENT_TYPE.to_string()
            } else {
                content_type
            },
            payload: payload.into(),
            content_hash,
            created_at: Utc::now(),
        }
    }

    /// Replace the object id
    #[must_use]
    pub const fn with_id(mut self, id: ObjectId) -> Self {
        self.id = id;
        self
    }

    /// Replace the creation timestamp
    #[must_use]
    pub const fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    #[must_use]
    pub const fn id(&self) -> ObjectId {
        self.id
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload size in bytes
    #[must_use]
    pub fn size(&self) -> u64 {
        self.payload.len() as u64
    }

    #[must_use]
    pub const fn content_hash(&self) -> ContentHash {
        self.content_hash
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl fmt::Debug for BlobObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobObject")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("size", &self.payload.len())
            .field("content_type", &self.content_type)
            .field("content_hash", &self.content_hash)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Metadata record persisted for every stored object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub id: ObjectId,
    pub key: String,
    pub size: u64,
    pub content_type: String,
    pub content_hash: ContentHash,
    /// Nodes that acknowledged the write
    pub storage_nodes: Vec<NodeId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ObjectRecord {
    /// Build the record for an object held by `storage_nodes`
    #[must_use]
    pub fn for_object(object: &BlobObject, storage_nodes: Vec<NodeId>) -> Self {
        Self {
            id: object.id(),
            key: object.key().to_string(),
            size: object.size(),
            content_type: object.content_type().to_string(),
            content_hash: object.content_hash(),
            storage_nodes,
            created_at: object.created_at(),
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_validation() {
        assert!(ObjectKey::new("b/obj1").is_ok());
        assert!(ObjectKey::new("bucket/a/b/c.txt").is_ok());
        assert_eq!(ObjectKey::new(""), Err(ObjectKeyError::Empty));
        assert_eq!(ObjectKey::new("/etc/passwd"), Err(ObjectKeyError::Absolute));
        assert_eq!(
            ObjectKey::new("b/../../x"),
            Err(ObjectKeyError::InvalidSegment("..".into()))
        );
        assert_eq!(
            ObjectKey::new("b//x"),
            Err(ObjectKeyError::InvalidSegment(String::new()))
        );
        assert_eq!(ObjectKey::new("k".repeat(1025)), Err(ObjectKeyError::TooLong));
    }

    #[test]
    fn test_object_key_in_bucket() {
        let key = ObjectKey::in_bucket("photos", "2024/cat.jpg").unwrap();
        assert_eq!(key.as_str(), "photos/2024/cat.jpg");
    }

    #[test]
    fn test_blob_object_hash_and_size() {
        let obj = BlobObject::new("b/obj1", "text/plain", &b"hello"[..]);
        assert_eq!(obj.size(), 5);
        assert_eq!(obj.content_hash(), ContentHash::compute(b"hello"));
        assert_eq!(obj.content_type(), "text/plain");
    }

    #[test]
    fn test_blob_object_default_content_type() {
        let obj = BlobObject::new("b/obj1", "", &b"x"[..]);
        assert_eq!(obj.content_type(), DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn test_record_for_object() {
        let obj = BlobObject::new("b/obj1", "text/plain", &b"hello"[..]);
        let record = ObjectRecord::for_object(&obj, vec!["stg1".into(), "stg3".into()]);
        assert_eq!(record.id, obj.id());
        assert_eq!(record.size, 5);
        assert_eq!(record.storage_nodes, vec![NodeId::new("stg1"), NodeId::new("stg3")]);
        assert!(record.updated_at >= record.created_at);
    }
}
