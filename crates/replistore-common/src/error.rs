//! Error types for Replistore
//!
//! Per-node failures during a fan-out are values of this same type; they are
//! collected and logged by the caller, and only the aggregate variants
//! (`AllNodesFailed`, `AllNodesMiss`, `AllDeletesFailed`) surface to clients.

use crate::types::ObjectKeyError;
use thiserror::Error;

/// Common result type for Replistore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for Replistore
#[derive(Debug, Error)]
pub enum Error {
    // Storage node errors
    #[error("integrity check failed for {key}: expected {expected}, got {actual}")]
    Integrity {
        key: String,
        expected: String,
        actual: String,
    },

    #[error("object not found: {key}")]
    NotFound { key: String },

    #[error("invalid object key: {0}")]
    InvalidKey(#[from] ObjectKeyError),

    #[error("invalid content hash: {0}")]
    InvalidHash(String),

    #[error("disk I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Replication errors
    #[error("no storage nodes configured")]
    NoNodesConfigured,

    #[error("failed to write to any of {total} storage nodes, last error: {last}")]
    AllNodesFailed { total: usize, last: Box<Error> },

    #[error("failed to read {key} from any storage node")]
    AllNodesMiss { key: String },

    #[error("failed to delete {key} from all {attempted} storage nodes, last error: {last}")]
    AllDeletesFailed {
        key: String,
        attempted: usize,
        last: String,
    },

    #[error("failed to get {key} from third party service: {reason}")]
    ThirdPartyFetch { key: String, reason: String },

    #[error("failed to read {key} from primary node and no third party service configured")]
    NoSourceAvailable { key: String },

    // Queue errors
    #[error("queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("queue manager is not running")]
    NotRunning,

    #[error("already running")]
    AlreadyRunning,

    // Metadata errors
    #[error("metadata not found for key: {0}")]
    MetadataNotFound(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("metadata store error: {0}")]
    MetaStore(String),

    // Network/timeout errors
    #[error("request timeout")]
    Timeout,

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    // Internal errors
    #[error("internal error: {0}")]
    Internal(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a not found error for an object key
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Check if this is a retryable error
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ConnectionFailed(_) | Self::QueueFull { .. }
        )
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::AllNodesMiss { .. } | Self::MetadataNotFound(_)
        )
    }

    /// Get HTTP status code for S3 API compatibility
    #[must_use]
    pub fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::InvalidKey(_)
            | Self::InvalidHash(_)
            | Self::InvalidArgument(_)
            | Self::InvalidMetadata(_)
            | Self::Integrity { .. } => 400,

            // 404 Not Found
            Self::NotFound { .. } | Self::AllNodesMiss { .. } | Self::MetadataNotFound(_) => 404,

            // 502 Bad Gateway
            Self::ThirdPartyFetch { .. } => 502,

            // 503 Service Unavailable
            Self::QueueFull { .. }
            | Self::NotRunning
            | Self::Timeout
            | Self::ConnectionFailed(_)
            | Self::NoNodesConfigured => 503,

            // 500 Internal Server Error
            Self::Io(_)
            | Self::AllNodesFailed { .. }
            | Self::AllDeletesFailed { .. }
            | Self::NoSourceAvailable { .. }
            | Self::AlreadyRunning
            | Self::MetaStore(_)
            | Self::Internal(_)
            | Self::Configuration(_)
            | Self::Serialization(_) => 500,
        }
    }

    /// Get S3 error code for API compatibility
    #[must_use]
    pub fn s3_error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } | Self::AllNodesMiss { .. } | Self::MetadataNotFound(_) => {
                "NoSuchKey"
            }
            Self::Integrity { .. } => "BadDigest",
            Self::InvalidHash(_) => "InvalidDigest",
            Self::InvalidKey(_) | Self::InvalidArgument(_) | Self::InvalidMetadata(_) => {
                "InvalidArgument"
            }
            Self::QueueFull { .. }
            | Self::NotRunning
            | Self::Timeout
            | Self::ConnectionFailed(_)
            | Self::NoNodesConfigured => "ServiceUnavailable",
            _ => "InternalError",
        }
    }
}
