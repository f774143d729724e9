//! Configuration types for Replistore
//!
//! Every section has defaults, so a missing config file or a file that only
//! sets a few keys both produce a runnable three-node layout.

use crate::error::{Error, Result};
use crate::types::DEFAULT_PRIMARY_NODE;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Root configuration for Replistore
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Storage node configuration
    pub storage: StorageConfig,
    /// Fallback origin configuration
    pub third_party: ThirdPartyConfig,
    /// Metadata index configuration
    pub metadata: MetadataConfig,
    /// Task queue configuration
    pub queue: QueueConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Parse a TOML document
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::configuration(e.to_string()))
    }

    /// Load configuration from a TOML file, falling back to defaults when the
    /// file does not exist
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Check cross-field invariants
    pub fn validate(&self) -> Result<()> {
        if self.storage.nodes.is_empty() {
            return Err(Error::configuration("at least one storage node is required"));
        }

        let mut seen = HashSet::new();
        for node in &self.storage.nodes {
            if node.id.trim().is_empty() {
                return Err(Error::configuration("storage node id cannot be empty"));
            }
            if !seen.insert(node.id.as_str()) {
                return Err(Error::configuration(format!(
                    "duplicate storage node id: {}",
                    node.id
                )));
            }
        }

        if let Some(primary) = &self.storage.primary
            && !seen.contains(primary.as_str())
        {
            return Err(Error::configuration(format!(
                "primary node {primary} is not a configured storage node"
            )));
        }

        if self.queue.capacity == 0 {
            return Err(Error::configuration("queue capacity must be at least 1"));
        }
        if self.queue.workers == 0 {
            return Err(Error::configuration("at least one queue worker is required"));
        }

        if self.third_party.kind == ThirdPartyKind::Http && self.third_party.endpoint.is_empty() {
            return Err(Error::configuration(
                "third_party.endpoint is required for the http source",
            ));
        }

        Ok(())
    }
}

/// HTTP server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address
    pub listen: String,
    /// Maximum accepted object size in bytes
    pub max_object_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            max_object_size: 100 * 1024 * 1024, // 100 MB
        }
    }
}

/// Storage node configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root data directory
    pub data_dir: PathBuf,
    /// Node read first on GET; `None` sends every read straight to the
    /// third-party source
    pub primary: Option<String>,
    /// Deadline for a single node call in milliseconds (0 = no deadline)
    pub node_timeout_ms: u64,
    /// Ordered storage nodes; writes visit them in this order
    pub nodes: Vec<NodeConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            primary: Some(DEFAULT_PRIMARY_NODE.to_string()),
            node_timeout_ms: 0,
            nodes: vec![
                NodeConfig::new("stg1", "./data/stg1"),
                NodeConfig::new("stg2", "./data/stg2"),
                NodeConfig::new("stg3", "./data/stg3"),
            ],
        }
    }
}

/// Configuration for a single file-backed storage node
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node identifier
    pub id: String,
    /// Base directory
    pub path: PathBuf,
}

impl NodeConfig {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
        }
    }
}

/// Which fallback origin to use
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThirdPartyKind {
    /// Synthesizes payloads locally
    #[default]
    Mock,
    /// Fetches `GET <endpoint>/<key>`
    Http,
    /// No fallback origin
    None,
}

/// Fallback origin configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ThirdPartyConfig {
    pub kind: ThirdPartyKind,
    /// Display name used in logs
    pub name: String,
    /// Base URL
    pub endpoint: String,
    /// Simulated latency for the mock source (milliseconds)
    pub latency_ms: u64,
}

impl Default for ThirdPartyConfig {
    fn default() -> Self {
        Self {
            kind: ThirdPartyKind::Mock,
            name: "mock-third-party".to_string(),
            endpoint: "http://mock-third-party.example.com/api".to_string(),
            latency_ms: 200,
        }
    }
}

/// Metadata index configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataConfig {
    /// Path to the redb database file
    pub path: PathBuf,
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/metadata.redb"),
        }
    }
}

/// Task queue configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of queued tasks
    pub capacity: usize,
    /// Number of workers draining the queue
    pub workers: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            workers: 2,
        }
    }
}

/// Log output format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by `RUST_LOG`)
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}
