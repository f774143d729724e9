//! Replistore Storage - storage nodes and replication
//!
//! This crate implements the storage tier of the gateway:
//! - The `StorageNode` capability and a directory-backed node
//! - Fallback origins (`ThirdPartySource`) for keys the nodes do not hold
//! - The `ReplicationManager`, which writes to every node and reads with fallback

pub mod manager;
pub mod node;
pub mod third_party;

pub use manager::{
    FallbackRead, FanOutReport, ReadSource, ReplicationManager, ReplicationManagerBuilder,
    WriteReport,
};
pub use node::{FileStorageNode, StorageNode};
pub use third_party::{HttpThirdPartySource, MockThirdPartySource, ThirdPartySource};
