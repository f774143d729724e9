//! Replistore Metadata Store - object metadata index
//!
//! This crate persists one `ObjectRecord` per object key in a redb database.
//! The gateway records which storage nodes hold each object here; the
//! replication layer itself never reads it.

pub mod index;
pub mod store;
pub mod tables;

// Re-exports
pub use index::{MetadataIndex, MetadataStats, matches_pattern, validate_record};
pub use store::{MetaStore, MetaStoreError, MetaStoreResult};
