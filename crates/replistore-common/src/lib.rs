//! Replistore Common - Shared types and utilities
//!
//! This crate provides common types, error definitions, and utilities
//! used across all Replistore components.

pub mod checksum;
pub mod config;
pub mod error;
pub mod types;

pub use checksum::ContentHash;
pub use config::{Config, LogFormat, NodeConfig, ThirdPartyKind};
pub use error::{Error, Result};
pub use types::*;
