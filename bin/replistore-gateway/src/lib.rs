//! Replistore Gateway - S3-style HTTP front end
//!
//! Wires the replication manager, metadata index and worker pool together
//! behind `ObjectService`, and exposes it over a small S3-compatible API.

pub mod app;
pub mod s3;
pub mod service;

pub use app::Gateway;
pub use service::{ObjectRead, ObjectService, UploadOutcome};
