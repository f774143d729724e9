//! Metadata index contract

use chrono::{DateTime, Utc};
use replistore_common::{Error, NodeId, ObjectRecord, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Aggregate statistics over every stored record
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MetadataStats {
    pub total_objects: u64,
    pub total_size: u64,
    pub average_size: u64,
    /// Object count per content type
    pub content_types: BTreeMap<String, u64>,
}

/// Key → record index consulted by the gateway
pub trait MetadataIndex: Send + Sync {
    /// Insert or replace the record for `record.key`
    fn save(&self, record: &ObjectRecord) -> Result<()>;

    /// Fetch the record for `key`, or `MetadataNotFound`
    fn get(&self, key: &str) -> Result<ObjectRecord>;

    /// Remove the record for `key`, or `MetadataNotFound` if there was none
    fn delete(&self, key: &str) -> Result<()>;

    /// Replace the node list of an existing record
    fn update_nodes(&self, key: &str, nodes: Vec<NodeId>) -> Result<ObjectRecord>;

    /// Replace the content type of an existing record
    fn update_content_type(&self, key: &str, content_type: &str) -> Result<ObjectRecord>;

    /// Records ordered newest first
    fn list(&self, limit: usize, offset: usize) -> Result<Vec<ObjectRecord>>;

    /// Records whose key starts with `prefix`, in key order
    fn list_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<ObjectRecord>>;

    /// Case-insensitive substring search over key and content type
    fn search(&self, query: &str, limit: usize) -> Result<Vec<ObjectRecord>>;

    /// Records whose key matches a `*` wildcard pattern
    fn find_by_pattern(&self, pattern: &str) -> Result<Vec<ObjectRecord>>;

    fn stats(&self) -> Result<MetadataStats>;

    /// Serialize the records for `keys` (all records when empty) as JSON
    ///
    /// Keys without a record are skipped.
    fn export_json(&self, keys: &[String]) -> Result<Vec<u8>> {
        let records = if keys.is_empty() {
            self.list(usize::MAX, 0)?
        } else {
            let mut found = Vec::with_capacity(keys.len());
            for key in keys {
                match self.get(key) {
                    Ok(record) => found.push(record),
                    Err(e) if e.is_not_found() => debug!("Skipping export of unknown key {}", key),
                    Err(e) => return Err(e),
                }
            }
            found
        };
        serde_json::to_vec_pretty(&records).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Import records produced by [`MetadataIndex::export_json`]
    ///
    /// Entries that fail to parse or validate are logged and skipped. Returns
    /// the number of records saved.
    fn import_json(&self, data: &[u8]) -> Result<usize> {
        let entries: Vec<serde_json::Value> =
            serde_json::from_slice(data).map_err(|e| Error::Serialization(e.to_string()))?;
        let total = entries.len();

        let mut imported = 0;
        for entry in entries {
            let record: ObjectRecord = match serde_json::from_value(entry) {
                Ok(record) => record,
                Err(e) => {
                    warn!("Skipping malformed metadata entry: {}", e);
                    continue;
                }
            };
            if let Err(e) = validate_record(&record) {
                warn!("Skipping invalid metadata entry {}: {}", record.key, e);
                continue;
            }
            if let Err(e) = self.save(&record) {
                warn!("Failed to import metadata {}: {}", record.key, e);
                continue;
            }
            imported += 1;
        }

        info!("Imported {} of {} metadata entries", imported, total);
        Ok(imported)
    }
}

/// Check a record before it is imported or saved
pub fn validate_record(record: &ObjectRecord) -> Result<()> {
    if record.key.trim().is_empty() {
        return Err(Error::InvalidMetadata("key cannot be empty".into()));
    }
    if record.storage_nodes.is_empty() {
        return Err(Error::InvalidMetadata(format!(
            "{}: storage nodes cannot be empty",
            record.key
        )));
    }
    if record.updated_at < record.created_at {
        return Err(Error::InvalidMetadata(format!(
            "{}: updated_at precedes created_at",
            record.key
        )));
    }
    Ok(())
}

/// Match `text` against a pattern with a leading and/or trailing `*`
///
/// `*` alone matches everything; `*mid*` is a substring match, `*suffix` and
/// `prefix*` anchor one end. Any other pattern must match exactly.
#[must_use]
pub fn matches_pattern(text: &str, pattern: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match (pattern.strip_prefix('*'), pattern.strip_suffix('*')) {
        (Some(rest), Some(_)) => rest
            .strip_suffix('*')
            .is_some_and(|middle| text.contains(middle)),
        (Some(suffix), None) => text.ends_with(suffix),
        (None, Some(prefix)) => text.starts_with(prefix),
        (None, None) => text == pattern,
    }
}

/// Sort newest first, breaking ties by key
pub(crate) fn sort_newest_first(records: &mut [ObjectRecord]) {
    records.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.key.cmp(&b.key))
    });
}

/// Stamp a modification time that never precedes `created_at`
pub(crate) fn touch(record: &mut ObjectRecord, now: DateTime<Utc>) {
    record.updated_at = now.max(record.created_at);
}
