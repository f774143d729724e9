//! Persistent metadata store backed by redb.
//!
//! One table maps each object key to its bincode-encoded `ObjectRecord`. All
//! writes are synchronous (write txn + commit). Listing, search and stats scan
//! the table; the index is sized for a single gateway's object count.

use crate::index::{MetadataIndex, MetadataStats, matches_pattern, sort_newest_first, touch};
use crate::tables;
use chrono::Utc;
use redb::{Database, ReadableTable};
use replistore_common::{Error, NodeId, ObjectRecord, Result};
use std::path::Path;
use tracing::{debug, error, info};

/// Error type for metadata store operations
#[derive(Debug, thiserror::Error)]
pub enum MetaStoreError {
    #[error("redb error: {0}")]
    Redb(#[from] redb::DatabaseError),
    #[error("redb storage error: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("redb table error: {0}")]
    Table(#[from] redb::TableError),
    #[error("redb transaction error: {0}")]
    Transaction(Box<redb::TransactionError>),
    #[error("redb commit error: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<redb::TransactionError> for MetaStoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Transaction(Box::new(e))
    }
}

impl From<MetaStoreError> for Error {
    fn from(e: MetaStoreError) -> Self {
        Self::MetaStore(e.to_string())
    }
}

pub type MetaStoreResult<T> = std::result::Result<T, MetaStoreError>;

/// Persistent metadata store backed by redb.
pub struct MetaStore {
    db: Database,
}

impl MetaStore {
    /// Open (or create) the redb database at the given path.
    pub fn open(path: impl AsRef<Path>) -> MetaStoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path)?;

        // Create the table eagerly so later read txns don't fail
        let write_txn = db.begin_write()?;
        {
            let _t = write_txn.open_table(tables::OBJECTS)?;
        }
        write_txn.commit()?;

        info!("Opened metadata store at {}", path.display());
        Ok(Self { db })
    }

    fn put_record(&self, record: &ObjectRecord) -> MetaStoreResult<()> {
        let bytes = bincode::serialize(record)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(tables::OBJECTS)?;
            table.insert(record.key.as_str(), bytes.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn get_record(&self, key: &str) -> MetaStoreResult<Option<ObjectRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::OBJECTS)?;
        match table.get(key)? {
            Some(val) => Ok(Some(bincode::deserialize(val.value())?)),
            None => Ok(None),
        }
    }

    fn remove_record(&self, key: &str) -> MetaStoreResult<bool> {
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(tables::OBJECTS)?;
            table.remove(key)?.is_some()
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Decode every record, skipping (and logging) undecodable rows
    fn load_records(&self) -> MetaStoreResult<Vec<ObjectRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(tables::OBJECTS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let entry = entry?;
            match bincode::deserialize::<ObjectRecord>(entry.1.value()) {
                Ok(record) => result.push(record),
                Err(e) => error!("Failed to decode record '{}': {}", entry.0.value(), e),
            }
        }
        Ok(result)
    }

    /// Read-modify-write of a single record inside one write transaction
    fn modify(&self, key: &str, f: impl FnOnce(&mut ObjectRecord)) -> Result<ObjectRecord> {
        let run = || -> MetaStoreResult<Option<ObjectRecord>> {
            let write_txn = self.db.begin_write()?;
            let updated = {
                let mut table = write_txn.open_table(tables::OBJECTS)?;
                let current = match table.get(key)? {
                    Some(val) => bincode::deserialize::<ObjectRecord>(val.value())?,
                    None => return Ok(None),
                };
                let mut record = current;
                f(&mut record);
                touch(&mut record, Utc::now());
                let bytes = bincode::serialize(&record)?;
                table.insert(key, bytes.as_slice())?;
                record
            };
            write_txn.commit()?;
            Ok(Some(updated))
        };
        run()?.ok_or_else(|| Error::MetadataNotFound(key.to_string()))
    }
}

impl MetadataIndex for MetaStore {
    fn save(&self, record: &ObjectRecord) -> Result<()> {
        self.put_record(record)?;
        debug!(
            "Saved metadata for {} on [{}]",
            record.key,
            record
                .storage_nodes
                .iter()
                .map(NodeId::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<ObjectRecord> {
        self.get_record(key)?
            .ok_or_else(|| Error::MetadataNotFound(key.to_string()))
    }

    fn delete(&self, key: &str) -> Result<()> {
        if self.remove_record(key)? {
            debug!("Deleted metadata for {}", key);
            Ok(())
        } else {
            Err(Error::MetadataNotFound(key.to_string()))
        }
    }

    fn update_nodes(&self, key: &str, nodes: Vec<NodeId>) -> Result<ObjectRecord> {
        self.modify(key, |record| record.storage_nodes = nodes)
    }

    fn update_content_type(&self, key: &str, content_type: &str) -> Result<ObjectRecord> {
        self.modify(key, |record| record.content_type = content_type.to_string())
    }

    fn list(&self, limit: usize, offset: usize) -> Result<Vec<ObjectRecord>> {
        let mut records = self.load_records()?;
        sort_newest_first(&mut records);
        Ok(records.into_iter().skip(offset).take(limit).collect())
    }

    fn list_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<ObjectRecord>> {
        let run = || -> MetaStoreResult<Vec<ObjectRecord>> {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(tables::OBJECTS)?;
            let mut result = Vec::new();
            for entry in table.range(prefix..)? {
                let entry = entry?;
                let key = entry.0.value();
                if !key.starts_with(prefix) || result.len() >= limit {
                    break;
                }
                match bincode::deserialize::<ObjectRecord>(entry.1.value()) {
                    Ok(record) => result.push(record),
                    Err(e) => error!("Failed to decode record '{}': {}", key, e),
                }
            }
            Ok(result)
        };
        Ok(run()?)
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<ObjectRecord>> {
        let needle = query.to_lowercase();
        let mut records: Vec<ObjectRecord> = self
            .load_records()?
            .into_iter()
            .filter(|r| {
                r.key.to_lowercase().contains(&needle)
                    || r.content_type.to_lowercase().contains(&needle)
            })
            .collect();
        sort_newest_first(&mut records);
        records.truncate(limit);
        Ok(records)
    }

    fn find_by_pattern(&self, pattern: &str) -> Result<Vec<ObjectRecord>> {
        let mut records: Vec<ObjectRecord> = self
            .load_records()?
            .into_iter()
            .filter(|r| matches_pattern(&r.key, pattern))
            .collect();
        sort_newest_first(&mut records);
        Ok(records)
    }

    fn stats(&self) -> Result<MetadataStats> {
        let mut stats = MetadataStats::default();
        for record in self.load_records()? {
            stats.total_objects += 1;
            stats.total_size += record.size;
            *stats.content_types.entry(record.content_type).or_default() += 1;
        }
        if stats.total_objects > 0 {
            stats.average_size = stats.total_size / stats.total_objects;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use replistore_common::BlobObject;
    use tempfile::TempDir;

    fn open() -> (TempDir, MetaStore) {
        let dir = TempDir::new().unwrap();
        let store = MetaStore::open(dir.path().join("meta/metadata.redb")).unwrap();
        (dir, store)
    }

    fn record(key: &str, content_type: &str, data: &[u8], age_secs: i64) -> ObjectRecord {
        let created = Utc::now() - Duration::seconds(age_secs);
        let obj = BlobObject::new(key, content_type, data.to_vec()).with_created_at(created);
        ObjectRecord::for_object(&obj, vec!["stg1".into(), "stg2".into()])
    }

    #[test]
    fn test_save_get_delete() {
        let (_dir, store) = open();
        let rec = record("b/obj1", "text/plain", b"hello", 0);
        store.save(&rec).unwrap();

        let back = store.get("b/obj1").unwrap();
        assert_eq!(back, rec);

        store.delete("b/obj1").unwrap();
        assert!(matches!(
            store.get("b/obj1"),
            Err(Error::MetadataNotFound(_))
        ));
        assert!(matches!(
            store.delete("b/obj1"),
            Err(Error::MetadataNotFound(_))
        ));
    }

    #[test]
    fn test_save_is_upsert() {
        let (_dir, store) = open();
        store.save(&record("b/k", "text/plain", b"v1", 0)).unwrap();
        let newer = record("b/k", "text/plain", b"version two", 0);
        store.save(&newer).unwrap();
        assert_eq!(store.get("b/k").unwrap().size, 11);
        assert_eq!(store.stats().unwrap().total_objects, 1);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metadata.redb");
        {
            let store = MetaStore::open(&path).unwrap();
            store.save(&record("b/k", "", b"x", 0)).unwrap();
        }
        let store = MetaStore::open(&path).unwrap();
        assert_eq!(store.get("b/k").unwrap().key, "b/k");
    }

    #[test]
    fn test_update_nodes() {
        let (_dir, store) = open();
        let rec = record("b/k", "", b"x", 10);
        store.save(&rec).unwrap();

        let updated = store.update_nodes("b/k", vec!["stg3".into()]).unwrap();
        assert_eq!(updated.storage_nodes, vec![NodeId::new("stg3")]);
        assert!(updated.updated_at >= rec.updated_at);
        assert_eq!(store.get("b/k").unwrap().storage_nodes, updated.storage_nodes);

        let updated = store.update_content_type("b/k", "image/png").unwrap();
        assert_eq!(updated.content_type, "image/png");

        assert!(matches!(
            store.update_nodes("b/missing", vec![]),
            Err(Error::MetadataNotFound(_))
        ));
    }

    #[test]
    fn test_list_newest_first_with_paging() {
        let (_dir, store) = open();
        store.save(&record("b/old", "", b"x", 30)).unwrap();
        store.save(&record("b/mid", "", b"x", 20)).unwrap();
        store.save(&record("b/new", "", b"x", 10)).unwrap();

        let keys = |records: Vec<ObjectRecord>| {
            records.into_iter().map(|r| r.key).collect::<Vec<_>>()
        };
        assert_eq!(keys(store.list(10, 0).unwrap()), ["b/new", "b/mid", "b/old"]);
        assert_eq!(keys(store.list(1, 1).unwrap()), ["b/mid"]);
        assert!(store.list(10, 5).unwrap().is_empty());
    }

    #[test]
    fn test_list_prefix() {
        let (_dir, store) = open();
        for key in ["a/1", "b/1", "b/2", "bb/1"] {
            store.save(&record(key, "", b"x", 0)).unwrap();
        }
        let keys: Vec<_> = store
            .list_prefix("b/", 10)
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, ["b/1", "b/2"]);
        assert_eq!(store.list_prefix("b/", 1).unwrap().len(), 1);
    }

    #[test]
    fn test_search_and_pattern() {
        let (_dir, store) = open();
        store.save(&record("photos/Cat.JPG", "image/jpeg", b"x", 0)).unwrap();
        store.save(&record("docs/readme.txt", "text/plain", b"x", 0)).unwrap();

        assert_eq!(store.search("cat", 10).unwrap().len(), 1);
        assert_eq!(store.search("TEXT/", 10).unwrap().len(), 1);
        assert_eq!(store.search("", 1).unwrap().len(), 1);

        assert_eq!(store.find_by_pattern("docs/*").unwrap().len(), 1);
        assert_eq!(store.find_by_pattern("*.txt").unwrap().len(), 1);
        assert_eq!(store.find_by_pattern("*").unwrap().len(), 2);
    }

    #[test]
    fn test_stats() {
        let (_dir, store) = open();
        assert_eq!(store.stats().unwrap(), MetadataStats::default());

        store.save(&record("b/1", "text/plain", b"aaaa", 0)).unwrap();
        store.save(&record("b/2", "text/plain", b"aa", 0)).unwrap();
        store.save(&record("b/3", "image/png", b"", 0)).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_objects, 3);
        assert_eq!(stats.total_size, 6);
        assert_eq!(stats.average_size, 2);
        assert_eq!(stats.content_types["text/plain"], 2);
        assert_eq!(stats.content_types["image/png"], 1);
    }

    #[test]
    fn test_export_import() {
        let (_dir, source) = open();
        source.save(&record("b/1", "text/plain", b"one", 0)).unwrap();
        source.save(&record("b/2", "text/plain", b"two", 0)).unwrap();

        let all = source.export_json(&[]).unwrap();
        let only_one = source
            .export_json(&["b/1".to_string(), "b/unknown".to_string()])
            .unwrap();
        let parsed: Vec<ObjectRecord> = serde_json::from_slice(&only_one).unwrap();
        assert_eq!(parsed.len(), 1);

        let (_dir2, target) = open();
        assert_eq!(target.import_json(&all).unwrap(), 2);
        assert_eq!(target.get("b/2").unwrap(), source.get("b/2").unwrap());
    }

    #[test]
    fn test_import_skips_invalid_entries() {
        let (_dir, store) = open();
        let good = record("b/good", "", b"x", 0);
        let mut no_nodes = record("b/no-nodes", "", b"x", 0);
        no_nodes.storage_nodes.clear();

        let mut entries = vec![
            serde_json::to_value(&good).unwrap(),
            serde_json::to_value(&no_nodes).unwrap(),
        ];
        let mut bad_hash = serde_json::to_value(&good).unwrap();
        bad_hash["content_hash"] = "not-a-hash".into();
        entries.push(bad_hash);

        let data = serde_json::to_vec(&entries).unwrap();
        assert_eq!(store.import_json(&data).unwrap(), 1);
        assert!(store.get("b/no-nodes").is_err());
    }
}
