//! Redb table definitions for persistent metadata storage.

use redb::TableDefinition;

// Key: object key ("bucket/path"), Value: bincode-encoded ObjectRecord
pub const OBJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("objects");
