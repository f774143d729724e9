//! Deferred work items

use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Selects the handler that processes a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Post-write hook
    #[display("upload_completed")]
    UploadCompleted,
    /// Expired or temporary data reclamation
    #[display("cleanup")]
    Cleanup,
    /// Replica consistency audit
    #[display("replication_check")]
    ReplicationCheck,
    /// Delete the object from every storage node
    #[display("delete_from_storage")]
    DeleteFromStorage,
}

/// A unit of deferred work
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub kind: TaskKind,
    /// Object key the task concerns
    pub target_key: String,
    /// Free-form scalar attributes
    #[serde(default)]
    pub payload: HashMap<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(kind: TaskKind, target_key: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            target_key: target_key.into(),
            payload: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Task removing `key` from every storage node
    pub fn delete_from_storage(key: impl Into<String>) -> Self {
        let key = key.into();
        Self::new(TaskKind::DeleteFromStorage, key.clone()).with_field("key", key)
    }

    /// Attach a payload attribute
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(name.into(), value.into());
        self
    }

    /// String attribute from the payload
    #[must_use]
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.payload.get(name).and_then(Value::as_str)
    }

    /// Integer attribute from the payload
    #[must_use]
    pub fn field_u64(&self, name: &str) -> Option<u64> {
        self.payload.get(name).and_then(Value::as_u64)
    }
}
