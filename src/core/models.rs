use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, WvcError};

/// The kind of mutation an operation applies to one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    Insert,
    Update,
    Delete,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Insert => "insert",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "insert" => Ok(OperationType::Insert),
            "update" => Ok(OperationType::Update),
            "delete" => Ok(OperationType::Delete),
            other => Err(WvcError::InvalidInput(format!(
                "unknown operation type '{other}'"
            ))),
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One recorded mutation. Pending operations carry an empty `commit_id`
/// until a commit seals them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub commit_id: String,
    pub seq: u64,
    pub op_type: OperationType,
    pub class: String,
    pub object_id: String,
    /// Canonical JSON of the object after the operation; empty for deletes.
    pub object_data: String,
    /// Canonical JSON of the object before the operation; empty for inserts.
    pub previous_data: String,
    pub vector_hash: String,
    pub previous_vector_hash: String,
    pub committed: bool,
    pub reverted: bool,
    pub timestamp: DateTime<Utc>,
}

impl Operation {
    pub fn key(&self) -> String {
        operation_key(&self.commit_id, self.seq)
    }
}

pub fn operation_key(commit_id: &str, seq: u64) -> String {
    format!("{commit_id}/{seq:010}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    /// 64-hex SHA-256 over message, timestamp, parents, and the operation merkle.
    pub id: String,
    /// Empty for the root commit.
    pub parent_id: String,
    /// Set only on merge commits.
    pub merge_parent_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub operation_count: u64,
}

impl Commit {
    pub fn is_merge(&self) -> bool {
        !self.merge_parent_id.is_empty()
    }

    pub fn short_id(&self) -> &str {
        &self.id[..self.id.len().min(8)]
    }
}

/// Materialized object state at HEAD, the baseline for diffing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownObject {
    pub object_hash: String,
    pub vector_hash: String,
    /// Canonical JSON of the object, vector excluded.
    pub object_json: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedChange {
    pub class: String,
    pub object_id: String,
    pub change_type: OperationType,
    pub object_data: String,
    pub previous_data: String,
    pub vector_hash: String,
    pub previous_vector_hash: String,
    pub staged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub id: String,
    pub schema_json: String,
    pub schema_hash: String,
    /// Empty until the snapshot is bound to a commit.
    pub commit_id: String,
}

/// Raw little-endian f32 bytes of one embedding, content-addressed by SHA-256.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorBlob {
    pub bytes: Vec<u8>,
    pub dims: u32,
    pub refcount: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Remote {
    pub name: String,
    pub url: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StashChange {
    pub change: StagedChange,
    pub was_staged: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stash {
    pub id: u64,
    pub message: String,
    pub branch_name: String,
    /// HEAD at stash time.
    pub commit_id: String,
    pub created_at: DateTime<Utc>,
    pub changes: Vec<StashChange>,
}

/// Per-class incremental-scan bookkeeping, advanced only at commit time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanMeta {
    /// Highest `last_update_time_unix` folded into the last commit.
    pub watermark: i64,
    pub object_count: u64,
}

/// A live record in the backing vector database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorObject {
    pub id: String,
    pub class: String,
    pub properties: Map<String, Value>,
    pub vector: Vec<f32>,
    pub last_update_time_unix: i64,
}

impl VectorObject {
    pub fn key(&self) -> String {
        object_key(&self.class, &self.id)
    }
}

pub fn object_key(class: &str, id: &str) -> String {
    format!("{class}/{id}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySchema {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSchema {
    pub name: String,
    pub vectorizer: String,
    pub properties: Vec<PropertySchema>,
}

impl ClassSchema {
    pub fn property(&self, name: &str) -> Option<&PropertySchema> {
        self.properties.iter().find(|p| p.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub classes: Vec<ClassSchema>,
}

impl Schema {
    pub fn class(&self, name: &str) -> Option<&ClassSchema> {
        self.classes.iter().find(|c| c.name == name)
    }
}

/// Schema snapshot as it travels inside a commit bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub schema_json: String,
    pub schema_hash: String,
}

/// Wire shape for one commit with its operations. Vector bytes travel
/// through their own endpoint, addressed by the hashes the operations carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitBundle {
    pub commit: Commit,
    pub operations: Vec<Operation>,
    pub schema: Option<SchemaSnapshot>,
}
