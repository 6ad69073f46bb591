use thiserror::Error;

#[derive(Debug, Error)]
pub enum WvcError {
    #[error("storage error: {0}")]
    Storage(#[from] rocksdb::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] Box<bincode::ErrorKind>),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} already exists: {name}")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("name '{0}' is reserved")]
    ReservedName(String),

    #[error("invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("invalid url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid ref '{reference}': {reason}")]
    InvalidRef { reference: String, reason: String },

    #[error("ambiguous ref '{0}' matches multiple commits")]
    AmbiguousRef(String),

    #[error("uncommitted changes present; commit, stash, or use force")]
    DirtyWorkingSet,

    #[error("HEAD is detached: {0}")]
    DetachedHead(String),

    #[error("nothing to commit")]
    NoChanges,

    #[error("{0}")]
    Diverged(String),

    #[error("remote branch update rejected: expected tip changed")]
    CasConflict,

    #[error("vector {hash}: downloaded bytes hash to {actual}")]
    HashMismatch { hash: String, actual: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("remote error: {0}")]
    Remote(String),

    #[error("merge produced {0} conflicting objects")]
    MergeConflicts(usize),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, WvcError>;

impl WvcError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        WvcError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn already_exists(kind: &'static str, name: impl Into<String>) -> Self {
        WvcError::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    pub fn invalid_ref(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        WvcError::InvalidRef {
            reference: reference.into(),
            reason: reason.into(),
        }
    }
}
