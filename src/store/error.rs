//! record store error types

use std::path::PathBuf;

use thiserror::Error;

use crate::store::types::{Collection, InvalidKeyError, RecordKey};

/// the main error type for store operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// error from the underlying git library
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("record not found: {collection}/{key}")]
    RecordNotFound { collection: Collection, key: RecordKey },

    #[error("record already exists: {collection}/{key}")]
    RecordAlreadyExists { collection: Collection, key: RecordKey },

    #[error("invalid key: {0}")]
    InvalidKey(#[from] InvalidKeyError),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// data integrity check failed
    #[error("corrupted data at {path}: {reason}")]
    CorruptedData { path: PathBuf, reason: String },

    #[error("repository not initialized: {0}")]
    NotInitialized(PathBuf),

    #[error("commit not found: {0}")]
    CommitNotFound(String),

    #[error("unexpected entry type at {path}: expected {expected}, found {found}")]
    UnexpectedEntryType {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("branch already exists: {0}")]
    BranchAlreadyExists(String),

    /// the record was rewritten since the caller read it
    #[error("concurrent modification of {collection}/{key}: expected version {expected}, found {found}")]
    ConcurrentModification {
        collection: Collection,
        key: RecordKey,
        expected: u64,
        found: u64,
    },

    /// the branch moved while a commit was being built
    #[error("branch {branch} moved during write")]
    BranchMoved { branch: String },

    /// internal error that shouldn't happen
    #[error("internal error: {0}")]
    Internal(String),
}

/// result type alias for store operations
pub type StorageResult<T> = Result<T, StorageError>;
