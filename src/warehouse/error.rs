//! Errors returned by the table manager.

use thiserror::Error;

use crate::catalog::{CredentialId, InvalidTableName, ScopeId, SchemaError, SchemaInferenceError, TableId};
use crate::store::{Collection, StorageError};
use crate::types::UnknownTypeError;

/// Result type for catalog operations.
pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("a table named '{name}' already exists in scope {scope}")]
    DuplicateName { scope: ScopeId, name: String },

    #[error("table '{table}' is managed by an external source")]
    SourcedTable { table: String },

    #[error("column '{column}' does not exist on table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("cannot use type '{requested}' for column '{column}': {source}")]
    UnknownType {
        column: String,
        requested: String,
        #[source]
        source: UnknownTypeError,
    },

    #[error(transparent)]
    SchemaInference(#[from] SchemaInferenceError),

    /// The request was rejected before anything was written.
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        #[source]
        source: Option<SchemaInferenceError>,
    },

    /// Another writer committed first; reload and retry.
    #[error("conflicting write: {0}")]
    Conflict(#[source] StorageError),

    #[error("table not found: {0}")]
    NotFound(TableId),

    #[error("credential not found: {0}")]
    CredentialNotFound(CredentialId),

    #[error("storage error: {0}")]
    Storage(#[source] StorageError),
}

impl CatalogError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            source: None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<SchemaError> for CatalogError {
    fn from(err: SchemaError) -> Self {
        match err {
            SchemaError::SourcedTable { table } => Self::SourcedTable { table },
            SchemaError::UnknownColumn { table, column } => Self::UnknownColumn { table, column },
            SchemaError::UnknownType {
                column,
                requested,
                source,
            } => Self::UnknownType {
                column,
                requested,
                source,
            },
        }
    }
}

impl From<StorageError> for CatalogError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ConcurrentModification { .. } | StorageError::BranchMoved { .. } => Self::Conflict(err),
            StorageError::RecordNotFound {
                collection: Collection::Credentials,
                key,
            } => Self::CredentialNotFound(key),
            StorageError::RecordNotFound { key, .. } => Self::NotFound(key),
            other => Self::Storage(other),
        }
    }
}

impl From<InvalidTableName> for CatalogError {
    fn from(err: InvalidTableName) -> Self {
        Self::validation(err.to_string())
    }
}
