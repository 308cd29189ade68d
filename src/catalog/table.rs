//! Warehouse table and credential records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::column::ColumnCatalog;
use crate::store::{Collection, Record, RecordKey};

/// Identifier of a table record.
pub type TableId = RecordKey;

/// Identifier of a credential record.
pub type CredentialId = RecordKey;

/// The owning scope (team) of tables and credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeId(pub u64);

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// File format of the source data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableFormat {
    #[serde(rename = "CSV")]
    Csv,
    #[serde(rename = "CSVWithNames")]
    CsvWithNames,
    Parquet,
    #[serde(rename = "JSONEachRow")]
    JsonEachRow,
    Delta,
    DeltaS3Wrapper,
}

impl TableFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableFormat::Csv => "CSV",
            TableFormat::CsvWithNames => "CSVWithNames",
            TableFormat::Parquet => "Parquet",
            TableFormat::JsonEachRow => "JSONEachRow",
            TableFormat::Delta => "Delta",
            TableFormat::DeltaS3Wrapper => "DeltaS3Wrapper",
        }
    }

    /// CSV variants carry flat scalar values only.
    pub fn is_delimited_text(&self) -> bool {
        matches!(self, TableFormat::Csv | TableFormat::CsvWithNames)
    }
}

impl fmt::Display for TableFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TableFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = [
            TableFormat::Csv,
            TableFormat::CsvWithNames,
            TableFormat::Parquet,
            TableFormat::JsonEachRow,
            TableFormat::Delta,
            TableFormat::DeltaS3Wrapper,
        ];
        all.into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown table format: {}", s))
    }
}

/// Link to the ingestion pipeline that owns a table's schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalSource {
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<String>,
}

/// A table backed by files in an object store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub id: TableId,
    pub scope_id: ScopeId,
    pub name: String,
    pub format: TableFormat,
    pub url_pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_id: Option<CredentialId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_source: Option<ExternalSource>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub columns: ColumnCatalog,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Table {
    /// Create a new, empty-catalog table with a fresh id.
    pub fn new(
        scope_id: ScopeId,
        name: impl Into<String>,
        format: TableFormat,
        url_pattern: impl Into<String>,
    ) -> Self {
        Self {
            id: RecordKey::generate(),
            scope_id,
            name: name.into(),
            format,
            url_pattern: url_pattern.into(),
            credential_id: None,
            external_source: None,
            deleted: false,
            deleted_at: None,
            columns: ColumnCatalog::new(),
            row_count: None,
            created_by: None,
            created_at: Utc::now(),
        }
    }

    /// Whether an ingestion pipeline owns this table's schema.
    pub fn is_sourced(&self) -> bool {
        self.external_source.is_some()
    }

    /// Dotted name split into its parts (`stripe.charges` -> `[stripe, charges]`).
    pub fn name_chain(&self) -> Vec<String> {
        self.name.split('.').map(|s| s.to_string()).collect()
    }

    /// Mark as deleted. The record stays in the store.
    pub fn soft_delete(&mut self) {
        self.deleted = true;
        self.deleted_at = Some(Utc::now());
    }
}

impl Record for Table {
    const COLLECTION: Collection = Collection::Tables;

    fn key(&self) -> &RecordKey {
        &self.id
    }
}

/// Object-store access key pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    pub scope_id: ScopeId,
    pub access_key: String,
    pub access_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(scope_id: ScopeId, access_key: impl Into<String>, access_secret: impl Into<String>) -> Self {
        Self {
            id: RecordKey::generate(),
            scope_id,
            access_key: access_key.into(),
            access_secret: access_secret.into(),
            created_by: None,
            created_at: Utc::now(),
        }
    }

    /// Merge a partial update; absent fields keep their value.
    pub fn merge(&mut self, access_key: Option<String>, access_secret: Option<String>) {
        if let Some(key) = access_key {
            self.access_key = key;
        }
        if let Some(secret) = access_secret {
            self.access_secret = secret;
        }
    }
}

impl Record for Credential {
    const COLLECTION: Collection = Collection::Credentials;

    fn key(&self) -> &RecordKey {
        &self.id
    }
}

/// Why a table name was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidTableName {
    Empty,
    TooLong(usize),
    InvalidCharacter { char: char, position: usize },
    EmptySegment,
}

impl fmt::Display for InvalidTableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "table name cannot be empty"),
            Self::TooLong(len) => write!(f, "table name too long: {} characters", len),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character '{}' at position {}", char, position)
            }
            Self::EmptySegment => write!(f, "table name has an empty segment"),
        }
    }
}

impl std::error::Error for InvalidTableName {}

/// Check a table name: 1-128 characters of letters, digits, `_`, `-` and
/// `.` separators with no empty segment.
pub fn validate_table_name(name: &str) -> Result<(), InvalidTableName> {
    if name.is_empty() {
        return Err(InvalidTableName::Empty);
    }
    if name.len() > 128 {
        return Err(InvalidTableName::TooLong(name.len()));
    }
    for (i, c) in name.chars().enumerate() {
        if !c.is_ascii_alphanumeric() && c != '_' && c != '-' && c != '.' {
            return Err(InvalidTableName::InvalidCharacter { char: c, position: i });
        }
    }
    if name.split('.').any(|segment| segment.is_empty()) {
        return Err(InvalidTableName::EmptySegment);
    }
    Ok(())
}
