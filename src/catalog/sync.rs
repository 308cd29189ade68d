//! Column catalog synchronization.
//!
//! Derives column catalogs and field descriptors for a table, either from
//! the query engine's live schema or by probing the source files. Nothing
//! here writes to the store; callers decide what to persist.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};

use super::column::{ColumnCatalog, ColumnDescriptor, Field, SerializedField};
use super::table::{Credential, Table, TableFormat};
use crate::types::{NativeType, NativeTypeError};

/// The query engine's view of tables it already knows.
pub trait LiveSchemaProvider {
    fn has_table(&self, name: &str) -> bool;

    /// Fields of a table. Only called after `has_table` returned true.
    fn get_fields(&self, name: &str) -> Vec<Field>;
}

/// A provider that knows no tables, forcing inference.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLiveSchema;

impl LiveSchemaProvider for NoLiveSchema {
    fn has_table(&self, _name: &str) -> bool {
        false
    }

    fn get_fields(&self, _name: &str) -> Vec<Field> {
        Vec::new()
    }
}

/// Access key pair handed to the probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeCredential {
    pub access_key: String,
    pub access_secret: String,
}

/// What the probe needs to read a table's source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRequest {
    pub table_name: String,
    pub format: TableFormat,
    pub url_pattern: String,
    pub credential: Option<ProbeCredential>,
}

impl ProbeRequest {
    pub fn for_table(table: &Table, credential: Option<&Credential>) -> Self {
        Self {
            table_name: table.name.clone(),
            format: table.format,
            url_pattern: table.url_pattern.clone(),
            credential: credential.map(|c| ProbeCredential {
                access_key: c.access_key.clone(),
                access_secret: c.access_secret.clone(),
            }),
        }
    }
}

/// A column as reported by the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbedColumn {
    pub name: String,
    /// Native type string, exactly as the source described it.
    pub clickhouse: String,
}

impl ProbedColumn {
    pub fn new(name: impl Into<String>, clickhouse: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            clickhouse: clickhouse.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("source unreachable: {0}")]
    Unreachable(String),

    #[error("malformed source: {0}")]
    Malformed(String),
}

/// Reads the column layout of a table's source files.
pub trait SchemaProbe: Send + Sync {
    fn infer(&self, request: &ProbeRequest) -> Result<Vec<ProbedColumn>, ProbeError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaInferenceError {
    #[error("schema inference failed for '{table}': {source}")]
    Probe {
        table: String,
        #[source]
        source: ProbeError,
    },

    #[error("schema inference for '{table}' timed out after {after:?}")]
    Timeout { table: String, after: Duration },

    #[error("column '{column}' has an unreadable type: {source}")]
    InvalidType {
        column: String,
        #[source]
        source: NativeTypeError,
    },

    #[error("schema probe worker failed: {0}")]
    Worker(String),
}

/// Builds column catalogs and field descriptors for tables.
#[derive(Clone)]
pub struct Synchronizer {
    probe: Arc<dyn SchemaProbe>,
    timeout: Option<Duration>,
}

impl Synchronizer {
    pub fn new(probe: Arc<dyn SchemaProbe>) -> Self {
        Self { probe, timeout: None }
    }

    /// Bound each probe call. A probe that overruns keeps running detached
    /// and its result is dropped.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Probe the table's source and build its column catalog.
    ///
    /// Native types with no query type are kept with `valid: false`.
    pub fn infer_catalog(
        &self,
        table: &Table,
        credential: Option<&Credential>,
    ) -> Result<ColumnCatalog, SchemaInferenceError> {
        let request = ProbeRequest::for_table(table, credential);
        let columns = self.run_probe(request)?;

        let mut catalog = ColumnCatalog::new();
        for column in columns {
            let native = NativeType::parse(&column.clickhouse).map_err(|source| {
                SchemaInferenceError::InvalidType {
                    column: column.name.clone(),
                    source,
                }
            })?;
            let descriptor = ColumnDescriptor::describe(column.clickhouse, &native);
            if descriptor.hogql.is_none() {
                debug!(table = %table.name, column = %column.name, native = %native, "no query type for column");
            }
            catalog.insert(column.name, descriptor);
        }

        debug!(table = %table.name, columns = catalog.len(), "inferred column catalog");
        Ok(catalog)
    }

    /// Field descriptors for a table.
    ///
    /// Uses the live schema when the query engine knows the table and
    /// probes the source otherwise. Validity flags come from the stored
    /// catalog.
    pub fn get_columns(
        &self,
        table: &Table,
        credential: Option<&Credential>,
        live: &dyn LiveSchemaProvider,
    ) -> Result<Vec<SerializedField>, SchemaInferenceError> {
        let fields = if live.has_table(&table.name) {
            live.get_fields(&table.name)
        } else {
            let catalog = self.infer_catalog(table, credential)?;
            catalog
                .iter()
                .map(|(name, entry)| Field::from_descriptor(name, &entry.as_descriptor()))
                .collect()
        };

        Ok(serialize_fields(table, &fields))
    }

    /// Field descriptors from the stored catalog alone.
    pub fn definition_columns(&self, table: &Table) -> Vec<SerializedField> {
        let fields: Vec<Field> = table
            .columns
            .iter()
            .map(|(name, entry)| Field::from_descriptor(name, &entry.as_descriptor()))
            .collect();

        serialize_fields(table, &fields)
    }

    fn run_probe(&self, request: ProbeRequest) -> Result<Vec<ProbedColumn>, SchemaInferenceError> {
        let table = request.table_name.clone();

        let Some(timeout) = self.timeout else {
            return self
                .probe
                .infer(&request)
                .map_err(|source| SchemaInferenceError::Probe { table, source });
        };

        let (tx, rx) = mpsc::channel();
        let probe = Arc::clone(&self.probe);
        thread::Builder::new()
            .name("schema-probe".to_string())
            .spawn(move || {
                // the receiver is gone once the caller timed out
                let _ = tx.send(probe.infer(&request));
            })
            .map_err(|e| SchemaInferenceError::Worker(e.to_string()))?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result.map_err(|source| SchemaInferenceError::Probe { table, source }),
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!(table = %table, timeout = ?timeout, "schema probe timed out");
                Err(SchemaInferenceError::Timeout { table, after: timeout })
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(SchemaInferenceError::Worker(
                "probe exited without a result".to_string(),
            )),
        }
    }
}

/// Project fields into API descriptors for `table`.
pub fn serialize_fields(table: &Table, fields: &[Field]) -> Vec<SerializedField> {
    let chain = table.name_chain();
    fields
        .iter()
        .map(|field| {
            let stored = table.columns.get(&field.name).map(|entry| entry.as_descriptor().into_owned());
            serialize_field(table, field, &chain, stored.as_ref())
        })
        .collect()
}

fn serialize_field(
    table: &Table,
    field: &Field,
    parent_chain: &[String],
    stored: Option<&ColumnDescriptor>,
) -> SerializedField {
    let mut chain = parent_chain.to_vec();
    chain.push(field.name.clone());

    let fields = field
        .fields
        .iter()
        .map(|child| {
            let child_stored = stored.and_then(|d| d.field(&child.name));
            serialize_field(table, child, &chain, child_stored)
        })
        .collect();

    SerializedField {
        key: field.name.clone(),
        name: field.name.clone(),
        field_type: field.query_type.serialized(),
        schema_valid: stored.map_or(true, ColumnDescriptor::is_valid),
        fields,
        table: table.name.clone(),
        chain,
    }
}
