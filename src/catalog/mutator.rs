//! Targeted column type overrides.
//!
//! Updating a schema is split in two so that validity is always computed
//! against the column type that was actually committed:
//!
//! 1. [`SchemaMutator::apply_types`] rewrites the native and query types of
//!    each requested column.
//! 2. [`SchemaMutator::apply_validity`] recomputes `valid` for those columns
//!    on the reloaded table.
//!
//! [`SchemaMutator::plan`] checks every precondition up front, so a rejected
//! request touches nothing.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use super::table::Table;
use crate::types::{NativeType, QueryType, SerializedFieldType, UnknownTypeError};

/// Decides whether the query engine can read a column of a table.
pub trait ColumnValidator: Send + Sync {
    fn validate_column(&self, table: &Table, column: &str) -> bool;
}

/// Format-based compatibility.
///
/// A column is valid when its native type parses and maps to a known query
/// type. CSV formats also need the value to be a scalar.
#[derive(Debug, Clone, Copy, Default)]
pub struct FormatRule;

impl ColumnValidator for FormatRule {
    fn validate_column(&self, table: &Table, column: &str) -> bool {
        let Some(entry) = table.columns.get(column) else {
            return false;
        };
        let Ok(native) = NativeType::parse(entry.clickhouse()) else {
            return false;
        };

        match QueryType::from_native(&native) {
            Ok(QueryType::Unknown) | Err(_) => false,
            Ok(_) if table.format.is_delimited_text() => !(native.is_composite() || native.is_document()),
            Ok(_) => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
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
}

/// One accepted column override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnUpdate {
    pub column: String,
    pub requested: SerializedFieldType,
    /// Storage type of `requested`, before the nullable wrapper.
    pub native: NativeType,
}

/// Overrides that passed every precondition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaPlan {
    updates: Vec<ColumnUpdate>,
}

impl SchemaPlan {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn columns(&self) -> Vec<&str> {
        self.updates.iter().map(|u| u.column.as_str()).collect()
    }

    pub fn updates(&self) -> &[ColumnUpdate] {
        &self.updates
    }
}

#[derive(Clone)]
pub struct SchemaMutator {
    validator: Arc<dyn ColumnValidator>,
}

impl Default for SchemaMutator {
    fn default() -> Self {
        Self::new(Arc::new(FormatRule))
    }
}

impl SchemaMutator {
    pub fn new(validator: Arc<dyn ColumnValidator>) -> Self {
        Self { validator }
    }

    /// Check a request against `table`.
    ///
    /// In order: the table is not sourced, every column exists, every
    /// requested type has a storage type.
    pub fn plan(&self, table: &Table, updates: &BTreeMap<String, String>) -> Result<SchemaPlan, SchemaError> {
        if table.is_sourced() {
            return Err(SchemaError::SourcedTable {
                table: table.name.clone(),
            });
        }

        if let Some(missing) = updates.keys().find(|column| !table.columns.contains(column.as_str())) {
            return Err(SchemaError::UnknownColumn {
                table: table.name.clone(),
                column: missing.clone(),
            });
        }

        let mut plan = SchemaPlan::default();
        for (column, requested) in updates {
            let unknown = |source: UnknownTypeError| SchemaError::UnknownType {
                column: column.clone(),
                requested: requested.clone(),
                source,
            };
            let kind: SerializedFieldType = requested.parse().map_err(unknown)?;
            let native = kind.native_type().map_err(unknown)?;

            plan.updates.push(ColumnUpdate {
                column: column.clone(),
                requested: kind,
                native,
            });
        }

        Ok(plan)
    }

    /// Phase one: write the nullable storage type and its query type.
    ///
    /// Legacy entries are upgraded to descriptors first. Nested `fields` are
    /// dropped since no storage type written here has named elements.
    pub fn apply_types(&self, table: &mut Table, plan: &SchemaPlan) {
        for update in &plan.updates {
            let Some(entry) = table.columns.get_mut(&update.column) else {
                continue;
            };

            let descriptor = entry.normalize();
            descriptor.clickhouse = update.native.clone().nullable().to_string();
            descriptor.hogql = QueryType::from_native(&update.native).ok();
            descriptor.fields = None;
        }
    }

    /// Phase two: recompute `valid` for the planned columns.
    pub fn apply_validity(&self, table: &mut Table, plan: &SchemaPlan) {
        let verdicts: Vec<(&str, bool)> = plan
            .updates
            .iter()
            .map(|u| (u.column.as_str(), self.validator.validate_column(table, &u.column)))
            .collect();

        for (column, valid) in verdicts {
            if let Some(entry) = table.columns.get_mut(column) {
                entry.normalize().valid = Some(valid);
            }
        }
    }
}
