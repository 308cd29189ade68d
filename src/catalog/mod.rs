//! Warehouse table catalog.
//!
//! Table and credential records, the per-table column catalog, and the two
//! engines that maintain it: the [`Synchronizer`], which derives catalogs
//! from a table's source, and the [`SchemaMutator`], which applies manual
//! type overrides.

mod column;
mod mutator;
mod sync;
mod table;

#[cfg(test)]
pub(crate) mod testing;

pub use column::{ColumnCatalog, ColumnDescriptor, ColumnEntry, Field, SerializedField};
pub use mutator::{ColumnUpdate, ColumnValidator, FormatRule, SchemaError, SchemaMutator, SchemaPlan};
pub use sync::{
    serialize_fields, LiveSchemaProvider, NoLiveSchema, ProbeCredential, ProbeError, ProbeRequest, ProbedColumn,
    SchemaInferenceError, SchemaProbe, Synchronizer,
};
pub use table::{
    validate_table_name, Credential, CredentialId, ExternalSource, InvalidTableName, ScopeId, Table, TableFormat,
    TableId,
};
