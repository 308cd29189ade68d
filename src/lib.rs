//! lakecat - a Git-backed column catalog for warehouse tables
//!
//! This crate tracks tables whose data lives as files in an object store,
//! together with a per-column type catalog that a query engine compiles
//! against. Every change to a table is a commit, so the full history of each
//! schema is preserved in `.git/`.
//!
//! # Example
//!
//! ```no_run
//! use std::collections::BTreeMap;
//! use std::sync::Arc;
//!
//! use lakecat::catalog::{ProbeError, ProbeRequest, ProbedColumn, SchemaProbe, ScopeId, TableFormat};
//! use lakecat::warehouse::{CatalogConfig, CreateTable, TableManager};
//!
//! struct Fixed;
//!
//! impl SchemaProbe for Fixed {
//!     fn infer(&self, _: &ProbeRequest) -> Result<Vec<ProbedColumn>, ProbeError> {
//!         Ok(vec![ProbedColumn::new("amount", "Nullable(Float64)")])
//!     }
//! }
//!
//! let manager = TableManager::open(&CatalogConfig::new("./catalog"), Arc::new(Fixed)).unwrap();
//! let table = manager
//!     .create(CreateTable::new(ScopeId(1), "payments", TableFormat::Parquet, "s3://bucket/*.parquet"))
//!     .unwrap();
//!
//! let mut updates = BTreeMap::new();
//! updates.insert("amount".to_string(), "string".to_string());
//! manager.update_schema(&table.id, &updates).unwrap();
//! ```

pub mod catalog;
pub mod logging;
pub mod store;
pub mod types;
pub mod warehouse;
