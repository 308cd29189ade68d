//! Table lifecycle.
//!
//! [`TableManager`] is the entry point: it creates, updates, deletes and
//! resyncs tables, persisting every change through the record store.

mod api;
pub mod config;
mod error;
mod jobs;

pub use api::{CreateTable, CredentialInput, CredentialPatch, CredentialView, TableManager, TableUpdate, TableView};
pub use config::{CatalogConfig, ConfigError};
pub use error::{CatalogError, CatalogResult};
pub use jobs::{ChannelJobs, DiscardJobs, ValidationJob, ValidationJobs};
