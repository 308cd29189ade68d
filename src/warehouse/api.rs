//! Table manager - the high-level interface for catalog operations.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::{
    validate_table_name, ColumnValidator, Credential, CredentialId, ExternalSource, LiveSchemaProvider, ScopeId,
    SchemaMutator, SchemaPlan, SchemaProbe, SerializedField, Synchronizer, Table, TableFormat, TableId,
};
use crate::store::{Collection, CommitInfo, CommitMessage, StorageError, Stored, WarehouseStore, WriteBatch};
use crate::warehouse::config::CatalogConfig;
use crate::warehouse::error::{CatalogError, CatalogResult};
use crate::warehouse::jobs::{DiscardJobs, ValidationJobs};

/// Access key pair supplied when creating a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialInput {
    pub access_key: String,
    pub access_secret: String,
}

/// Input for [`TableManager::create`].
#[derive(Debug, Clone)]
pub struct CreateTable {
    pub scope_id: ScopeId,
    pub name: String,
    pub format: TableFormat,
    pub url_pattern: String,
    pub credential: Option<CredentialInput>,
    pub external_source: Option<ExternalSource>,
    pub created_by: Option<String>,
}

impl CreateTable {
    pub fn new(scope_id: ScopeId, name: impl Into<String>, format: TableFormat, url_pattern: impl Into<String>) -> Self {
        Self {
            scope_id,
            name: name.into(),
            format,
            url_pattern: url_pattern.into(),
            credential: None,
            external_source: None,
            created_by: None,
        }
    }

    pub fn credential(mut self, access_key: impl Into<String>, access_secret: impl Into<String>) -> Self {
        self.credential = Some(CredentialInput {
            access_key: access_key.into(),
            access_secret: access_secret.into(),
        });
        self
    }

    pub fn external_source(mut self, source: ExternalSource) -> Self {
        self.external_source = Some(source);
        self
    }

    pub fn created_by(mut self, user: impl Into<String>) -> Self {
        self.created_by = Some(user.into());
        self
    }
}

/// Partial credential update. Absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialPatch {
    pub access_key: Option<String>,
    pub access_secret: Option<String>,
}

impl CredentialPatch {
    pub fn is_empty(&self) -> bool {
        self.access_key.is_none() && self.access_secret.is_none()
    }
}

/// Input for [`TableManager::update`]. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct TableUpdate {
    pub name: Option<String>,
    pub format: Option<TableFormat>,
    pub url_pattern: Option<String>,
    pub credential: Option<CredentialPatch>,
}

impl TableUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.format.is_none()
            && self.url_pattern.is_none()
            && self.credential.as_ref().map_or(true, CredentialPatch::is_empty)
    }
}

/// Credential as shown to clients. The key pair is never included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialView {
    pub id: CredentialId,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Table as shown to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableView {
    pub id: TableId,
    pub deleted: bool,
    pub name: String,
    pub format: TableFormat,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub url_pattern: String,
    pub credential: Option<CredentialView>,
    pub columns: Vec<SerializedField>,
    pub external_data_source: Option<String>,
    pub external_schema: Option<String>,
    pub row_count: Option<u64>,
}

/// The main catalog handle.
///
/// Name checks and the write that claims the name run under one lock, so
/// two creates of the same name through a manager cannot both succeed.
pub struct TableManager {
    store: WarehouseStore,
    sync: Synchronizer,
    mutator: SchemaMutator,
    jobs: Arc<dyn ValidationJobs>,
    name_lock: Mutex<()>,
}

impl TableManager {
    pub fn new(store: WarehouseStore, sync: Synchronizer) -> Self {
        Self {
            store,
            sync,
            mutator: SchemaMutator::default(),
            jobs: Arc::new(DiscardJobs),
            name_lock: Mutex::new(()),
        }
    }

    /// Open the catalog described by `config`.
    pub fn open(config: &CatalogConfig, probe: Arc<dyn SchemaProbe>) -> CatalogResult<Self> {
        let store = if config.create_if_missing {
            WarehouseStore::open_or_init(&config.path)?
        } else {
            WarehouseStore::open(&config.path)?
        };
        let store = store.with_signature(config.signature.clone());
        let sync = Synchronizer::new(probe).with_timeout(config.timeout());

        debug!(path = %config.path.display(), timeout = ?config.timeout(), "opened catalog");
        Ok(Self::new(store, sync))
    }

    pub fn with_jobs(mut self, jobs: Arc<dyn ValidationJobs>) -> Self {
        self.jobs = jobs;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn ColumnValidator>) -> Self {
        self.mutator = SchemaMutator::new(validator);
        self
    }

    pub fn store(&self) -> &WarehouseStore {
        &self.store
    }

    pub fn synchronizer(&self) -> &Synchronizer {
        &self.sync
    }

    /// Register a table and infer its column catalog.
    ///
    /// Nothing is written when inference fails. The table and its
    /// credential land in one commit, then a validation job is queued.
    pub fn create(&self, input: CreateTable) -> CatalogResult<Stored<Table>> {
        validate_table_name(&input.name)?;

        let _guard = self.name_lock.lock();
        self.ensure_name_free(input.scope_id, &input.name, None)?;

        let credential = input.credential.map(|c| {
            let mut credential = Credential::new(input.scope_id, c.access_key, c.access_secret);
            credential.created_by = input.created_by.clone();
            credential
        });

        let mut table = Table::new(input.scope_id, input.name, input.format, input.url_pattern);
        table.credential_id = credential.as_ref().map(|c| c.id.clone());
        table.external_source = input.external_source;
        table.created_by = input.created_by;

        table.columns = self.sync.infer_catalog(&table, credential.as_ref()).map_err(|source| {
            warn!(scope = %table.scope_id, name = %table.name, error = %source, "create rejected");
            CatalogError::Validation {
                message: source.to_string(),
                source: Some(source),
            }
        })?;

        let mut batch = WriteBatch::new();
        if let Some(credential) = &credential {
            batch.insert(credential)?;
        }
        batch.insert(&table)?;
        let applied = self
            .store
            .apply(batch, &CommitMessage::create_table(&table.name, table.id.as_str()))?;

        info!(
            scope = %table.scope_id,
            table = %table.id,
            name = %table.name,
            columns = table.columns.len(),
            "created table"
        );
        self.jobs.submit(table.scope_id, table.id.clone());

        Ok(applied.stored(table)?)
    }

    /// A live (not deleted) table.
    pub fn get(&self, id: &TableId) -> CatalogResult<Stored<Table>> {
        match self.store.get::<Table>(id)? {
            Some(stored) if !stored.deleted => Ok(stored),
            _ => {
                debug!(table = %id, "table not found");
                Err(CatalogError::NotFound(id.clone()))
            }
        }
    }

    /// Live tables of a scope, newest first.
    ///
    /// `search` keeps names containing it, ignoring case.
    pub fn list(&self, scope_id: ScopeId, search: Option<&str>) -> CatalogResult<Vec<Stored<Table>>> {
        let needle = search.map(str::to_lowercase);
        let mut tables: Vec<Stored<Table>> = self
            .store
            .scan::<Table>()?
            .into_iter()
            .filter(|t| t.scope_id == scope_id && !t.deleted)
            .filter(|t| needle.as_ref().map_or(true, |n| t.name.to_lowercase().contains(n.as_str())))
            .collect();

        tables.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.key.cmp(&a.key)));
        debug!(scope = %scope_id, search = ?search, found = tables.len(), "listed tables");
        Ok(tables)
    }

    /// Apply scalar changes and merge a credential patch.
    ///
    /// The column catalog is left alone; use
    /// [`refresh_schema`](Self::refresh_schema) after moving the source.
    pub fn update(&self, id: &TableId, update: TableUpdate) -> CatalogResult<Stored<Table>> {
        let mut stored = self.get(id)?;
        if update.is_empty() {
            return Ok(stored);
        }

        let _guard = self.name_lock.lock();
        let mut batch = WriteBatch::new();

        if let Some(name) = update.name {
            if name != stored.name {
                validate_table_name(&name)?;
                self.ensure_name_free(stored.scope_id, &name, Some(id))?;
                stored.name = name;
            }
        }
        if let Some(format) = update.format {
            stored.format = format;
        }
        if let Some(url_pattern) = update.url_pattern {
            stored.url_pattern = url_pattern;
        }

        if let Some(patch) = update.credential.filter(|p| !p.is_empty()) {
            match stored.credential_id.clone() {
                Some(credential_id) => {
                    let mut credential = self.store.load::<Credential>(&credential_id)?;
                    credential.merge(patch.access_key, patch.access_secret);
                    batch.update(&credential)?;
                }
                None => {
                    let (Some(access_key), Some(access_secret)) = (patch.access_key, patch.access_secret) else {
                        warn!(table = %id, "partial credential for a table without one");
                        return Err(CatalogError::validation(
                            "a new credential needs both access_key and access_secret",
                        ));
                    };
                    let mut credential = Credential::new(stored.scope_id, access_key, access_secret);
                    credential.created_by = stored.created_by.clone();
                    stored.credential_id = Some(credential.id.clone());
                    batch.insert(&credential)?;
                }
            }
        }

        batch.update(&stored)?;
        let applied = self
            .store
            .apply(batch, &CommitMessage::update_table(&stored.name, id.as_str()))?;

        info!(table = %id, name = %stored.name, "updated table");
        Ok(applied.stored(stored.into_value())?)
    }

    /// Mark a table deleted. Sourced tables go away with their source only.
    pub fn soft_delete(&self, id: &TableId) -> CatalogResult<Stored<Table>> {
        let mut stored = self.get(id)?;
        if stored.is_sourced() {
            warn!(table = %id, name = %stored.name, "refused to delete a sourced table");
            return Err(CatalogError::SourcedTable {
                table: stored.name.clone(),
            });
        }

        stored.soft_delete();
        let message = CommitMessage::delete_table(&stored.name, id.as_str());
        let stored = self.store.update(stored, &message)?;

        info!(table = %id, name = %stored.name, "deleted table");
        Ok(stored)
    }

    /// Re-infer the column catalog and replace it wholesale.
    pub fn refresh_schema(&self, id: &TableId) -> CatalogResult<Stored<Table>> {
        let mut stored = self.get(id)?;
        let credential = self.credential_of(&stored)?;

        stored.columns = self.sync.infer_catalog(&stored, credential.as_deref())?;
        let message = CommitMessage::refresh_schema(&stored.name, id.as_str());
        let stored = self.store.update(stored, &message)?;

        info!(table = %id, columns = stored.columns.len(), "refreshed schema");
        Ok(stored)
    }

    /// Override the types of existing columns.
    ///
    /// Types are committed first, then validity is computed against the
    /// committed table and committed again. A rejected request writes
    /// nothing and an empty map is a no-op.
    pub fn update_schema(&self, id: &TableId, updates: &BTreeMap<String, String>) -> CatalogResult<Stored<Table>> {
        let stored = self.get(id)?;
        if updates.is_empty() {
            return Ok(stored);
        }

        let plan = self.mutator.plan(&stored, updates).map_err(|err| {
            warn!(table = %id, error = %err, "schema update rejected");
            CatalogError::from(err)
        })?;

        let typed = self.commit_types(stored, &plan)?;
        let stored = self.commit_validity(id, &plan, typed.version)?;

        info!(
            table = %id,
            columns = ?plan.columns(),
            invalid = ?stored.columns.invalid_columns(),
            "updated schema"
        );
        Ok(stored)
    }

    fn commit_types(&self, mut stored: Stored<Table>, plan: &SchemaPlan) -> CatalogResult<Stored<Table>> {
        self.mutator.apply_types(&mut stored, plan);
        let message = CommitMessage::update_schema(&stored.name, stored.key.as_str(), &plan.columns());
        Ok(self.store.update(stored, &message)?)
    }

    /// Recompute validity on the table as committed at `typed_version`.
    fn commit_validity(&self, id: &TableId, plan: &SchemaPlan, typed_version: u64) -> CatalogResult<Stored<Table>> {
        let mut reloaded = self.store.load::<Table>(id)?;
        if reloaded.version != typed_version {
            warn!(
                table = %id,
                expected = typed_version,
                found = reloaded.version,
                "table changed between schema phases"
            );
            return Err(CatalogError::Conflict(StorageError::ConcurrentModification {
                collection: Collection::Tables,
                key: id.clone(),
                expected: typed_version,
                found: reloaded.version,
            }));
        }

        self.mutator.apply_validity(&mut reloaded, plan);
        let message = CommitMessage::validate_schema(&reloaded.name, id.as_str());
        Ok(self.store.update(reloaded, &message)?)
    }

    /// Field descriptors of a table, from the live schema when it knows the
    /// table and from the table's source otherwise. Nothing is written.
    pub fn columns(&self, id: &TableId, live: &dyn LiveSchemaProvider) -> CatalogResult<Vec<SerializedField>> {
        let stored = self.get(id)?;
        let credential = self.credential_of(&stored)?;
        Ok(self.sync.get_columns(&stored, credential.as_deref(), live)?)
    }

    /// Field descriptors from the stored catalog alone.
    pub fn definition_columns(&self, id: &TableId) -> CatalogResult<Vec<SerializedField>> {
        let stored = self.get(id)?;
        Ok(self.sync.definition_columns(&stored))
    }

    /// Client view of a table.
    ///
    /// Columns come from the live schema when it knows the table and from
    /// the stored catalog otherwise, so building a view never probes.
    pub fn view(&self, table: &Table, live: &dyn LiveSchemaProvider) -> CatalogResult<TableView> {
        let credential = match &table.credential_id {
            Some(id) => self.store.get::<Credential>(id)?.map(|c| CredentialView {
                id: c.key.clone(),
                created_by: c.created_by.clone(),
                created_at: c.created_at,
            }),
            None => None,
        };

        let columns = if live.has_table(&table.name) {
            crate::catalog::serialize_fields(table, &live.get_fields(&table.name))
        } else {
            self.sync.definition_columns(table)
        };

        Ok(TableView {
            id: table.id.clone(),
            deleted: table.deleted,
            name: table.name.clone(),
            format: table.format,
            created_by: table.created_by.clone(),
            created_at: table.created_at,
            url_pattern: table.url_pattern.clone(),
            credential,
            columns,
            external_data_source: table.external_source.as_ref().map(|s| s.source_id.clone()),
            external_schema: table.external_source.as_ref().and_then(|s| s.schema_id.clone()),
            row_count: table.row_count,
        })
    }

    /// Commits that touched a table, newest first. Deleted tables keep
    /// their history.
    pub fn history(&self, id: &TableId, limit: Option<usize>) -> CatalogResult<Vec<CommitInfo>> {
        if self.store.get::<Table>(id)?.is_none() {
            return Err(CatalogError::NotFound(id.clone()));
        }
        Ok(self.store.record_history(Collection::Tables, id, limit)?)
    }

    fn ensure_name_free(&self, scope_id: ScopeId, name: &str, except: Option<&TableId>) -> CatalogResult<()> {
        let taken = self
            .store
            .scan::<Table>()?
            .iter()
            .any(|t| t.scope_id == scope_id && !t.deleted && t.name == name && Some(&t.key) != except);

        if taken {
            warn!(scope = %scope_id, name = %name, "table name already exists");
            return Err(CatalogError::DuplicateName {
                scope: scope_id,
                name: name.to_string(),
            });
        }
        Ok(())
    }

    fn credential_of(&self, table: &Table) -> CatalogResult<Option<Stored<Credential>>> {
        let Some(id) = &table.credential_id else {
            return Ok(None);
        };
        let credential = self.store.get::<Credential>(id)?;
        if credential.is_none() {
            warn!(table = %table.id, credential = %id, "credential record is missing");
        }
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::catalog::testing::{StaticLiveSchema, StaticProbe};
    use crate::catalog::{ColumnCatalog, ColumnDescriptor, ColumnEntry, Field, ProbeError, ProbedColumn, SchemaInferenceError};
    use crate::types::{QueryType, SerializedFieldType};
    use crate::warehouse::jobs::ChannelJobs;

    const SCOPE: ScopeId = ScopeId(1);

    fn payment_columns() -> Vec<ProbedColumn> {
        vec![
            ProbedColumn::new("id", "Int64"),
            ProbedColumn::new("amount", "Nullable(Float64)"),
            ProbedColumn::new("paid_at", "DateTime64(3, 'UTC')"),
        ]
    }

    fn setup_with(probe: Arc<StaticProbe>) -> (TempDir, TableManager) {
        let dir = TempDir::new().unwrap();
        let store = WarehouseStore::init(dir.path()).unwrap();
        let manager = TableManager::new(store, Synchronizer::new(probe));
        (dir, manager)
    }

    fn setup() -> (TempDir, Arc<StaticProbe>, TableManager) {
        let probe = Arc::new(StaticProbe::new(payment_columns()));
        let (dir, manager) = setup_with(probe.clone());
        (dir, probe, manager)
    }

    fn payments() -> CreateTable {
        CreateTable::new(SCOPE, "payments", TableFormat::Parquet, "s3://bucket/payments/*.parquet")
    }

    fn sourced(name: &str) -> CreateTable {
        CreateTable::new(SCOPE, name, TableFormat::Parquet, "s3://bucket/stripe/*").external_source(ExternalSource {
            source_id: "src_stripe".to_string(),
            schema_id: Some("charges".to_string()),
        })
    }

    fn updates(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn legacy_payments() -> Table {
        let mut columns = ColumnCatalog::new();
        columns.insert("id", ColumnEntry::Legacy("Int64".to_string()));
        columns.insert("amount", ColumnEntry::Legacy("Float64".to_string()));
        let mut table = Table::new(SCOPE, "legacy_payments", TableFormat::Parquet, "s3://bucket/legacy/*.parquet");
        table.columns = columns;
        table
    }

    /// Rewrites the table through its own store handle whenever it is asked
    /// to validate a column.
    struct ConcurrentEditor {
        path: PathBuf,
    }

    impl ColumnValidator for ConcurrentEditor {
        fn validate_column(&self, table: &Table, _column: &str) -> bool {
            let other = WarehouseStore::open(&self.path).unwrap();
            let mut current = other.load::<Table>(&table.id).unwrap();
            current.url_pattern = "s3://bucket/moved/*.parquet".to_string();
            other.update(current, "concurrent edit").unwrap();
            true
        }
    }

    fn typed_only(clickhouse: &str, hogql: QueryType) -> ColumnEntry {
        ColumnEntry::Descriptor(ColumnDescriptor {
            clickhouse: clickhouse.to_string(),
            hogql: Some(hogql),
            valid: None,
            fields: None,
            extra: BTreeMap::new(),
        })
    }

    #[test]
    fn test_create_infers_and_persists() {
        let (_dir, _probe, manager) = setup();
        let (jobs, rx) = ChannelJobs::new();
        let manager = manager.with_jobs(Arc::new(jobs));

        let created = manager.create(payments().created_by("ada")).unwrap();
        assert_eq!(created.version, 1);
        assert_eq!(created.columns.len(), 3);
        assert_eq!(created.columns.get("amount").unwrap().hogql(), Some(QueryType::Float));

        let loaded = manager.get(&created.id).unwrap();
        assert_eq!(loaded, created);
        assert_eq!(loaded.created_by.as_deref(), Some("ada"));

        let job = rx.try_recv().unwrap();
        assert_eq!(job.table_id, created.id);
        assert_eq!(job.scope_id, SCOPE);
    }

    #[test]
    fn test_create_with_credential_is_one_commit() {
        let (_dir, probe, manager) = setup();
        let before = manager.store().history(None).unwrap().len();

        let created = manager.create(payments().credential("AKIA1", "secret1")).unwrap();
        assert_eq!(manager.store().history(None).unwrap().len(), before + 1);

        let credential_id = created.credential_id.clone().unwrap();
        let credential = manager.store().load::<Credential>(&credential_id).unwrap();
        assert_eq!(credential.access_key, "AKIA1");
        assert_eq!(credential.scope_id, SCOPE);

        let request = probe.last_request().unwrap();
        assert_eq!(request.credential.unwrap().access_key, "AKIA1");
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let (_dir, _probe, manager) = setup();
        manager.create(payments()).unwrap();

        let err = manager.create(payments()).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateName { ref name, .. } if name == "payments"));
        assert_eq!(manager.list(SCOPE, None).unwrap().len(), 1);

        // other scopes are independent
        let mut other = payments();
        other.scope_id = ScopeId(2);
        manager.create(other).unwrap();
    }

    #[test]
    fn test_deleted_name_can_be_reused() {
        let (_dir, _probe, manager) = setup();
        let first = manager.create(payments()).unwrap();
        manager.soft_delete(&first.id).unwrap();

        let second = manager.create(payments()).unwrap();
        assert_ne!(second.id, first.id);
        assert_eq!(manager.list(SCOPE, None).unwrap().len(), 1);
    }

    #[test]
    fn test_create_rejects_bad_name() {
        let (_dir, probe, manager) = setup();
        let mut input = payments();
        input.name = "drop table;".to_string();

        assert!(matches!(manager.create(input), Err(CatalogError::Validation { .. })));
        assert_eq!(probe.calls(), 0);
    }

    #[test]
    fn test_failed_inference_persists_nothing() {
        let probe = Arc::new(StaticProbe::failing(ProbeError::Unreachable("403 Forbidden".to_string())));
        let (_dir, manager) = setup_with(probe);
        let (jobs, rx) = ChannelJobs::new();
        let manager = manager.with_jobs(Arc::new(jobs));
        let before = manager.store().history(None).unwrap().len();

        let err = manager.create(payments().credential("AKIA1", "secret1")).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Validation {
                source: Some(SchemaInferenceError::Probe { .. }),
                ..
            }
        ));

        assert_eq!(manager.store().history(None).unwrap().len(), before);
        assert!(manager.store().scan::<Table>().unwrap().is_empty());
        assert!(manager.store().scan::<Credential>().unwrap().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_probe_timeout() {
        let probe = Arc::new(StaticProbe::new(payment_columns()).with_delay(Duration::from_millis(500)));
        let dir = TempDir::new().unwrap();
        let store = WarehouseStore::init(dir.path()).unwrap();
        let sync = Synchronizer::new(probe).with_timeout(Some(Duration::from_millis(20)));
        let manager = TableManager::new(store, sync);

        let err = manager.create(payments()).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Validation {
                source: Some(SchemaInferenceError::Timeout { .. }),
                ..
            }
        ));
        assert!(manager.store().scan::<Table>().unwrap().is_empty());
    }

    #[test]
    fn test_list_newest_first_with_search() {
        let (_dir, _probe, manager) = setup();
        let a = manager.create(payments()).unwrap();
        let b = manager.create(CreateTable::new(SCOPE, "Refunds", TableFormat::Csv, "s3://b/r.csv")).unwrap();
        let c = manager.create(CreateTable::new(SCOPE, "payment_methods", TableFormat::Csv, "s3://b/m.csv")).unwrap();
        manager
            .create(CreateTable::new(ScopeId(9), "payments", TableFormat::Csv, "s3://b/p.csv"))
            .unwrap();

        let ids: Vec<TableId> = manager.list(SCOPE, None).unwrap().into_iter().map(|t| t.key).collect();
        assert_eq!(ids, vec![c.id.clone(), b.id.clone(), a.id.clone()]);

        let found: Vec<String> = manager
            .list(SCOPE, Some("PAYMENT"))
            .unwrap()
            .into_iter()
            .map(|t| t.value.name)
            .collect();
        assert_eq!(found, vec!["payment_methods", "payments"]);

        assert!(manager.list(SCOPE, Some("nothing")).unwrap().is_empty());
    }

    #[test]
    fn test_update_scalars_keeps_catalog() {
        let (_dir, _probe, manager) = setup();
        let created = manager.create(payments()).unwrap();

        let updated = manager
            .update(
                &created.id,
                TableUpdate {
                    name: Some("payments_v2".to_string()),
                    url_pattern: Some("s3://bucket/v2/*.parquet".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.version, 2);
        assert_eq!(updated.name, "payments_v2");
        assert_eq!(updated.url_pattern, "s3://bucket/v2/*.parquet");
        assert_eq!(updated.format, TableFormat::Parquet);
        assert_eq!(updated.columns, created.columns);
    }

    #[test]
    fn test_empty_update_is_noop() {
        let (_dir, _probe, manager) = setup();
        let created = manager.create(payments()).unwrap();
        let before = manager.store().history(None).unwrap().len();

        let same = manager.update(&created.id, TableUpdate::default()).unwrap();
        assert_eq!(same, created);
        assert_eq!(manager.store().history(None).unwrap().len(), before);
    }

    #[test]
    fn test_rename_onto_live_name_rejected() {
        let (_dir, _probe, manager) = setup();
        manager.create(payments()).unwrap();
        let refunds = manager
            .create(CreateTable::new(SCOPE, "refunds", TableFormat::Csv, "s3://b/r.csv"))
            .unwrap();

        let err = manager
            .update(
                &refunds.id,
                TableUpdate {
                    name: Some("payments".to_string()),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateName { .. }));
        assert_eq!(manager.get(&refunds.id).unwrap().name, "refunds");

        // keeping its own name is fine
        manager
            .update(
                &refunds.id,
                TableUpdate {
                    name: Some("refunds".to_string()),
                    format: Some(TableFormat::CsvWithNames),
                    ..Default::default()
                },
            )
            .unwrap();
    }

    #[test]
    fn test_credential_patch_merges_fields() {
        let (_dir, _probe, manager) = setup();
        let created = manager.create(payments().credential("AKIA1", "secret1")).unwrap();

        let updated = manager
            .update(
                &created.id,
                TableUpdate {
                    credential: Some(CredentialPatch {
                        access_key: None,
                        access_secret: Some("secret2".to_string()),
                    }),
                    ..Default::default()
                },
            )
            .unwrap();

        assert_eq!(updated.credential_id, created.credential_id);
        let credential = manager
            .store()
            .load::<Credential>(updated.credential_id.as_ref().unwrap())
            .unwrap();
        assert_eq!(credential.access_key, "AKIA1");
        assert_eq!(credential.access_secret, "secret2");
        assert_eq!(credential.version, 2);
    }

    #[test]
    fn test_credential_patch_without_credential() {
        let (_dir, _probe, manager) = setup();
        let created = manager.create(payments()).unwrap();

        let partial = TableUpdate {
            credential: Some(CredentialPatch {
                access_key: Some("AKIA1".to_string()),
                access_secret: None,
            }),
            ..Default::default()
        };
        assert!(matches!(
            manager.update(&created.id, partial),
            Err(CatalogError::Validation { .. })
        ));
        assert!(manager.store().scan::<Credential>().unwrap().is_empty());

        let full = TableUpdate {
            credential: Some(CredentialPatch {
                access_key: Some("AKIA1".to_string()),
                access_secret: Some("secret1".to_string()),
            }),
            ..Default::default()
        };
        let updated = manager.update(&created.id, full).unwrap();
        let credential = manager
            .store()
            .load::<Credential>(updated.credential_id.as_ref().unwrap())
            .unwrap();
        assert_eq!(credential.access_secret, "secret1");
    }

    #[test]
    fn test_soft_delete() {
        let (_dir, _probe, manager) = setup();
        let created = manager.create(payments()).unwrap();

        let deleted = manager.soft_delete(&created.id).unwrap();
        assert!(deleted.deleted);
        assert!(deleted.deleted_at.is_some());

        assert!(manager.get(&created.id).unwrap_err().is_not_found());
        assert!(manager.list(SCOPE, None).unwrap().is_empty());
        assert!(manager.soft_delete(&created.id).unwrap_err().is_not_found());

        // the record is still there
        let raw = manager.store().load::<Table>(&created.id).unwrap();
        assert!(raw.deleted);
    }

    #[test]
    fn test_sourced_table_cannot_be_deleted() {
        let (_dir, _probe, manager) = setup();
        let created = manager.create(sourced("stripe.charges")).unwrap();

        let commits = manager.history(&created.id, None).unwrap().len();

        let err = manager.soft_delete(&created.id).unwrap_err();
        assert!(matches!(err, CatalogError::SourcedTable { ref table } if table == "stripe.charges"));

        let after = manager.get(&created.id).unwrap();
        assert!(!after.deleted);
        assert!(after.deleted_at.is_none());
        assert_eq!(after.version, created.version);
        assert_eq!(after.columns, created.columns);
        assert_eq!(manager.history(&created.id, None).unwrap().len(), commits);
    }

    #[test]
    fn test_refresh_overwrites_catalog() {
        let (_dir, probe, manager) = setup();
        let created = manager.create(payments()).unwrap();

        manager
            .update_schema(&created.id, &updates(&[("amount", "string")]))
            .unwrap();

        probe.set_columns(vec![
            ProbedColumn::new("id", "Int64"),
            ProbedColumn::new("currency", "LowCardinality(String)"),
        ]);
        let refreshed = manager.refresh_schema(&created.id).unwrap();

        let names: Vec<&str> = refreshed.columns.names().collect();
        assert_eq!(names, vec!["currency", "id"]);
        assert_eq!(refreshed.columns.get("currency").unwrap().hogql(), Some(QueryType::String));

        let again = manager.refresh_schema(&created.id).unwrap();
        assert_eq!(again.columns, refreshed.columns);
    }

    #[test]
    fn test_failed_refresh_keeps_catalog() {
        let (_dir, probe, manager) = setup();
        let created = manager.create(payments()).unwrap();

        probe.set_error(ProbeError::Malformed("not a parquet file".to_string()));
        let err = manager.refresh_schema(&created.id).unwrap_err();
        assert!(matches!(err, CatalogError::SchemaInference(SchemaInferenceError::Probe { .. })));
        assert_eq!(manager.get(&created.id).unwrap(), created);
    }

    #[test]
    fn test_update_schema_amount_to_string() {
        let (_dir, _probe, manager) = setup();
        let created = manager.create(payments()).unwrap();

        let updated = manager
            .update_schema(&created.id, &updates(&[("amount", "STRING")]))
            .unwrap();

        assert_eq!(
            updated.columns.get("amount").unwrap(),
            &ColumnEntry::Descriptor(ColumnDescriptor {
                clickhouse: "Nullable(String)".to_string(),
                hogql: Some(QueryType::String),
                valid: Some(true),
                fields: None,
                extra: BTreeMap::new(),
            })
        );
        assert_eq!(updated.columns.get("id"), created.columns.get("id"));

        // types, then validity
        let summaries: Vec<String> = manager
            .history(&created.id, None)
            .unwrap()
            .iter()
            .map(|c| c.summary().to_string())
            .collect();
        assert_eq!(summaries.len(), 3);
        assert!(summaries[0].starts_with("[VALIDATE SCHEMA]"));
        assert!(summaries[1].starts_with("[UPDATE SCHEMA]"));
        assert!(summaries[2].starts_with("[CREATE TABLE]"));
    }

    #[test]
    fn test_update_schema_is_idempotent() {
        let (_dir, _probe, manager) = setup();
        let created = manager.create(payments()).unwrap();
        let request = updates(&[("amount", "decimal"), ("paid_at", "datetime")]);

        let once = manager.update_schema(&created.id, &request).unwrap();
        let twice = manager.update_schema(&created.id, &request).unwrap();
        assert_eq!(twice.columns, once.columns);
        assert!(twice.version > once.version);
    }

    #[test]
    fn test_update_schema_rejections_write_nothing() {
        let (_dir, _probe, manager) = setup();
        let created = manager.create(payments()).unwrap();
        let before = manager.store().history(None).unwrap().len();

        let err = manager
            .update_schema(&created.id, &updates(&[("nonexistent", "STRING")]))
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownColumn { ref column, .. } if column == "nonexistent"));

        let err = manager
            .update_schema(&created.id, &updates(&[("amount", "string"), ("id", "varchar")]))
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownType { ref requested, .. } if requested == "varchar"));

        assert_eq!(manager.store().history(None).unwrap().len(), before);
        assert_eq!(manager.get(&created.id).unwrap(), created);
    }

    #[test]
    fn test_update_schema_refuses_sourced_table() {
        let (_dir, _probe, manager) = setup();
        let created = manager.create(sourced("stripe.charges")).unwrap();

        let err = manager
            .update_schema(&created.id, &updates(&[("amount", "string")]))
            .unwrap_err();
        assert!(matches!(err, CatalogError::SourcedTable { .. }));
        assert_eq!(manager.get(&created.id).unwrap().columns, created.columns);
    }

    #[test]
    fn test_empty_schema_update_is_noop() {
        let (_dir, _probe, manager) = setup();
        let created = manager.create(payments()).unwrap();

        let same = manager.update_schema(&created.id, &BTreeMap::new()).unwrap();
        assert_eq!(same, created);
    }

    #[test]
    fn test_update_schema_upgrades_legacy_entries() {
        let (_dir, _probe, manager) = setup();
        let mut table = Table::new(SCOPE, "legacy", TableFormat::CsvWithNames, "s3://b/legacy.csv");
        let mut columns = ColumnCatalog::new();
        columns.insert("id", ColumnEntry::Legacy("Int64".to_string()));
        columns.insert("tags", ColumnEntry::Legacy("String".to_string()));
        table.columns = columns;
        let stored = manager.store().insert(table, "seed").unwrap();

        let updated = manager
            .update_schema(&stored.id, &updates(&[("tags", "array")]))
            .unwrap();

        assert_eq!(updated.columns.get("id"), Some(&ColumnEntry::Legacy("Int64".to_string())));
        let tags = updated.columns.get("tags").unwrap();
        assert!(matches!(tags, ColumnEntry::Descriptor(_)));
        assert_eq!(tags.clickhouse(), "Array(String)");
        assert!(!tags.is_valid());
    }

    #[test]
    fn test_stale_write_is_conflict() {
        let (_dir, _probe, manager) = setup();
        let created = manager.create(payments()).unwrap();
        let stale = manager.get(&created.id).unwrap();

        manager
            .update_schema(&created.id, &updates(&[("amount", "string")]))
            .unwrap();

        let err: CatalogError = manager.store().update(stale, "late writer").unwrap_err().into();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_write_during_validation_is_conflict() {
        let (dir, _probe, manager) = setup();
        let manager = manager.with_validator(Arc::new(ConcurrentEditor {
            path: dir.path().to_path_buf(),
        }));
        let seeded = manager.store().insert(legacy_payments(), "seed").unwrap();

        let err = manager
            .update_schema(&seeded.id, &updates(&[("amount", "string")]))
            .unwrap_err();
        assert!(err.is_conflict());

        // the types landed, the validity pass did not
        let after = manager.get(&seeded.id).unwrap();
        assert_eq!(after.url_pattern, "s3://bucket/moved/*.parquet");
        assert_eq!(after.columns.get("amount"), Some(&typed_only("Nullable(String)", QueryType::String)));
        assert_eq!(after.columns.get("id"), Some(&ColumnEntry::Legacy("Int64".to_string())));
    }

    #[test]
    fn test_table_changed_between_schema_phases() {
        let (dir, _probe, manager) = setup();
        let seeded = manager.store().insert(legacy_payments(), "seed").unwrap();
        let id = seeded.id.clone();

        let plan = manager.mutator.plan(&seeded, &updates(&[("amount", "decimal")])).unwrap();
        let typed = manager.commit_types(seeded, &plan).unwrap();

        let other = WarehouseStore::open(dir.path()).unwrap();
        let mut current = other.load::<Table>(&id).unwrap();
        current.name = "renamed_elsewhere".to_string();
        other.update(current, "concurrent edit").unwrap();

        let err = manager.commit_validity(&id, &plan, typed.version).unwrap_err();
        assert!(matches!(
            err,
            CatalogError::Conflict(StorageError::ConcurrentModification { expected, found, .. })
                if expected == typed.version && found == typed.version + 1
        ));

        let after = manager.get(&id).unwrap();
        assert_eq!(after.name, "renamed_elsewhere");
        assert_eq!(after.columns.get("amount"), Some(&typed_only("Nullable(Decimal(38, 9))", QueryType::Decimal)));
        let summaries: Vec<String> = manager
            .history(&id, None)
            .unwrap()
            .iter()
            .map(|c| c.summary().to_string())
            .collect();
        assert!(!summaries.iter().any(|s| s.starts_with("[VALIDATE SCHEMA]")));
    }

    #[test]
    fn test_missing_credential_record() {
        let (_dir, _probe, manager) = setup();
        let dangling = CredentialId::generate();
        let mut table = legacy_payments();
        table.credential_id = Some(dangling.clone());
        let seeded = manager.store().insert(table, "seed").unwrap();

        let err = manager
            .update(
                &seeded.id,
                TableUpdate {
                    credential: Some(CredentialPatch {
                        access_key: Some("AKIA2".to_string()),
                        access_secret: None,
                    }),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, CatalogError::CredentialNotFound(ref id) if *id == dangling));
        assert!(err.to_string().starts_with("credential not found"));
    }

    #[test]
    fn test_columns_prefer_live_schema() {
        let (_dir, probe, manager) = setup();
        let created = manager.create(payments()).unwrap();
        let calls = probe.calls();

        let live = StaticLiveSchema::default().with_table(
            "payments",
            vec![Field::new("id", QueryType::Integer), Field::new("total", QueryType::Decimal)],
        );
        let fields = manager.columns(&created.id, &live).unwrap();
        assert_eq!(probe.calls(), calls);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1].field_type, SerializedFieldType::Decimal);
        assert_eq!(fields[1].chain, vec!["payments", "total"]);

        let fields = manager.columns(&created.id, &StaticLiveSchema::default()).unwrap();
        assert_eq!(probe.calls(), calls + 1);
        assert_eq!(fields.len(), 3);
        assert!(fields.iter().all(|f| f.table == "payments"));
    }

    #[test]
    fn test_definition_columns_read_store_only() {
        let (_dir, probe, manager) = setup();
        let created = manager.create(payments()).unwrap();
        let calls = probe.calls();

        let fields = manager.definition_columns(&created.id).unwrap();
        assert_eq!(probe.calls(), calls);
        let amount = fields.iter().find(|f| f.name == "amount").unwrap();
        assert_eq!(amount.field_type, SerializedFieldType::Float);
        assert!(amount.schema_valid);
    }

    #[test]
    fn test_view_has_no_secrets() {
        let (_dir, _probe, manager) = setup();
        let created = manager
            .create(sourced("stripe.charges").credential("AKIA_VISIBLE_NOT", "very-secret-value"))
            .unwrap();

        let view = manager.view(&created, &StaticLiveSchema::default()).unwrap();
        assert_eq!(view.credential.as_ref().unwrap().id, created.credential_id.clone().unwrap());
        assert_eq!(view.external_data_source.as_deref(), Some("src_stripe"));
        assert_eq!(view.external_schema.as_deref(), Some("charges"));
        assert_eq!(view.columns.len(), 3);

        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("very-secret-value"));
        assert!(!json.contains("AKIA_VISIBLE_NOT"));
        assert!(!json.contains("access_key"));
    }

    #[test]
    fn test_catalog_round_trips_through_store() {
        let (dir, _probe, manager) = setup();
        let mut table = Table::new(SCOPE, "events", TableFormat::JsonEachRow, "s3://b/events/*.json");
        let catalog: ColumnCatalog = serde_json::from_value(serde_json::json!({
            "legacy": "String",
            "payload": {
                "clickhouse": "Tuple(id Int64, tags Array(String))",
                "hogql": "StringJSONDatabaseField",
                "valid": false,
                "fields": {
                    "id": { "clickhouse": "Int64", "hogql": "IntegerDatabaseField", "valid": true }
                }
            }
        }))
        .unwrap();
        table.columns = catalog.clone();
        let stored = manager.store().insert(table, "seed").unwrap();

        let reopened = WarehouseStore::open(dir.path()).unwrap();
        let loaded = reopened.load::<Table>(&stored.id).unwrap();
        assert_eq!(loaded.columns, catalog);
    }

    #[test]
    fn test_history_of_table() {
        let (_dir, _probe, manager) = setup();
        let created = manager.create(payments()).unwrap();
        let other = manager
            .create(CreateTable::new(SCOPE, "refunds", TableFormat::Csv, "s3://b/r.csv"))
            .unwrap();
        manager.soft_delete(&created.id).unwrap();
        manager.refresh_schema(&other.id).unwrap();

        let history = manager.history(&created.id, None).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].summary().starts_with("[DELETE TABLE]"));

        assert_eq!(manager.history(&created.id, Some(1)).unwrap().len(), 1);
        assert!(manager.history(&TableId::generate(), None).unwrap_err().is_not_found());
    }

    #[test]
    fn test_open_from_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("catalog");
        let probe = Arc::new(StaticProbe::new(payment_columns()));

        let missing = CatalogConfig::new(&path).create_if_missing(false);
        assert!(matches!(
            TableManager::open(&missing, probe.clone()),
            Err(CatalogError::Storage(StorageError::NotInitialized(_)))
        ));

        let config = CatalogConfig::new(&path).inference_timeout(Some(Duration::from_secs(5)));
        let manager = TableManager::open(&config, probe.clone()).unwrap();
        assert_eq!(manager.synchronizer().timeout(), Some(Duration::from_secs(5)));
        let created = manager.create(payments()).unwrap();
        drop(manager);

        let manager = TableManager::open(&config, probe).unwrap();
        assert_eq!(manager.get(&created.id).unwrap().name, "payments");
    }
}
