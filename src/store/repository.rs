//! the git repository wrapper used by the rest of the crate.
//!
//! reads always see the tip of `main`. Writes are batched into a single
//! commit and checked against the versions the caller read, all under one
//! lock, so two writers racing on the same record cannot both succeed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use git2::Repository;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::store::commit::{self, CommitBuilder, CommitInfo};
use crate::store::error::{StorageError, StorageResult};
use crate::store::record::{self, Record, RecordMeta, Stored};
use crate::store::refs::RefManager;
use crate::store::tree::TreeMutator;
use crate::store::types::{BranchName, Collection, CommitId, GitSignature, RecordKey};

/// clone to share across threads; clones use the same repository handle
#[derive(Clone)]
pub struct WarehouseStore {
    repo: Arc<Mutex<Repository>>,
    path: PathBuf,
    signature: GitSignature,
}

impl WarehouseStore {
    /// open an existing repository
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = Repository::open(path).map_err(|_| StorageError::NotInitialized(path.to_path_buf()))?;
        Ok(Self::from_repo(repo, path))
    }

    /// initialize a new repository with an empty catalog
    pub fn init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let store = Self::from_repo(Repository::init(path)?, path);

        store.with_repo(|repo| {
            let commit_id = commit::create_initial_commit(repo, &store.signature)?;
            RefManager::init_main_branch(repo, commit_id)
        })?;

        Ok(store)
    }

    pub fn open_or_init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        if path.join(".git").exists() {
            Self::open(path)
        } else {
            Self::init(path)
        }
    }

    fn from_repo(repo: Repository, path: &Path) -> Self {
        Self {
            repo: Arc::new(Mutex::new(repo)),
            path: path.to_path_buf(),
            signature: GitSignature::lakecat(),
        }
    }

    /// signature for commits made through this handle
    pub fn with_signature(mut self, signature: GitSignature) -> Self {
        self.signature = signature;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_repo<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Repository) -> StorageResult<T>,
    {
        let repo = self.repo.lock();
        f(&repo)
    }

    /// tip of `main`
    pub fn head(&self) -> StorageResult<CommitId> {
        self.with_repo(|repo| RefManager::resolve_branch(repo, &BranchName::main()))
    }

    /// read one record at the tip of `main`
    pub fn get<T: Record>(&self, key: &RecordKey) -> StorageResult<Option<Stored<T>>> {
        self.with_repo(|repo| {
            let head = RefManager::resolve_branch(repo, &BranchName::main())?;
            let tree = commit::get_tree_at_commit(repo, head)?;

            let blob_id = match tree.get_blob_id(repo, T::COLLECTION, key)? {
                Some(id) => id,
                None => return Ok(None),
            };

            let bytes = record::read_blob(repo, blob_id)?;
            record::decode(&bytes, key).map(Some)
        })
    }

    /// like [`get`](Self::get) but a missing record is an error
    pub fn load<T: Record>(&self, key: &RecordKey) -> StorageResult<Stored<T>> {
        self.get(key)?.ok_or_else(|| StorageError::RecordNotFound {
            collection: T::COLLECTION,
            key: key.clone(),
        })
    }

    /// read every record of a collection.
    ///
    /// this reads the whole collection into memory.
    pub fn scan<T: Record>(&self) -> StorageResult<Vec<Stored<T>>> {
        self.with_repo(|repo| {
            let head = RefManager::resolve_branch(repo, &BranchName::main())?;
            let tree = commit::get_tree_at_commit(repo, head)?;
            let keys = tree.list_keys(repo, T::COLLECTION)?;

            let mut records = Vec::with_capacity(keys.len());
            for key in keys {
                let blob_id = tree
                    .get_blob_id(repo, T::COLLECTION, &key)?
                    .ok_or_else(|| StorageError::RecordNotFound {
                        collection: T::COLLECTION,
                        key: key.clone(),
                    })?;
                let bytes = record::read_blob(repo, blob_id)?;
                records.push(record::decode(&bytes, &key)?);
            }

            Ok(records)
        })
    }

    /// write a new record. Fails if the key is taken.
    pub fn insert<T: Record>(&self, value: T, message: &str) -> StorageResult<Stored<T>> {
        let mut batch = WriteBatch::new();
        batch.insert(&value)?;
        let applied = self.apply(batch, message)?;
        applied.into_stored(value)
    }

    /// write a new version of a record read earlier.
    ///
    /// fails with [`StorageError::ConcurrentModification`] when the record
    /// was written since `stored` was read.
    pub fn update<T: Record>(&self, stored: Stored<T>, message: &str) -> StorageResult<Stored<T>> {
        let mut batch = WriteBatch::new();
        batch.update(&stored)?;
        let applied = self.apply(batch, message)?;
        applied.into_stored(stored.value)
    }

    /// commit a batch of writes, all or nothing
    pub fn apply(&self, batch: WriteBatch, message: &str) -> StorageResult<Applied> {
        if batch.writes.is_empty() {
            return Err(StorageError::Internal("empty write batch".to_string()));
        }

        self.with_repo(|repo| {
            let main = BranchName::main();
            let head = RefManager::resolve_branch(repo, &main)?;
            let tree = commit::get_tree_at_commit(repo, head)?;
            let now = Utc::now();

            let mut mutator = TreeMutator::from_tree(repo, &tree)?;
            let mut written = Vec::with_capacity(batch.writes.len());

            for write in batch.writes {
                let current = match tree.get_blob_id(repo, write.collection, &write.key)? {
                    Some(blob_id) => {
                        let bytes = record::read_blob(repo, blob_id)?;
                        Some(record::decode_meta(&bytes, write.collection, &write.key)?)
                    }
                    None => None,
                };

                let meta = match (write.expected, current) {
                    (None, None) => RecordMeta {
                        id: write.key.to_string(),
                        version: 1,
                        created_at: now,
                        updated_at: now,
                    },
                    (None, Some(_)) => {
                        return Err(StorageError::RecordAlreadyExists {
                            collection: write.collection,
                            key: write.key,
                        })
                    }
                    (Some(_), None) => {
                        return Err(StorageError::RecordNotFound {
                            collection: write.collection,
                            key: write.key,
                        })
                    }
                    (Some(expected), Some(current)) if expected != current.version => {
                        warn!(
                            collection = %write.collection,
                            key = %write.key,
                            expected,
                            found = current.version,
                            "rejected stale write"
                        );
                        return Err(StorageError::ConcurrentModification {
                            collection: write.collection,
                            key: write.key,
                            expected,
                            found: current.version,
                        });
                    }
                    (Some(_), Some(current)) => RecordMeta {
                        id: current.id,
                        version: current.version + 1,
                        created_at: current.created_at,
                        updated_at: now,
                    },
                };

                let bytes = record::encode(meta.clone(), write.value)?;
                let blob_id = record::write_blob(repo, &bytes)?;
                mutator.upsert(write.collection, &write.key, blob_id)?;
                written.push((write.key, meta));
            }

            let new_tree = mutator.write()?;
            let commit_id = CommitBuilder::new(repo)
                .tree(new_tree)
                .parent(head)
                .message(message)
                .signature(self.signature.clone())
                .commit()?;
            RefManager::update_branch_if_unchanged(repo, &main, head, commit_id)?;

            debug!(commit = %commit_id.short(), records = written.len(), "{}", message);
            Ok(Applied {
                commit: commit_id,
                written,
            })
        })
    }

    /// commits on `main`, newest first
    pub fn history(&self, limit: Option<usize>) -> StorageResult<Vec<CommitInfo>> {
        self.with_repo(|repo| {
            let head = RefManager::resolve_branch(repo, &BranchName::main())?;
            let iter = commit::history(repo, head)?;
            match limit {
                Some(n) => iter.take(n).collect(),
                None => iter.collect(),
            }
        })
    }

    /// commits that changed one record, newest first
    pub fn record_history(
        &self,
        collection: Collection,
        key: &RecordKey,
        limit: Option<usize>,
    ) -> StorageResult<Vec<CommitInfo>> {
        let path = PathBuf::from(collection.record_path(key));

        self.with_repo(|repo| {
            let head = RefManager::resolve_branch(repo, &BranchName::main())?;
            let mut commits = Vec::new();

            for info in commit::history(repo, head)? {
                let info = info?;
                if commit::changes_path(repo, &info, &path)? {
                    commits.push(info);
                    if limit.is_some_and(|n| commits.len() >= n) {
                        break;
                    }
                }
            }

            Ok(commits)
        })
    }
}

struct PendingWrite {
    collection: Collection,
    key: RecordKey,
    /// version the caller read; `None` for a new record
    expected: Option<u64>,
    value: serde_json::Value,
}

/// record writes that land in one commit
#[derive(Default)]
pub struct WriteBatch {
    writes: Vec<PendingWrite>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Record>(&mut self, value: &T) -> StorageResult<()> {
        self.writes.push(PendingWrite {
            collection: T::COLLECTION,
            key: value.key().clone(),
            expected: None,
            value: serde_json::to_value(value)?,
        });
        Ok(())
    }

    pub fn update<T: Record>(&mut self, stored: &Stored<T>) -> StorageResult<()> {
        if stored.value.key() != &stored.key {
            return Err(StorageError::Internal(format!(
                "record key changed from {} to {}",
                stored.key,
                stored.value.key()
            )));
        }

        self.writes.push(PendingWrite {
            collection: T::COLLECTION,
            key: stored.key.clone(),
            expected: Some(stored.version),
            value: serde_json::to_value(&stored.value)?,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// outcome of a committed batch
#[derive(Debug, Clone)]
pub struct Applied {
    pub commit: CommitId,
    written: Vec<(RecordKey, RecordMeta)>,
}

impl Applied {
    /// wrap a written value with the metadata the batch gave it
    pub fn stored<T: Record>(&self, value: T) -> StorageResult<Stored<T>> {
        let (key, meta) = self
            .written
            .iter()
            .find(|(k, _)| k == value.key())
            .ok_or_else(|| StorageError::Internal(format!("{} was not part of the batch", value.key())))?;

        Ok(Stored {
            key: key.clone(),
            version: meta.version,
            created_at: meta.created_at,
            updated_at: meta.updated_at,
            value,
        })
    }

    fn into_stored<T: Record>(self, value: T) -> StorageResult<Stored<T>> {
        self.stored(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        id: RecordKey,
        label: String,
    }

    impl Record for Item {
        const COLLECTION: Collection = Collection::Tables;

        fn key(&self) -> &RecordKey {
            &self.id
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Secret {
        id: RecordKey,
    }

    impl Record for Secret {
        const COLLECTION: Collection = Collection::Credentials;

        fn key(&self) -> &RecordKey {
            &self.id
        }
    }

    fn setup() -> (TempDir, WarehouseStore) {
        let dir = TempDir::new().unwrap();
        let store = WarehouseStore::init(dir.path()).unwrap();
        (dir, store)
    }

    fn item(label: &str) -> Item {
        Item {
            id: RecordKey::generate(),
            label: label.to_string(),
        }
    }

    #[test]
    fn test_init_and_open() {
        let dir = TempDir::new().unwrap();
        let store = WarehouseStore::init(dir.path()).unwrap();
        let head1 = store.head().unwrap();
        drop(store);

        let store = WarehouseStore::open_or_init(dir.path()).unwrap();
        assert_eq!(store.head().unwrap(), head1);
    }

    #[test]
    fn test_open_missing_repository() {
        let dir = TempDir::new().unwrap();
        let result = WarehouseStore::open(dir.path().join("nope"));
        assert!(matches!(result, Err(StorageError::NotInitialized(_))));
    }

    #[test]
    fn test_insert_get_update() {
        let (_dir, store) = setup();
        let stored = store.insert(item("first"), "insert").unwrap();
        assert_eq!(stored.version, 1);

        let mut read: Stored<Item> = store.load(&stored.key).unwrap();
        assert_eq!(read.value, stored.value);
        assert_eq!(read.version, 1);

        read.label = "second".to_string();
        let updated = store.update(read, "update").unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(updated.created_at, stored.created_at);

        let read: Stored<Item> = store.load(&stored.key).unwrap();
        assert_eq!(read.label, "second");
        assert_eq!(read.version, 2);
    }

    #[test]
    fn test_insert_duplicate_fails() {
        let (_dir, store) = setup();
        let value = item("x");
        store.insert(value.clone(), "insert").unwrap();

        let result = store.insert(value, "insert again");
        assert!(matches!(result, Err(StorageError::RecordAlreadyExists { .. })));
    }

    #[test]
    fn test_stale_update_is_rejected() {
        let (_dir, store) = setup();
        let stored = store.insert(item("x"), "insert").unwrap();

        let mut first: Stored<Item> = store.load(&stored.key).unwrap();
        let mut second: Stored<Item> = store.load(&stored.key).unwrap();

        first.label = "first writer".to_string();
        store.update(first, "first").unwrap();

        second.label = "second writer".to_string();
        let result = store.update(second, "second");
        assert!(matches!(
            result,
            Err(StorageError::ConcurrentModification { expected: 1, found: 2, .. })
        ));

        let read: Stored<Item> = store.load(&stored.key).unwrap();
        assert_eq!(read.label, "first writer");
    }

    #[test]
    fn test_batch_is_one_commit() {
        let (_dir, store) = setup();
        let before = store.history(None).unwrap().len();

        let a = item("a");
        let s = Secret { id: RecordKey::generate() };
        let mut batch = WriteBatch::new();
        batch.insert(&a).unwrap();
        batch.insert(&s).unwrap();
        let applied = store.apply(batch, "both").unwrap();

        assert_eq!(store.history(None).unwrap().len(), before + 1);
        assert_eq!(applied.stored(a.clone()).unwrap().version, 1);
        assert!(store.get::<Secret>(&s.id).unwrap().is_some());
        assert!(store.get::<Item>(&a.id).unwrap().is_some());
    }

    #[test]
    fn test_failed_batch_writes_nothing() {
        let (_dir, store) = setup();
        let existing = store.insert(item("x"), "insert").unwrap();
        let head = store.head().unwrap();

        let fresh = item("fresh");
        let mut batch = WriteBatch::new();
        batch.insert(&fresh).unwrap();
        batch.insert(&existing.value).unwrap();

        assert!(store.apply(batch, "conflicting").is_err());
        assert_eq!(store.head().unwrap(), head);
        assert!(store.get::<Item>(&fresh.id).unwrap().is_none());
    }

    #[test]
    fn test_scan() {
        let (_dir, store) = setup();
        for i in 0..3 {
            store.insert(item(&format!("item{}", i)), "insert").unwrap();
        }
        store.insert(Secret { id: RecordKey::generate() }, "secret").unwrap();

        assert_eq!(store.scan::<Item>().unwrap().len(), 3);
        assert_eq!(store.scan::<Secret>().unwrap().len(), 1);
    }

    #[test]
    fn test_record_history() {
        let (_dir, store) = setup();
        let a = store.insert(item("a"), "insert a").unwrap();
        store.insert(item("b"), "insert b").unwrap();
        let mut a = a;
        a.label = "a2".to_string();
        store.update(a.clone(), "update a").unwrap();

        let commits = store.record_history(Collection::Tables, &a.key, None).unwrap();
        let messages: Vec<_> = commits.iter().map(|c| c.summary()).collect();
        assert_eq!(messages, vec!["update a", "insert a"]);

        let limited = store.record_history(Collection::Tables, &a.key, Some(1)).unwrap();
        assert_eq!(limited.len(), 1);
    }
}
