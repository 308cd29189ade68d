//! tree operations for record collections.
//!
//! the root tree holds one directory per [`Collection`]; each directory holds
//! `{key}.json` record blobs. Trees are immutable snapshots, changes go
//! through a [`TreeMutator`] that produces a new root.

use std::collections::HashMap;

use git2::{FileMode, ObjectType, Repository, Tree, TreeBuilder as Git2TreeBuilder};

use crate::store::error::{StorageError, StorageResult};
use crate::store::types::{BlobId, Collection, RecordKey, TreeId};

/// a read only handle to the tree of one commit
#[derive(Debug)]
pub struct TreeHandle<'repo> {
    tree: Tree<'repo>,
}

impl<'repo> TreeHandle<'repo> {
    pub(crate) fn new(tree: Tree<'repo>) -> Self {
        Self { tree }
    }

    pub(crate) fn inner(&self) -> &Tree<'repo> {
        &self.tree
    }

    fn collection_tree(&self, repo: &'repo Repository, collection: Collection) -> StorageResult<Option<Tree<'repo>>> {
        match self.tree.get_name(collection.dir_name()) {
            Some(entry) => {
                if entry.kind() != Some(ObjectType::Tree) {
                    return Err(StorageError::UnexpectedEntryType {
                        path: collection.dir_name().into(),
                        expected: "tree (directory)".to_string(),
                        found: format!("{:?}", entry.kind()),
                    });
                }
                Ok(Some(repo.find_tree(entry.id())?))
            }
            None => Ok(None),
        }
    }

    /// keys of every record in a collection. A missing directory is empty.
    pub fn list_keys(&self, repo: &'repo Repository, collection: Collection) -> StorageResult<Vec<RecordKey>> {
        let tree = match self.collection_tree(repo, collection)? {
            Some(t) => t,
            None => return Ok(Vec::new()),
        };

        let keys = tree
            .iter()
            .filter_map(|entry| {
                if entry.kind() != Some(ObjectType::Blob) {
                    return None;
                }
                let key = entry.name()?.strip_suffix(".json")?;
                RecordKey::new(key).ok()
            })
            .collect();

        Ok(keys)
    }

    /// blob id of a record, if present
    pub fn get_blob_id(&self, repo: &'repo Repository, collection: Collection, key: &RecordKey) -> StorageResult<Option<BlobId>> {
        let tree = match self.collection_tree(repo, collection)? {
            Some(t) => t,
            None => return Ok(None),
        };

        let filename = format!("{}.json", key);
        let blob_id = match tree.get_name(&filename) {
            Some(entry) if entry.kind() != Some(ObjectType::Blob) => {
                return Err(StorageError::UnexpectedEntryType {
                    path: collection.record_path(key).into(),
                    expected: "blob (file)".to_string(),
                    found: format!("{:?}", entry.kind()),
                });
            }
            Some(entry) => Some(BlobId::new(entry.id())),
            None => None,
        };
        Ok(blob_id)
    }
}

/// accumulates record writes and produces a new root tree.
///
/// the tree it was created from is left untouched.
pub struct TreeMutator<'repo> {
    repo: &'repo Repository,
    root_builder: Git2TreeBuilder<'repo>,
    /// builders of collections touched so far
    modified: HashMap<Collection, Git2TreeBuilder<'repo>>,
    /// collection directories of the original tree
    original: HashMap<Collection, git2::Oid>,
}

impl<'repo> TreeMutator<'repo> {
    pub fn from_tree(repo: &'repo Repository, tree: &TreeHandle<'_>) -> StorageResult<Self> {
        let root_builder = repo.treebuilder(Some(tree.inner()))?;

        let mut original = HashMap::new();
        for collection in Collection::ALL {
            if let Some(entry) = tree.inner().get_name(collection.dir_name()) {
                if entry.kind() == Some(ObjectType::Tree) {
                    original.insert(*collection, entry.id());
                }
            }
        }

        Ok(Self {
            repo,
            root_builder,
            modified: HashMap::new(),
            original,
        })
    }

    pub fn empty(repo: &'repo Repository) -> StorageResult<Self> {
        Ok(Self {
            repo,
            root_builder: repo.treebuilder(None)?,
            modified: HashMap::new(),
            original: HashMap::new(),
        })
    }

    fn collection_builder(&mut self, collection: Collection) -> StorageResult<&mut Git2TreeBuilder<'repo>> {
        use std::collections::hash_map::Entry;

        match self.modified.entry(collection) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let builder = match self.original.get(&collection) {
                    Some(id) => {
                        let tree = self.repo.find_tree(*id)?;
                        self.repo.treebuilder(Some(&tree))?
                    }
                    None => self.repo.treebuilder(None)?,
                };
                Ok(e.insert(builder))
            }
        }
    }

    /// insert or replace a record blob
    pub fn upsert(&mut self, collection: Collection, key: &RecordKey, blob_id: BlobId) -> StorageResult<()> {
        let builder = self.collection_builder(collection)?;
        builder.insert(format!("{}.json", key), blob_id.raw(), FileMode::Blob.into())?;
        Ok(())
    }

    /// write the touched collections and return the new root tree id
    pub fn write(mut self) -> StorageResult<TreeId> {
        for (collection, builder) in self.modified {
            let id = builder.write()?;
            self.root_builder
                .insert(collection.dir_name(), id, FileMode::Tree.into())?;
        }

        let root_id = self.root_builder.write()?;
        Ok(TreeId::new(root_id))
    }
}

/// root tree with an empty directory per collection
pub fn create_initial_tree(repo: &Repository) -> StorageResult<TreeId> {
    let mut mutator = TreeMutator::empty(repo)?;
    for collection in Collection::ALL {
        mutator.collection_builder(*collection)?;
    }
    mutator.write()
}
