//! git-backed record store.
//!
//! tables and credentials live as JSON blobs in a git repository, one
//! directory per collection and one commit per write. The rest of the crate
//! uses this API and never touches git2 directly.
//!
//! ```text
//! <repo>/
//!   tables/{id}.json
//!   credentials/{id}.json
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use lakecat::store::WarehouseStore;
//!
//! let store = WarehouseStore::open_or_init("./catalog")?;
//! let stored = store.insert(table, "[CREATE TABLE] events")?;
//!
//! let mut stored = store.load::<Table>(&stored.key)?;
//! stored.row_count = Some(10);
//! store.update(stored, "[UPDATE TABLE] events")?;
//! ```

mod commit;
mod error;
mod record;
mod refs;
mod repository;
mod tree;
mod types;

pub use commit::{CommitInfo, CommitMessage};
pub use error::{StorageError, StorageResult};
pub use record::{Record, Stored};
pub use repository::{Applied, WarehouseStore, WriteBatch};
pub use types::{BlobId, BranchName, Collection, CommitId, GitSignature, InvalidKeyError, RecordKey, TreeId};
