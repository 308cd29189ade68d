//! record blobs.
//!
//! every record is one pretty-printed JSON file. Store metadata sits beside
//! the record's own fields under `_` prefixed keys:
//!
//! ```text
//! {
//!   "_id": "01j9...",
//!   "_version": 3,
//!   "_created_at": "2024-05-01T10:00:00Z",
//!   "_updated_at": "2024-05-02T08:30:00Z",
//!   "id": "01j9...",
//!   "name": "events",
//!   ...
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::store::error::{StorageError, StorageResult};
use crate::store::types::{BlobId, Collection, RecordKey};

/// a value kept in one of the store's collections
pub trait Record: Serialize + DeserializeOwned {
    const COLLECTION: Collection;

    fn key(&self) -> &RecordKey;
}

/// a record as last committed, with its store metadata
#[derive(Debug, Clone, PartialEq)]
pub struct Stored<T> {
    pub key: RecordKey,
    /// starts at 1 and grows by one on every write
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub value: T,
}

impl<T> Stored<T> {
    pub fn into_value(self) -> T {
        self.value
    }
}

impl<T> std::ops::Deref for Stored<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> std::ops::DerefMut for Stored<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

/// store metadata of a record blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct RecordMeta {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_version")]
    pub version: u64,
    #[serde(rename = "_created_at")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "_updated_at")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct RecordJson {
    #[serde(flatten)]
    meta: RecordMeta,
    #[serde(flatten)]
    data: Map<String, Value>,
}

/// serialize a record value with its metadata
pub(crate) fn encode(meta: RecordMeta, value: Value) -> StorageResult<Vec<u8>> {
    let data = match value {
        Value::Object(map) => map,
        other => {
            return Err(StorageError::Internal(format!(
                "record must serialize to a JSON object, got {}",
                other
            )))
        }
    };

    let json = RecordJson { meta, data };
    Ok(serde_json::to_vec_pretty(&json)?)
}

/// read only the metadata of a record blob
pub(crate) fn decode_meta(bytes: &[u8], collection: Collection, expected_key: &RecordKey) -> StorageResult<RecordMeta> {
    let meta: RecordMeta = serde_json::from_slice(bytes)?;
    check_key(&meta, collection, expected_key)?;
    Ok(meta)
}

/// deserialize a record blob
///
/// the `_id` in the content must match the file name it was read from
pub(crate) fn decode<T: Record>(bytes: &[u8], expected_key: &RecordKey) -> StorageResult<Stored<T>> {
    let json: RecordJson = serde_json::from_slice(bytes)?;
    check_key(&json.meta, T::COLLECTION, expected_key)?;

    let value: T = serde_json::from_value(Value::Object(json.data))?;
    Ok(Stored {
        key: expected_key.clone(),
        version: json.meta.version,
        created_at: json.meta.created_at,
        updated_at: json.meta.updated_at,
        value,
    })
}

fn check_key(meta: &RecordMeta, collection: Collection, expected_key: &RecordKey) -> StorageResult<()> {
    if meta.id != expected_key.as_str() {
        return Err(StorageError::CorruptedData {
            path: collection.record_path(expected_key).into(),
            reason: format!(
                "key mismatch: file name suggests '{}' but content has '{}'",
                expected_key, meta.id
            ),
        });
    }
    Ok(())
}

pub(crate) fn write_blob(repo: &git2::Repository, bytes: &[u8]) -> StorageResult<BlobId> {
    let oid = repo.blob(bytes)?;
    Ok(BlobId::new(oid))
}

pub(crate) fn read_blob(repo: &git2::Repository, blob_id: BlobId) -> StorageResult<Vec<u8>> {
    let blob = repo.find_blob(blob_id.raw())?;
    Ok(blob.content().to_vec())
}
