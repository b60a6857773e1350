//! Durable key-value storage used for confirmed assignments and rule occurrences.
//!
//! [`DurableStore`] is an opaque collaborator: the crate only needs key stability and overwrite
//! semantics from it. [`InMemoryStore`] is useful for tests and ephemeral sessions, [`FileStore`]
//! persists every key as a JSON document in a directory so that values survive process restarts.
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::AsyncWriteExt;

use crate::{Error, Result};

/// Storage key for the confirmed experiment → variant map.
pub(crate) const CONFIRMED_ASSIGNMENTS_KEY: &str = "confirmed_assignments";
/// Storage key for recorded trigger rule occurrences.
pub(crate) const TRIGGER_RULE_OCCURRENCES_KEY: &str = "trigger_rule_occurrences";

/// A durable key-value store.
///
/// Writes must be durable by the time the returned future resolves. Implementations must not
/// block the async executor (use async I/O or move blocking work off the executor).
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Read value stored under `key`. Returns `None` if nothing was stored.
    async fn read(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn write(&self, key: &str, value: serde_json::Value) -> Result<()>;

    /// Remove value stored under `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;
}

/// Read and deserialize a typed value.
pub(crate) async fn read_typed<T: DeserializeOwned>(
    store: &dyn DurableStore,
    key: &str,
) -> Result<Option<T>> {
    let Some(value) = store.read(key).await? else {
        return Ok(None);
    };
    serde_json::from_value(value)
        .map(Some)
        .map_err(|err| Error::Serialization {
            key: key.to_owned(),
            source: Arc::new(err),
        })
}

/// Serialize `value` and write it on a separate task.
///
/// The write runs to completion even if the caller's future is dropped; awaiting the returned
/// result is the completion signal.
pub(crate) async fn write_typed<T: Serialize>(
    store: &Arc<dyn DurableStore>,
    key: &'static str,
    value: &T,
) -> Result<()> {
    let value = serde_json::to_value(value).map_err(|err| Error::Serialization {
        key: key.to_owned(),
        source: Arc::new(err),
    })?;

    let store = Arc::clone(store);
    tokio::spawn(async move { store.write(key, value).await })
        .await
        .map_err(|_| Error::StoreTaskFailed)?
}

/// Remove `key` on a separate task. See [`write_typed`].
pub(crate) async fn remove_detached(
    store: &Arc<dyn DurableStore>,
    key: &'static str,
) -> Result<()> {
    let store = Arc::clone(store);
    tokio::spawn(async move { store.remove(key).await })
        .await
        .map_err(|_| Error::StoreTaskFailed)?
}

/// A non-persistent [`DurableStore`] that keeps all values in memory.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    values: RwLock<HashMap<String, serde_json::Value>>,
}

impl InMemoryStore {
    /// Create a new empty store.
    pub fn new() -> InMemoryStore {
        InMemoryStore::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.values.read().map(|values| values.len()).unwrap_or(0)
    }

    /// Returns `true` if no keys are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DurableStore for InMemoryStore {
    async fn read(&self, key: &str) -> Result<Option<serde_json::Value>> {
        // Err() is only possible if a writer panicked while holding the lock. Treat it as an
        // empty store rather than crashing the app.
        Ok(self
            .values
            .read()
            .ok()
            .and_then(|values| values.get(key).cloned()))
    }

    async fn write(&self, key: &str, value: serde_json::Value) -> Result<()> {
        if let Ok(mut values) = self.values.write() {
            values.insert(key.to_owned(), value);
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        if let Ok(mut values) = self.values.write() {
            values.remove(key);
        }
        Ok(())
    }
}

/// A [`DurableStore`] that keeps one JSON file per key in a directory.
///
/// Writes go to a temporary file first, which is synced to disk and then renamed over the target,
/// so a crash in the middle of a write leaves the previous value intact.
#[derive(Debug, Clone)]
pub struct FileStore {
    directory: PathBuf,
}

impl FileStore {
    /// Open a store rooted at `directory`, creating the directory if needed.
    pub async fn open(directory: impl AsRef<Path>) -> Result<FileStore> {
        let directory = directory.as_ref().to_owned();
        tokio::fs::create_dir_all(&directory).await?;
        Ok(FileStore { directory })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{key}.json"))
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn read(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let bytes = match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| Error::Serialization {
                key: key.to_owned(),
                source: Arc::new(err),
            })
    }

    async fn write(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let bytes = serde_json::to_vec(&value).map_err(|err| Error::Serialization {
            key: key.to_owned(),
            source: Arc::new(err),
        })?;
        let target = self.path_for(key);
        let temp = self.directory.join(format!(".{key}.json.tmp"));
        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp, &target).await?;
        log::trace!(target: "paywall", key; "persisted value");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::{read_typed, write_typed, DurableStore, FileStore, InMemoryStore};

    #[tokio::test]
    async fn in_memory_store_overwrites_and_removes() {
        let store = InMemoryStore::new();
        store.write("key", json!(1)).await.unwrap();
        store.write("key", json!(2)).await.unwrap();
        assert_eq!(store.read("key").await.unwrap(), Some(json!(2)));
        assert_eq!(store.len(), 1);

        store.remove("key").await.unwrap();
        store.remove("key").await.unwrap();
        assert_eq!(store.read("key").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store: Arc<dyn DurableStore> = Arc::new(FileStore::open(dir.path()).await.unwrap());
            write_typed(&store, "answer", &vec!["a".to_owned(), "b".to_owned()])
                .await
                .unwrap();
        }

        let reopened = FileStore::open(dir.path()).await.unwrap();
        let value: Option<Vec<String>> = read_typed(&reopened, "answer").await.unwrap();
        assert_eq!(value, Some(vec!["a".to_owned(), "b".to_owned()]));
    }

    #[tokio::test]
    async fn file_store_overwrite_leaves_no_temporary_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        store.write("key", json!({"v": 1})).await.unwrap();
        store.write("key", json!({"v": 2})).await.unwrap();

        assert_eq!(store.read("key").await.unwrap(), Some(json!({"v": 2})));
        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(files, vec![std::ffi::OsString::from("key.json")]);
    }

    #[tokio::test]
    async fn file_store_reads_missing_key_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(store.read("missing").await.unwrap(), None);
        store.remove("missing").await.unwrap();
    }

    #[tokio::test]
    async fn typed_read_reports_mismatched_value() {
        let store = InMemoryStore::new();
        store.write("key", json!("not a number")).await.unwrap();
        let result: crate::Result<Option<u64>> = read_typed(&store, "key").await;
        assert!(matches!(result, Err(crate::Error::Serialization { .. })));
    }
}
