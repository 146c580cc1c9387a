use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::StoreError;
use crate::store::KvStore;

/// Process-local implementation of [`KvStore`].
///
/// The map lives in memory; [`save`](KvStore::save) and [`load`](KvStore::load)
/// are the only points of disk I/O. The snapshot is a single JSON object that
/// maps every key to its JSON-string value.
#[derive(Debug, Clone, Default)]
pub struct LocalKvStore {
    inner: Arc<RwLock<HashMap<String, String>>>,
    snapshot_path: Option<PathBuf>,
}

impl LocalKvStore {
    /// A store that snapshots to `path`. Nothing is read until `load` is called.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::default(),
            snapshot_path: Some(path.into()),
        }
    }

    /// A store without a snapshot file; `save`/`load` fail with `PathNotConfigured`.
    pub fn in_memory() -> Self {
        Self::default()
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot_path.as_deref()
    }

    fn require_path(&self) -> Result<&Path, StoreError> {
        self.snapshot_path
            .as_deref()
            .ok_or(StoreError::PathNotConfigured)
    }
}

#[async_trait]
impl KvStore for LocalKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let guard = self.inner.read().await;
        let value = guard.get(key).cloned();
        if value.is_none() {
            debug!(key, "key not found");
        }
        Ok(value)
    }

    async fn get_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn put_raw(&self, key: &str, value: String) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;
        guard.remove(key);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: String,
    ) -> Result<bool, StoreError> {
        let mut guard = self.inner.write().await;
        if guard.get(key).map(String::as_str) != expected {
            return Ok(false);
        }
        guard.insert(key.to_string(), new);
        Ok(true)
    }

    async fn save(&self) -> Result<(), StoreError> {
        let path = self.require_path()?;

        // Keys are written in sorted order.
        let snapshot: BTreeMap<String, String> = {
            let guard = self.inner.read().await;
            guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        let mut bytes = serde_json::to_vec(&snapshot)?;
        bytes.push(b'\n');

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        tokio::fs::write(path, bytes)
            .await
            .map_err(|e| io_error(path, e))?;

        debug!(path = %path.display(), entries = snapshot.len(), "saved key-value snapshot");
        Ok(())
    }

    async fn load(&self) -> Result<(), StoreError> {
        let path = self.require_path()?;

        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::SnapshotMissing(path.display().to_string()));
            }
            Err(e) => return Err(io_error(path, e)),
        };
        let snapshot: HashMap<String, String> = serde_json::from_slice(&bytes)?;
        let entries = snapshot.len();

        let mut guard = self.inner.write().await;
        guard.extend(snapshot);

        debug!(path = %path.display(), entries, "loaded key-value snapshot");
        Ok(())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        id: String,
        providers: Vec<String>,
    }

    fn record(id: &str) -> Record {
        Record {
            id: id.to_string(),
            providers: vec!["aws".into(), "gcp".into()],
        }
    }

    #[tokio::test]
    async fn put_and_get_raw_json() {
        let store: Arc<dyn KvStore> = Arc::new(LocalKvStore::in_memory());
        store.put("/tr/a", &record("a")).await.unwrap();

        let raw = store.get("/tr/a").await.unwrap().unwrap();
        assert_eq!(raw, r#"{"id":"a","providers":["aws","gcp"]}"#);

        let decoded: Record = store.get_json("/tr/a").await.unwrap().unwrap();
        assert_eq!(decoded, record("a"));
    }

    #[tokio::test]
    async fn put_overwrites() {
        let store: Arc<dyn KvStore> = Arc::new(LocalKvStore::in_memory());
        store.put("k", "first").await.unwrap();
        store.put("k", "second").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("\"second\""));
    }

    #[tokio::test]
    async fn missing_key_is_none() {
        let store = LocalKvStore::in_memory();
        assert!(store.get("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn prefix_scan() {
        let store: Arc<dyn KvStore> = Arc::new(LocalKvStore::in_memory());
        store.put("/tr/a", "A").await.unwrap();
        store.put("/tr/b", "B").await.unwrap();
        store.put("/other/c", "C").await.unwrap();

        let mut values = store.get_with_prefix("/tr/").await.unwrap();
        values.sort();
        assert_eq!(values, vec!["\"A\"", "\"B\""]);

        assert!(store.get_with_prefix("/none/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store: Arc<dyn KvStore> = Arc::new(LocalKvStore::in_memory());
        store.put("k", "v").await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn compare_and_swap_checks_current_value() {
        let store = LocalKvStore::in_memory();
        assert!(store.compare_and_swap("k", None, "1".into()).await.unwrap());
        assert!(!store.compare_and_swap("k", None, "2".into()).await.unwrap());
        assert!(!store.compare_and_swap("k", Some("0"), "2".into()).await.unwrap());
        assert!(store.compare_and_swap("k", Some("1"), "2".into()).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn concurrent_compare_and_swap_has_single_winner() {
        let store = LocalKvStore::in_memory();
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.compare_and_swap("slot", None, i.to_string()).await.unwrap()
            }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn snapshot_survives_restart() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/.lkvstore/lkvstore.db");

        {
            let store: Arc<dyn KvStore> = Arc::new(LocalKvStore::new(&path));
            store.put("/tr/a", &record("a")).await.unwrap();
            store.put("/tr/a/status", "Success").await.unwrap();
            store.save().await.unwrap();
        }

        let store: Arc<dyn KvStore> = Arc::new(LocalKvStore::new(&path));
        store.load().await.unwrap();
        let decoded: Record = store.get_json("/tr/a").await.unwrap().unwrap();
        assert_eq!(decoded, record("a"));
        assert_eq!(
            store.get("/tr/a/status").await.unwrap().as_deref(),
            Some("\"Success\"")
        );
        assert!(store.get("/tr/unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn snapshot_is_flat_json_object_of_strings() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lkvstore.db");
        let store: Arc<dyn KvStore> = Arc::new(LocalKvStore::new(&path));
        store.put("/tr/b", "B").await.unwrap();
        store.put("/tr/a", &1).await.unwrap();
        store.save().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "{\"/tr/a\":\"1\",\"/tr/b\":\"\\\"B\\\"\"}\n");
    }

    #[tokio::test]
    async fn load_merges_into_existing_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lkvstore.db");
        std::fs::write(&path, r#"{"/tr/a":"\"A\""}"#).unwrap();

        let store = LocalKvStore::new(&path);
        store.put_raw("/tr/b", "\"B\"".into()).await.unwrap();
        store.load().await.unwrap();

        assert!(store.get("/tr/a").await.unwrap().is_some());
        assert!(store.get("/tr/b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn load_missing_file_is_distinct() {
        let dir = TempDir::new().unwrap();
        let store = LocalKvStore::new(dir.path().join("absent.db"));
        assert!(matches!(
            store.load().await,
            Err(StoreError::SnapshotMissing(_))
        ));
    }

    #[tokio::test]
    async fn load_corrupt_file_is_a_serialization_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lkvstore.db");
        std::fs::write(&path, "not json").unwrap();
        let store = LocalKvStore::new(&path);
        assert!(matches!(
            store.load().await,
            Err(StoreError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn in_memory_store_cannot_snapshot() {
        let store = LocalKvStore::in_memory();
        assert!(matches!(store.save().await, Err(StoreError::PathNotConfigured)));
        assert!(matches!(store.load().await, Err(StoreError::PathNotConfigured)));
    }
}
