use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::StoreError;

/// String-keyed store of JSON-encoded values, shared by every task of the
/// process. Implementations synchronize internally.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Raw JSON string stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Every value whose key starts with `prefix`, in no particular order.
    async fn get_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Store an already-encoded JSON string, overwriting any previous value.
    async fn put_raw(&self, key: &str, value: String) -> Result<(), StoreError>;

    /// Remove `key`. Absent keys are not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Write `new` under `key` only if the current value equals `expected`
    /// (`None` meaning "absent"). Returns whether the write happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: String,
    ) -> Result<bool, StoreError>;

    /// Persist the whole map to the snapshot file.
    async fn save(&self) -> Result<(), StoreError>;

    /// Merge the snapshot file into the in-memory map.
    async fn load(&self) -> Result<(), StoreError>;
}

impl dyn KvStore {
    /// Serialize `value` to JSON and store it under `key`.
    pub async fn put<T>(&self, key: &str, value: &T) -> Result<(), StoreError>
    where
        T: Serialize + ?Sized,
    {
        let encoded = serde_json::to_string(value)?;
        self.put_raw(key, encoded).await
    }

    /// Read and decode the value under `key`.
    pub async fn get_json<T>(&self, key: &str) -> Result<Option<T>, StoreError>
    where
        T: DeserializeOwned,
    {
        match self.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}
