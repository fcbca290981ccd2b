//! Generic async key-value store backing mempool and reputation state
//!
//! The store is the single source of truth; no in-memory cache above it is
//! authoritative across restarts. Only the in-memory backend ships here,
//! persistent backends implement the same trait.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;

/// Store backend error
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {inner}")]
    Backend {
        /// The inner error message
        inner: String,
    },
    #[error("stored value can't be deserialized: {inner}")]
    Codec {
        /// The inner error message
        inner: String,
    },
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Codec { inner: err.to_string() }
    }
}

/// Async key-value store
#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError>;

    async fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Fetches many keys at once, preserving order; missing keys yield `None`
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StoreError> {
        let mut res = Vec::with_capacity(keys.len());
        for key in keys {
            res.push(self.get(key).await?);
        }
        Ok(res)
    }
}

/// Serialization helpers over raw store bytes
#[async_trait]
pub trait StoreExt: Store {
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        match self.get(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put_json<T: serde::Serialize + Sync>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        self.put(key, serde_json::to_vec(value)?).await
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

/// In-memory store backend
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StoreError> {
        self.inner.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.inner.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_del_round_trip() {
        let store = MemoryStore::new();
        store.put("a", vec![1, 2, 3]).await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(vec![1, 2, 3]));

        store.del("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        // deleting again is a no-op
        store.del("a").await.unwrap();
    }

    #[tokio::test]
    async fn get_many_preserves_order_and_misses() {
        let store = MemoryStore::new();
        store.put("a", vec![1]).await.unwrap();
        store.put("c", vec![3]).await.unwrap();

        let res = store
            .get_many(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .unwrap();
        assert_eq!(res, vec![Some(vec![1]), None, Some(vec![3])]);
    }

    #[tokio::test]
    async fn json_helpers_round_trip() {
        let store = MemoryStore::new();
        store.put_json("nums", &vec![1u64, 2, 3]).await.unwrap();
        let res: Option<Vec<u64>> = store.get_json("nums").await.unwrap();
        assert_eq!(res, Some(vec![1, 2, 3]));
    }
}
