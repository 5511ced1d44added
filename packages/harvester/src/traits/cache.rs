//! Key-value cache trait.
//!
//! Values are addressed by a namespace (usually a stage name) and a company
//! key. The cache is schema-agnostic: it stores and returns JSON values and
//! leaves typing to [`crate::cache`].

use async_trait::async_trait;
use serde_json::Value;

use crate::error::CacheResult;

/// Durable mapping from (namespace, key) to a JSON value.
///
/// Implementations must tolerate concurrent writes to distinct keys.
/// Writes to the same key are last-writer-wins.
#[async_trait]
pub trait StageCache: Send + Sync {
    /// Get the value stored under `(namespace, key)`.
    async fn get(&self, namespace: &str, key: &str) -> CacheResult<Option<Value>>;

    /// Store a value, overwriting any previous one.
    async fn put(&self, namespace: &str, key: &str, value: &Value) -> CacheResult<()>;

    /// Whether a value exists under `(namespace, key)`.
    async fn contains(&self, namespace: &str, key: &str) -> CacheResult<bool> {
        Ok(self.get(namespace, key).await?.is_some())
    }

    /// Remove a value. Removing an absent key is not an error.
    async fn delete(&self, namespace: &str, key: &str) -> CacheResult<()>;

    /// All keys in a namespace, sorted.
    async fn keys(&self, namespace: &str) -> CacheResult<Vec<String>>;
}
