//! In-memory cache implementation for testing and development.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::CacheResult;
use crate::traits::cache::StageCache;

/// In-memory cache keyed by `(namespace, key)`.
///
/// Useful for testing and one-off runs. Data is lost on restart.
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<(String, String), Value>>,
}

impl MemoryCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values across all namespaces.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Clear all stored data.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[async_trait]
impl StageCache for MemoryCache {
    async fn get(&self, namespace: &str, key: &str) -> CacheResult<Option<Value>> {
        Ok(self
            .entries
            .read()
            .await
            .get(&(namespace.to_string(), key.to_string()))
            .cloned())
    }

    async fn put(&self, namespace: &str, key: &str, value: &Value) -> CacheResult<()> {
        self.entries
            .write()
            .await
            .insert((namespace.to_string(), key.to_string()), value.clone());
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> CacheResult<()> {
        self.entries
            .write()
            .await
            .remove(&(namespace.to_string(), key.to_string()));
        Ok(())
    }

    async fn keys(&self, namespace: &str) -> CacheResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .entries
            .read()
            .await
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, key)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_put_get_overwrite() {
        let cache = MemoryCache::new();
        assert!(cache.get("find-sites", "acme").await.unwrap().is_none());

        cache.put("find-sites", "acme", &json!({"a": 1})).await.unwrap();
        cache.put("find-sites", "acme", &json!({"a": 2})).await.unwrap();

        assert_eq!(cache.get("find-sites", "acme").await.unwrap(), Some(json!({"a": 2})));
        assert!(cache.contains("find-sites", "acme").await.unwrap());
        assert!(!cache.contains("find-reports", "acme").await.unwrap());
    }

    #[tokio::test]
    async fn test_keys_are_scoped_and_sorted() {
        let cache = MemoryCache::new();
        cache.put("find-sites", "globex", &json!(1)).await.unwrap();
        cache.put("find-sites", "acme", &json!(1)).await.unwrap();
        cache.put("find-reports", "initech", &json!(1)).await.unwrap();

        assert_eq!(cache.keys("find-sites").await.unwrap(), vec!["acme", "globex"]);

        cache.delete("find-sites", "acme").await.unwrap();
        cache.delete("find-sites", "missing").await.unwrap();
        assert_eq!(cache.keys("find-sites").await.unwrap(), vec!["globex"]);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_distinct_keys() {
        let cache = Arc::new(MemoryCache::new());
        let handles: Vec<_> = (0..32)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    cache.put("find-sites", &format!("c{i}"), &json!(i)).await.unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(cache.keys("find-sites").await.unwrap().len(), 32);
    }
}
