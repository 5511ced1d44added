//! Blob storage capability.

use async_trait::async_trait;
use std::path::Path;

use crate::error::StorageResult;

/// Archives local files in remote object storage.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Upload `local_path` under `destination_key` and return its URL.
    async fn upload(&self, local_path: &Path, destination_key: &str) -> StorageResult<String>;
}
