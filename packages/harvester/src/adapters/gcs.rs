//! Blob storage over `object_store`.
//!
//! Production runs use Google Cloud Storage; tests plug in
//! `object_store::memory::InMemory`.

use async_trait::async_trait;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload, RetryConfig};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::error::{StorageError, StorageResult};
use crate::traits::storage::BlobStorage;

/// Uploads report files to a bucket.
pub struct ObjectStoreBlobStorage {
    store: Arc<dyn ObjectStore>,
    public_base_url: String,
}

impl ObjectStoreBlobStorage {
    /// Wrap any object store; returned URLs are `{public_base_url}/{key}`.
    pub fn new(store: Arc<dyn ObjectStore>, public_base_url: impl Into<String>) -> Self {
        Self {
            store,
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Google Cloud Storage with a service-account key file.
    pub fn gcs(bucket: &str, credentials_path: &Path) -> StorageResult<Self> {
        if !credentials_path.exists() {
            return Err(StorageError::Config(format!(
                "credentials not found at {}",
                credentials_path.display()
            )));
        }

        debug!(bucket, "Constructing GCS store with service account file");
        let store = GoogleCloudStorageBuilder::from_env()
            .with_bucket_name(bucket)
            .with_service_account_path(credentials_path.to_string_lossy())
            .with_retry(RetryConfig::default())
            .build()?;

        Ok(Self::new(
            Arc::new(store),
            format!("https://storage.cloud.google.com/{}", bucket),
        ))
    }

    /// Create from `GOOGLE_STORAGE_BUCKET_NAME` and `GOOGLE_CREDENTIALS_PATH`.
    pub fn gcs_from_env() -> StorageResult<Self> {
        let bucket = std::env::var("GOOGLE_STORAGE_BUCKET_NAME")
            .map_err(|_| StorageError::Config("GOOGLE_STORAGE_BUCKET_NAME not set".into()))?;
        let credentials = std::env::var("GOOGLE_CREDENTIALS_PATH")
            .map_err(|_| StorageError::Config("GOOGLE_CREDENTIALS_PATH not set".into()))?;
        Self::gcs(&bucket, Path::new(&credentials))
    }
}

#[async_trait]
impl BlobStorage for ObjectStoreBlobStorage {
    async fn upload(&self, local_path: &Path, destination_key: &str) -> StorageResult<String> {
        let bytes = tokio::fs::read(local_path)
            .await
            .map_err(|source| StorageError::Read {
                path: local_path.display().to_string(),
                source,
            })?;

        let size = bytes.len();
        let location = ObjectPath::from(destination_key);
        self.store.put(&location, PutPayload::from(bytes)).await?;

        debug!(key = destination_key, bytes = size, "Uploaded blob");
        Ok(format!("{}/{}", self.public_base_url, location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    #[tokio::test]
    async fn test_upload_returns_public_url() {
        let store = Arc::new(InMemory::new());
        let storage = ObjectStoreBlobStorage::new(store.clone(), "https://storage.cloud.google.com/reports/");

        let path = std::env::temp_dir().join(format!("acme-{}.pdf", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"%PDF-1.7").unwrap();

        let url = storage.upload(&path, "acme_2024.pdf").await.unwrap();
        assert_eq!(url, "https://storage.cloud.google.com/reports/acme_2024.pdf");

        let stored = store.get(&ObjectPath::from("acme_2024.pdf")).await.unwrap();
        assert_eq!(stored.bytes().await.unwrap().as_ref(), b"%PDF-1.7");

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_is_read_error() {
        let storage = ObjectStoreBlobStorage::new(Arc::new(InMemory::new()), "https://example.com");
        let err = storage
            .upload(Path::new("/nonexistent/report.pdf"), "report.pdf")
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Read { .. }));
    }

    #[test]
    fn test_gcs_requires_credentials_file() {
        let result = ObjectStoreBlobStorage::gcs("reports", Path::new("/nonexistent/key.json"));
        assert!(matches!(result, Err(StorageError::Config(_))));
    }
}
