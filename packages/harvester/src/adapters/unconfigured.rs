//! Stand-in for a service the current run has no credentials for.

use async_trait::async_trait;
use std::path::Path;

use crate::error::{
    CrawlError, CrawlResult, GenerationError, GenerationResult, StorageError, StorageResult,
};
use crate::traits::ai::{Generator, Inference, InferenceRequest};
use crate::traits::crawler::{CrawledPage, DownloadedFile, WebCrawler};
use crate::traits::storage::BlobStorage;

/// Fails every call with a configuration error.
///
/// Lets a run build [`crate::Services`] without constructing clients for
/// services none of its stages call.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unconfigured;

const MESSAGE: &str = "service is not configured for this run";

#[async_trait]
impl WebCrawler for Unconfigured {
    async fn fetch(&self, _url: &str) -> CrawlResult<CrawledPage> {
        Err(CrawlError::Config(MESSAGE.into()))
    }

    async fn content_type(&self, _url: &str) -> CrawlResult<Option<String>> {
        Err(CrawlError::Config(MESSAGE.into()))
    }

    async fn download(
        &self,
        _url: &str,
        _destination: &Path,
        _user_agent: Option<&str>,
    ) -> CrawlResult<DownloadedFile> {
        Err(CrawlError::Config(MESSAGE.into()))
    }
}

#[async_trait]
impl Generator for Unconfigured {
    async fn infer(&self, _request: &InferenceRequest) -> GenerationResult<Inference> {
        Err(GenerationError::Config(MESSAGE.into()))
    }
}

#[async_trait]
impl BlobStorage for Unconfigured {
    async fn upload(&self, _local_path: &Path, _destination_key: &str) -> StorageResult<String> {
        Err(StorageError::Config(MESSAGE.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_call_is_a_config_error() {
        let err = Unconfigured.fetch("https://acme.com").await.unwrap_err();
        assert!(matches!(err, CrawlError::Config(_)));

        let err = Unconfigured.infer(&InferenceRequest::new(Vec::new())).await.unwrap_err();
        assert!(matches!(err, GenerationError::Config(_)));

        let err = Unconfigured.upload(Path::new("ar.pdf"), "acme/ar.pdf").await.unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
    }
}
