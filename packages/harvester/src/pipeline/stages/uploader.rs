//! upload-reports: archive downloaded reports in blob storage.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{StageError, StageResult};
use crate::pipeline::runner::{StageOutput, StageWorker};
use crate::traits::storage::BlobStorage;
use crate::types::company::CompanyRecord;
use crate::types::report::{DownloadedReport, StoredReport};
use crate::types::stage::Stage;

/// Uploads each downloaded file under its file name.
pub struct ReportUploader {
    storage: Arc<dyn BlobStorage>,
}

impl ReportUploader {
    pub fn new(storage: Arc<dyn BlobStorage>) -> Self {
        Self { storage }
    }

    async fn upload(&self, download: &DownloadedReport) -> StageResult<StoredReport> {
        let key = download
            .local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| StageError::Invalid(format!("no file name in {}", download.local_path.display())))?;

        let remote_url = self.storage.upload(&download.local_path, key).await?;
        Ok(StoredReport {
            local_path: download.local_path.clone(),
            remote_url,
        })
    }
}

#[async_trait]
impl StageWorker for ReportUploader {
    type Output = Vec<StoredReport>;

    fn stage(&self) -> Stage {
        Stage::UploadReports
    }

    fn is_ready(&self, record: &CompanyRecord) -> bool {
        !record.downloads.is_empty()
    }

    async fn run(&self, record: &CompanyRecord) -> StageResult<Vec<StoredReport>> {
        let mut stored = Vec::with_capacity(record.downloads.len());
        let mut last_error = None;

        for download in &record.downloads {
            match self.upload(download).await {
                Ok(report) => {
                    info!(company = %record.key, url = %report.remote_url, "Report uploaded");
                    stored.push(report);
                }
                Err(e) => {
                    warn!(company = %record.key, path = %download.local_path.display(), error = %e, "Upload failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if stored.is_empty() => Err(e),
            _ => Ok(stored),
        }
    }

    fn apply(&self, record: &mut CompanyRecord, output: Vec<StoredReport>) {
        output.apply(record);
    }
}
