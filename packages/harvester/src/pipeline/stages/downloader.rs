//! download-reports: save report files locally.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::adapters::BROWSER_USER_AGENT;
use crate::error::{CrawlResult, StageError, StageResult};
use crate::pipeline::runner::{StageOutput, StageWorker};
use crate::traits::crawler::{DownloadedFile, WebCrawler};
use crate::types::company::CompanyRecord;
use crate::types::report::{DownloadedReport, ReportFormat, ReportLink};
use crate::types::stage::Stage;

/// Downloads every report link of a company into one directory.
///
/// Files are named `<company>_<refyear>.<pdf|html>`.
pub struct ReportDownloader {
    crawler: Arc<dyn WebCrawler>,
    download_dir: PathBuf,
}

impl ReportDownloader {
    pub fn new(crawler: Arc<dyn WebCrawler>, download_dir: impl Into<PathBuf>) -> Self {
        Self {
            crawler,
            download_dir: download_dir.into(),
        }
    }

    async fn download_report(&self, record: &CompanyRecord, link: &ReportLink) -> StageResult<DownloadedReport> {
        let format = self.detect_format(&link.url).await;
        let destination = self.download_dir.join(file_name(&record.name, link.reference_year, format));

        let file = match self.fetch_to(&link.url, &destination, None).await {
            Err(e) if e.status() == Some(403) => {
                warn!(company = %record.key, url = %link.url, "Download forbidden, retrying with browser user agent");
                self.fetch_to(&link.url, &destination, Some(BROWSER_USER_AGENT)).await?
            }
            other => other?,
        };

        info!(company = %record.key, path = %file.path.display(), "Report downloaded");
        Ok(DownloadedReport {
            source: link.clone(),
            local_path: file.path,
            format,
        })
    }

    async fn fetch_to(&self, url: &str, destination: &Path, user_agent: Option<&str>) -> CrawlResult<DownloadedFile> {
        self.crawler.download(url, destination, user_agent).await
    }

    /// PDF by path suffix, else by the served content type.
    async fn detect_format(&self, url: &str) -> ReportFormat {
        if has_pdf_suffix(url) {
            return ReportFormat::Pdf;
        }

        match self.crawler.content_type(url).await {
            Ok(Some(ct)) if ct.to_ascii_lowercase().contains("application/pdf") => ReportFormat::Pdf,
            Ok(_) => ReportFormat::Html,
            Err(e) => {
                warn!(url = %url, error = %e, "Content type lookup failed, assuming HTML");
                ReportFormat::Html
            }
        }
    }
}

fn has_pdf_suffix(url: &str) -> bool {
    let path = Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string());
    path.to_ascii_lowercase().ends_with(".pdf")
}

/// `<company>_<refyear>.<ext>` with spaces turned into `_` and slashes removed.
pub fn file_name(company: &str, reference_year: Option<i32>, format: ReportFormat) -> String {
    let stem = match reference_year {
        Some(year) => format!("{}_{}", company, year),
        None => company.to_string(),
    };

    format!("{}.{}", stem, format.extension())
        .replace(' ', "_")
        .replace(['\\', '/'], "")
}

#[async_trait]
impl StageWorker for ReportDownloader {
    type Output = Vec<DownloadedReport>;

    fn stage(&self) -> Stage {
        Stage::DownloadReports
    }

    fn is_ready(&self, record: &CompanyRecord) -> bool {
        !record.reports.is_empty()
    }

    async fn run(&self, record: &CompanyRecord) -> StageResult<Vec<DownloadedReport>> {
        let mut downloads = Vec::with_capacity(record.reports.len());
        let mut last_error = None;

        for link in &record.reports {
            match self.download_report(record, link).await {
                Ok(download) => downloads.push(download),
                Err(e) => {
                    warn!(company = %record.key, url = %link.url, error = %e, "Report download failed");
                    last_error = Some(e);
                }
            }
        }

        match (downloads.is_empty(), last_error) {
            (true, Some(e)) => Err(e),
            (true, None) => Err(StageError::NotFound("no report links to download".into())),
            (false, _) => Ok(downloads),
        }
    }

    fn apply(&self, record: &mut CompanyRecord, output: Vec<DownloadedReport>) {
        output.apply(record);
    }
}
