//! extract-data: read key figures out of the annual report.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{StageError, StageResult};
use crate::pipeline::prompts;
use crate::pipeline::runner::{StageOutput, StageWorker};
use crate::pipeline::structured::infer_structured;
use crate::pipeline::transcript::TranscriptLog;
use crate::schema::StructuredOutput;
use crate::traits::ai::{Attachment, Generator, InferenceRequest, Message, ModelTier};
use crate::traits::cache::StageCache;
use crate::types::company::CompanyRecord;
use crate::types::financials::AnnualReportInfo;
use crate::types::stage::Stage;

/// Extracts [`AnnualReportInfo`] from the latest report.
///
/// The downloaded file is attached inline. Without a readable local copy
/// the model is pointed at the report URL instead and answers in plain
/// JSON.
pub struct DataExtractor {
    generator: Arc<dyn Generator>,
    transcripts: TranscriptLog,
}

impl DataExtractor {
    pub fn new(generator: Arc<dyn Generator>, cache: Arc<dyn StageCache>) -> Self {
        Self {
            generator,
            transcripts: TranscriptLog::new(cache, Stage::ExtractData),
        }
    }

    /// Prompt with the report attached, if a local copy can be read.
    async fn attached_prompt(&self, record: &CompanyRecord) -> Option<Message> {
        let download = record.downloads.first()?;
        match tokio::fs::read(&download.local_path).await {
            Ok(bytes) => Some(
                Message::user(prompts::extract_attached(&record.name))
                    .with_attachment(Attachment::new(download.format.mime_type(), bytes)),
            ),
            Err(e) => {
                warn!(
                    company = %record.key,
                    path = %download.local_path.display(),
                    error = %e,
                    "Cannot read report from disk, falling back to URL context"
                );
                None
            }
        }
    }

    fn report_url(record: &CompanyRecord) -> Option<&str> {
        record
            .downloads
            .first()
            .map(|d| d.source.url.as_str())
            .or_else(|| record.latest_report().map(|r| r.url.as_str()))
    }
}

#[async_trait]
impl StageWorker for DataExtractor {
    type Output = AnnualReportInfo;

    fn stage(&self) -> Stage {
        Stage::ExtractData
    }

    fn is_ready(&self, record: &CompanyRecord) -> bool {
        !record.downloads.is_empty() || !record.reports.is_empty()
    }

    async fn run(&self, record: &CompanyRecord) -> StageResult<AnnualReportInfo> {
        let request = match self.attached_prompt(record).await {
            Some(message) => InferenceRequest::new(vec![message]),
            None => {
                let url = Self::report_url(record)
                    .ok_or_else(|| StageError::NotFound("no report to extract from".into()))?;
                let schema = AnnualReportInfo::response_schema();
                InferenceRequest::new(vec![Message::user(prompts::extract_from_url(&record.name, url, &schema))])
                    .with_url_context()
            }
        }
        .with_tier(ModelTier::Pro)
        .with_thinking_budget(2048);

        let mut messages = request.messages.clone();
        let result = infer_structured::<AnnualReportInfo>(self.generator.as_ref(), request).await;

        if let Ok((_, raw)) = &result {
            messages.push(Message::model(raw.clone()));
        }
        self.transcripts.record(&record.key, &messages, &[]).await;

        let (info, _) = result?;
        info!(
            company = %record.key,
            country = info.country_code.as_deref().unwrap_or("-"),
            year = ?info.reference_year,
            "Financial data extracted"
        );
        Ok(info)
    }

    fn apply(&self, record: &mut CompanyRecord, output: AnnualReportInfo) {
        output.apply(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryCache;
    use crate::testing::MockGenerator;
    use crate::types::report::{DownloadedReport, ReportFormat, ReportLink};
    use std::path::PathBuf;

    const ANSWER: &str = r#"{
        "country_code": "CH",
        "employee_count": 38000,
        "assets_value": 15000000000,
        "net_turnover": 23000000000,
        "currency_code_assets": "EUR",
        "currency_code_turnover": "EUR",
        "main_activity_description": "Staffing and workforce solutions.",
        "reference_year": 2024
    }"#;

    fn record_with_download(path: PathBuf) -> CompanyRecord {
        let mut record = CompanyRecord::new("Acme");
        let link = ReportLink::new("https://acme.com/ar.pdf", Some(2024));
        record.reports = vec![link.clone()];
        record.downloads = vec![DownloadedReport {
            source: link,
            local_path: path,
            format: ReportFormat::Pdf,
        }];
        record
    }

    #[tokio::test]
    async fn test_attaches_local_report() {
        let path = std::env::temp_dir().join(format!("acme-{}.pdf", uuid::Uuid::new_v4()));
        std::fs::write(&path, b"%PDF-1.7").unwrap();
        let generator = MockGenerator::new().push_response(ANSWER);
        let extractor = DataExtractor::new(Arc::new(generator.clone()), Arc::new(MemoryCache::new()));

        let info = extractor.run(&record_with_download(path.clone())).await.unwrap();

        assert_eq!(info.country_code.as_deref(), Some("CH"));
        let request = &generator.requests()[0];
        assert!(!request.url_context);
        assert!(request.response_schema.is_some());
        assert_eq!(request.messages[0].attachments[0].mime_type, "application/pdf");
        assert_eq!(request.messages[0].attachments[0].data, b"%PDF-1.7");
        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn test_falls_back_to_url_context() {
        let generator = MockGenerator::new().push_response(format!("```json\n{}\n```", ANSWER));
        let extractor = DataExtractor::new(Arc::new(generator.clone()), Arc::new(MemoryCache::new()));

        let info = extractor
            .run(&record_with_download(PathBuf::from("/nonexistent/acme.pdf")))
            .await
            .unwrap();

        assert_eq!(info.reference_year, Some(2024));
        let request = &generator.requests()[0];
        assert!(request.url_context);
        assert!(request.response_schema.is_none());
        assert!(request.last_prompt().unwrap().contains("https://acme.com/ar.pdf"));
    }

    #[tokio::test]
    async fn test_invalid_output_fails() {
        let generator = MockGenerator::new().push_response(r#"{"country_code": "Switzerland"}"#);
        let extractor = DataExtractor::new(Arc::new(generator), Arc::new(MemoryCache::new()));

        let mut record = CompanyRecord::new("Acme");
        record.reports = vec![ReportLink::new("https://acme.com/ar.pdf", None)];
        let err = extractor.run(&record).await.unwrap_err();

        assert!(matches!(err, StageError::Generation(_)));
    }
}
