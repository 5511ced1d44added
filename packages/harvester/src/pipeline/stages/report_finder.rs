//! find-reports: model-guided crawl to the latest annual report.
//!
//! The model sees one page at a time as markdown, together with its
//! navigation stack and the actions it took so far, and picks one of four
//! actions:
//!
//! - `done` - the page links the report (`link`, `reference_year`)
//! - `visit` - follow `link_to_visit`
//! - `back` - return to the previous page
//! - `abort` - give up on this start URL
//!
//! Start URLs are tried in order (investor relations page first) until one
//! yields a report.

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{GenerationError, StageError, StageResult};
use crate::pipeline::prompts;
use crate::pipeline::runner::{StageOutput, StageWorker};
use crate::pipeline::structured::infer_structured;
use crate::pipeline::transcript::TranscriptLog;
use crate::traits::ai::{Generator, InferenceRequest, Message, ModelTier};
use crate::traits::cache::StageCache;
use crate::traits::crawler::WebCrawler;
use crate::types::company::CompanyRecord;
use crate::types::report::ReportLink;
use crate::types::stage::Stage;
use crate::types::Validate;

static RE_YEAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b((?:19|20)\d{2})\b").expect("static year pattern")
});

/// The chosen action to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Done,
    Visit,
    Back,
    Abort,
}

/// One navigation decision of the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CrawlAction {
    /// The chosen action to perform
    pub action: ActionKind,

    /// The url pointing to the annual report (only fill in case of action=done)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,

    /// The url to visit next (only fill in case of action=visit)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_to_visit: Option<String>,

    /// The reference date of the report as YYYY-MM-DD (only fill in case of action=done)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_year: Option<String>,

    /// Error message (only fill in case of action=abort)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Brief summary of the visited page (only fill in case of action=back)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Validate for CrawlAction {}

/// A [`CrawlAction`] with where and when it was taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ActionEvent {
    #[serde(flatten)]
    action: CrawlAction,
    taken_at_url: String,
    action_ts_ms: i64,
}

/// Navigation state for one start URL.
struct CrawlState {
    current_url: String,
    stack: Vec<String>,
    history: Vec<Value>,
}

/// Finds the latest annual report by letting the model browse the site.
pub struct ReportFinder {
    generator: Arc<dyn Generator>,
    crawler: Arc<dyn WebCrawler>,
    transcripts: TranscriptLog,
    max_pages: usize,
}

impl ReportFinder {
    pub fn new(generator: Arc<dyn Generator>, crawler: Arc<dyn WebCrawler>, cache: Arc<dyn StageCache>) -> Self {
        Self {
            generator,
            crawler,
            transcripts: TranscriptLog::new(cache, Stage::FindReports),
            max_pages: 10,
        }
    }

    /// Cap on model turns per start URL.
    pub fn with_max_pages(mut self, max_pages: usize) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    async fn find(
        &self,
        record: &CompanyRecord,
        messages: &mut Vec<Message>,
        events: &mut Vec<Value>,
    ) -> StageResult<Vec<ReportLink>> {
        let start_urls = record.site.as_ref().map(|s| s.start_urls()).unwrap_or_default();
        let mut reports = Vec::new();

        for start_url in start_urls {
            match self.crawl_from(record, start_url, messages, events).await {
                Ok(Some(report)) => {
                    info!(company = %record.key, url = %report.url, year = ?report.reference_year, "Report found");
                    reports.push(report);
                    break;
                }
                Ok(None) => {}
                Err(StageError::Invalid(reason)) => {
                    warn!(company = %record.key, start_url = %start_url, reason = %reason, "Crawl abandoned");
                }
                Err(StageError::Generation(e @ (GenerationError::Malformed(_) | GenerationError::Invalid(_)))) => {
                    warn!(company = %record.key, start_url = %start_url, error = %e, "Unusable model answer, crawl abandoned");
                }
                Err(e) => return Err(e),
            }
        }

        if reports.is_empty() {
            return Err(StageError::NotFound(format!("no annual report link found for {}", record.name)));
        }

        reports.sort_by(|a, b| b.reference_year.cmp(&a.reference_year));
        Ok(reports)
    }

    /// Crawl from one start URL.
    ///
    /// `Ok(None)` when the model aborts, the page budget runs out, or the
    /// start page cannot be fetched. `Err(StageError::Invalid)` when the
    /// model takes an action that cannot be followed, and a malformed or
    /// invalid answer surfaces as `StageError::Generation`.
    async fn crawl_from(
        &self,
        record: &CompanyRecord,
        start_url: &str,
        messages: &mut Vec<Message>,
        events: &mut Vec<Value>,
    ) -> StageResult<Option<ReportLink>> {
        let mut state = CrawlState {
            current_url: start_url.to_string(),
            stack: Vec::new(),
            history: Vec::new(),
        };
        let mut turns = 0;
        let mut retried = false;

        while turns < self.max_pages {
            let markdown = match self.crawler.fetch(&state.current_url).await {
                Ok(page) => page.content,
                Err(e) if !retried => {
                    debug!(url = %state.current_url, error = %e, "Fetch failed, retrying");
                    retried = true;
                    continue;
                }
                Err(e) if turns == 0 => {
                    warn!(company = %record.key, url = %state.current_url, error = %e, "Start page unreachable");
                    return Ok(None);
                }
                Err(e) => format!("Failed to crawl {}: {}", state.current_url, e),
            };
            retried = false;

            let prompt = prompts::crawl_step(&record.name, &markdown, &state.stack, &state.history);
            let request = InferenceRequest::new(vec![Message::user(prompt.clone())])
                .with_tier(ModelTier::Pro)
                .with_thinking_budget(1024);
            let (action, raw) = infer_structured::<CrawlAction>(self.generator.as_ref(), request).await?;

            messages.clear();
            messages.push(Message::user(prompt));
            messages.push(Message::model(raw));

            let event = ActionEvent {
                action: action.clone(),
                taken_at_url: state.current_url.clone(),
                action_ts_ms: Utc::now().timestamp_millis(),
            };
            let event = serde_json::to_value(&event).map_err(|e| StageError::Other(e.to_string()))?;
            state.history.push(event.clone());
            events.push(event);

            state.stack.push(state.current_url.clone());
            turns += 1;

            debug!(company = %record.key, url = %state.current_url, action = ?action.action, "Crawl action");

            match action.action {
                ActionKind::Done => {
                    let link = action
                        .link
                        .ok_or_else(|| StageError::Invalid("done action without a link".into()))?;
                    let url = resolve_link(&state.current_url, &link);
                    let year = action.reference_year.as_deref().and_then(parse_reference_year);
                    return Ok(Some(ReportLink::new(url, year)));
                }
                ActionKind::Abort => {
                    info!(
                        company = %record.key,
                        reason = action.error.as_deref().unwrap_or("-"),
                        "Model aborted crawl"
                    );
                    return Ok(None);
                }
                ActionKind::Visit => {
                    let link = action
                        .link_to_visit
                        .ok_or_else(|| StageError::Invalid("visit action without a link".into()))?;
                    state.current_url = resolve_link(&state.current_url, &link);
                }
                ActionKind::Back => {
                    if state.stack.len() < 2 {
                        return Err(StageError::Invalid("back action with no previous page".into()));
                    }
                    state.current_url = state.stack[state.stack.len() - 2].clone();
                }
            }
        }

        debug!(company = %record.key, start_url = %start_url, "Page budget exhausted");
        Ok(None)
    }
}

/// Resolve a possibly relative link against the page it was found on.
fn resolve_link(base: &str, link: &str) -> String {
    Url::parse(base)
        .and_then(|base| base.join(link))
        .map(String::from)
        .unwrap_or_else(|_| link.to_string())
}

/// Calendar year from a reference date such as `2024-12-31` or `FY 2024`.
pub fn parse_reference_year(text: &str) -> Option<i32> {
    RE_YEAR
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

#[async_trait]
impl StageWorker for ReportFinder {
    type Output = Vec<ReportLink>;

    fn stage(&self) -> Stage {
        Stage::FindReports
    }

    fn is_ready(&self, record: &CompanyRecord) -> bool {
        record.site.as_ref().is_some_and(|s| !s.is_empty())
    }

    async fn run(&self, record: &CompanyRecord) -> StageResult<Vec<ReportLink>> {
        let mut messages = Vec::new();
        let mut events = Vec::new();
        let result = self.find(record, &mut messages, &mut events).await;
        self.transcripts.record(&record.key, &messages, &events).await;
        result
    }

    fn apply(&self, record: &mut CompanyRecord, output: Vec<ReportLink>) {
        output.apply(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryCache;
    use crate::testing::{MockCrawler, MockGenerator};
    use crate::traits::crawler::CrawledPage;
    use crate::types::report::SiteDiscovery;

    fn acme() -> CompanyRecord {
        let mut record = CompanyRecord::new("Acme");
        record.site = Some(SiteDiscovery {
            official_website_link: Some("https://acme.com".into()),
            investor_relations_page: Some("https://ir.acme.com".into()),
        });
        record
    }

    fn finder(generator: &MockGenerator, crawler: &MockCrawler) -> ReportFinder {
        ReportFinder::new(
            Arc::new(generator.clone()),
            Arc::new(crawler.clone()),
            Arc::new(MemoryCache::new()),
        )
    }

    #[test]
    fn test_parse_reference_year() {
        assert_eq!(parse_reference_year("2024-12-31"), Some(2024));
        assert_eq!(parse_reference_year("FY 2023"), Some(2023));
        assert_eq!(parse_reference_year("unknown"), None);
    }

    #[test]
    fn test_resolve_relative_link() {
        assert_eq!(
            resolve_link("https://ir.acme.com/investors/", "reports/ar2024.pdf"),
            "https://ir.acme.com/investors/reports/ar2024.pdf"
        );
        assert_eq!(resolve_link("https://ir.acme.com", "https://cdn.acme.com/a.pdf"), "https://cdn.acme.com/a.pdf");
    }

    #[tokio::test]
    async fn test_visit_then_done() {
        let crawler = MockCrawler::new()
            .with_page(CrawledPage::new("https://ir.acme.com", "IR HOME [Reports](/reports)"))
            .with_page(CrawledPage::new("https://ir.acme.com/reports", "REPORTS PAGE"));
        let generator = MockGenerator::new()
            .with_rule("IR HOME", r#"{"action": "visit", "link_to_visit": "/reports"}"#)
            .with_rule(
                "REPORTS PAGE",
                r#"{"action": "done", "link": "/files/ar-2024.pdf", "reference_year": "2024-12-31"}"#,
            );

        let reports = finder(&generator, &crawler).run(&acme()).await.unwrap();

        assert_eq!(reports, vec![ReportLink::new("https://ir.acme.com/files/ar-2024.pdf", Some(2024))]);
        let second_prompt = generator.requests()[1].last_prompt().unwrap().to_string();
        assert!(second_prompt.contains("navigation stack:\nhttps://ir.acme.com\n"));
        assert!(second_prompt.contains("\"action\":\"visit\""));
    }

    #[tokio::test]
    async fn test_unreachable_start_page_falls_through() {
        let crawler = MockCrawler::new()
            .fail_fetch("https://ir.acme.com", [503, 503])
            .with_page(CrawledPage::new("https://acme.com", "MAIN SITE"));
        let generator = MockGenerator::new().with_rule(
            "MAIN SITE",
            r#"{"action": "done", "link": "https://acme.com/ar.pdf", "reference_year": "2023-12-31"}"#,
        );

        let reports = finder(&generator, &crawler).run(&acme()).await.unwrap();

        assert_eq!(reports[0].url, "https://acme.com/ar.pdf");
        assert_eq!(generator.call_count(), 1);
        assert_eq!(crawler.fetch_count(), 3);
    }

    #[tokio::test]
    async fn test_page_budget_and_abort() {
        let crawler = MockCrawler::new()
            .with_page(CrawledPage::new("https://ir.acme.com", "LOOP"))
            .with_page(CrawledPage::new("https://acme.com", "DEAD END"));
        let generator = MockGenerator::new()
            .with_rule("LOOP", r#"{"action": "visit", "link_to_visit": "https://ir.acme.com"}"#)
            .with_rule("DEAD END", r#"{"action": "abort", "error": "nothing here"}"#);

        let err = finder(&generator, &crawler)
            .with_max_pages(3)
            .run(&acme())
            .await
            .unwrap_err();

        assert!(matches!(err, StageError::NotFound(_)));
        assert_eq!(generator.call_count(), 4);
    }

    #[tokio::test]
    async fn test_back_without_history_abandons_start_url() {
        let crawler = MockCrawler::new()
            .with_page(CrawledPage::new("https://ir.acme.com", "IR HOME"))
            .with_page(CrawledPage::new("https://acme.com", "MAIN SITE"));
        let generator = MockGenerator::new()
            .with_rule("IR HOME", r#"{"action": "back", "note": "wrong page"}"#)
            .with_rule(
                "MAIN SITE",
                r#"{"action": "done", "link": "https://acme.com/ar.pdf", "reference_year": "2024-06-30"}"#,
            );

        let reports = finder(&generator, &crawler).run(&acme()).await.unwrap();
        assert_eq!(reports[0].reference_year, Some(2024));
    }

    #[tokio::test]
    async fn test_unparseable_answer_moves_to_next_start_url() {
        let crawler = MockCrawler::new()
            .with_page(CrawledPage::new("https://ir.acme.com", "IR HOME"))
            .with_page(CrawledPage::new("https://acme.com", "MAIN SITE"));
        let generator = MockGenerator::new()
            .with_rule("IR HOME", "I am not JSON")
            .with_rule(
                "MAIN SITE",
                r#"{"action": "done", "link": "https://acme.com/ar.pdf", "reference_year": "2024-12-31"}"#,
            );

        let reports = finder(&generator, &crawler).run(&acme()).await.unwrap();

        assert_eq!(reports[0].url, "https://acme.com/ar.pdf");
        assert_eq!(generator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_unknown_action_moves_to_next_start_url() {
        let crawler = MockCrawler::new()
            .with_page(CrawledPage::new("https://ir.acme.com", "IR HOME"))
            .with_page(CrawledPage::new("https://acme.com", "MAIN SITE"));
        let generator = MockGenerator::new()
            .with_rule("IR HOME", r#"{"action": "download"}"#)
            .with_rule("MAIN SITE", r#"{"action": "abort", "error": "nothing here"}"#);

        let err = finder(&generator, &crawler).run(&acme()).await.unwrap_err();

        assert!(matches!(err, StageError::NotFound(_)));
        assert_eq!(generator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_actions_are_kept_in_transcript() {
        let cache = Arc::new(MemoryCache::new());
        let crawler = MockCrawler::new().with_page(CrawledPage::new("https://ir.acme.com", "IR HOME"));
        let generator = MockGenerator::new().with_rule(
            "IR HOME",
            r#"{"action": "done", "link": "https://ir.acme.com/ar.pdf"}"#,
        );

        let finder = ReportFinder::new(Arc::new(generator), Arc::new(crawler), cache.clone());
        let record = acme();
        finder.run(&record).await.unwrap();

        let transcript = TranscriptLog::new(cache, Stage::FindReports).load(&record.key).await.unwrap();
        assert_eq!(transcript.events.len(), 1);
        assert_eq!(transcript.events[0]["taken_at_url"], "https://ir.acme.com");
        assert_eq!(transcript.messages.len(), 2);
    }

    #[test]
    fn test_not_ready_without_site() {
        let finder = finder(&MockGenerator::new(), &MockCrawler::new());
        assert!(!finder.is_ready(&CompanyRecord::new("Acme")));
        assert!(finder.is_ready(&acme()));
    }
}
