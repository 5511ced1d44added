//! find-sites: locate the official website and investor relations page.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{StageError, StageResult};
use crate::pipeline::prompts;
use crate::pipeline::runner::{StageOutput, StageWorker};
use crate::pipeline::structured::infer_structured;
use crate::pipeline::transcript::TranscriptLog;
use crate::traits::ai::{Generator, InferenceRequest, Message, ModelTier};
use crate::traits::cache::StageCache;
use crate::traits::crawler::WebCrawler;
use crate::types::company::CompanyRecord;
use crate::types::report::SiteDiscovery;
use crate::types::stage::Stage;

/// Search rounds before giving up (the first plus one retry).
const MAX_ROUNDS: usize = 2;

/// Finds a company's web presence with a search-grounded model.
///
/// Each round is two calls: a free-text web search, then a structured
/// restatement of the links it produced. Links are checked with the
/// crawler and dead ones dropped. If none survive, the model is asked once
/// more to search with different queries.
pub struct SiteFinder {
    generator: Arc<dyn Generator>,
    crawler: Arc<dyn WebCrawler>,
    transcripts: TranscriptLog,
}

impl SiteFinder {
    pub fn new(generator: Arc<dyn Generator>, crawler: Arc<dyn WebCrawler>, cache: Arc<dyn StageCache>) -> Self {
        Self {
            generator,
            crawler,
            transcripts: TranscriptLog::new(cache, Stage::FindSites),
        }
    }

    async fn discover(&self, record: &CompanyRecord, messages: &mut Vec<Message>) -> StageResult<SiteDiscovery> {
        messages.push(Message::user(prompts::site_search(&record.name, Utc::now())));

        for round in 0..MAX_ROUNDS {
            if round > 0 {
                messages.push(Message::user(prompts::site_retry(&record.name)));
            }

            let found = self.search_round(&record.name, messages).await?;
            if let Some(valid) = self.check_links(found).await {
                info!(
                    company = %record.key,
                    website = valid.official_website_link.as_deref().unwrap_or("-"),
                    investor_page = valid.investor_relations_page.as_deref().unwrap_or("-"),
                    "Site found"
                );
                return Ok(valid);
            }

            warn!(company = %record.key, round, "No working links found");
        }

        Err(StageError::NotFound(format!(
            "all site results found for {} are invalid",
            record.name
        )))
    }

    async fn search_round(&self, company: &str, messages: &mut Vec<Message>) -> StageResult<SiteDiscovery> {
        let search = InferenceRequest::new(messages.clone())
            .with_web_search()
            .with_tier(ModelTier::Pro)
            .with_thinking_budget(1024);
        let answer = self.generator.infer(&search).await?;
        messages.push(Message::model(answer.text));

        messages.push(Message::user(prompts::site_restate(company)));
        let restate = InferenceRequest::new(messages.clone())
            .with_tier(ModelTier::Flash)
            .with_thinking_budget(0);
        let (site, raw) = infer_structured::<SiteDiscovery>(self.generator.as_ref(), restate).await?;
        messages.push(Message::model(raw));

        Ok(site)
    }

    /// Drop links that cannot be fetched; `None` if nothing is left.
    async fn check_links(&self, mut site: SiteDiscovery) -> Option<SiteDiscovery> {
        if let Some(link) = site.official_website_link.take() {
            if self.is_reachable(&link).await {
                site.official_website_link = Some(link);
            }
        }
        if let Some(link) = site.investor_relations_page.take() {
            if self.is_reachable(&link).await {
                site.investor_relations_page = Some(link);
            }
        }

        (!site.is_empty()).then_some(site)
    }

    async fn is_reachable(&self, url: &str) -> bool {
        match self.crawler.fetch(url).await {
            Ok(_) => true,
            Err(e) => {
                debug!(url = %url, error = %e, "Link check failed");
                false
            }
        }
    }
}

#[async_trait]
impl StageWorker for SiteFinder {
    type Output = SiteDiscovery;

    fn stage(&self) -> Stage {
        Stage::FindSites
    }

    async fn run(&self, record: &CompanyRecord) -> StageResult<SiteDiscovery> {
        let mut messages = Vec::new();
        let result = self.discover(record, &mut messages).await;
        self.transcripts.record(&record.key, &messages, &[]).await;
        result
    }

    fn apply(&self, record: &mut CompanyRecord, output: SiteDiscovery) {
        output.apply(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryCache;
    use crate::testing::{MockCrawler, MockGenerator};
    use crate::traits::crawler::CrawledPage;

    fn finder(generator: &MockGenerator, crawler: &MockCrawler, cache: Arc<MemoryCache>) -> SiteFinder {
        SiteFinder::new(Arc::new(generator.clone()), Arc::new(crawler.clone()), cache)
    }

    fn search_then_json(json: &'static str) -> MockGenerator {
        MockGenerator::new().with_handler(move |request| {
            if request.web_search {
                Ok("Results:\n - https://acme.com".to_string())
            } else {
                Ok(json.to_string())
            }
        })
    }

    #[tokio::test]
    async fn test_dead_links_are_dropped() {
        let generator = search_then_json(
            r#"{"official_website_link": "https://acme.com", "investor_relations_page": "https://ir.acme.com"}"#,
        );
        let crawler = MockCrawler::new().with_page(CrawledPage::new("https://acme.com", "# Acme"));
        let cache = Arc::new(MemoryCache::new());

        let record = CompanyRecord::new("Acme");
        let site = finder(&generator, &crawler, cache.clone()).run(&record).await.unwrap();

        assert_eq!(site.official_website_link.as_deref(), Some("https://acme.com"));
        assert!(site.investor_relations_page.is_none());
        assert_eq!(generator.call_count(), 2);
        assert!(generator.requests()[0].web_search);
        assert!(generator.requests()[1].response_schema.is_some());

        let log = TranscriptLog::new(cache, Stage::FindSites);
        assert_eq!(log.load(&record.key).await.unwrap().messages.len(), 4);
    }

    #[tokio::test]
    async fn test_retries_once_with_new_queries() {
        let generator = MockGenerator::new()
            .push_response("Results: https://old.acme.com")
            .push_response(r#"{"official_website_link": "https://old.acme.com"}"#)
            .push_response("Results: https://acme.com")
            .push_response(r#"{"official_website_link": "https://acme.com"}"#);
        let crawler = MockCrawler::new().with_page(CrawledPage::new("https://acme.com", "# Acme"));

        let site = finder(&generator, &crawler, Arc::new(MemoryCache::new()))
            .run(&CompanyRecord::new("Acme"))
            .await
            .unwrap();

        assert_eq!(site.primary_link(), Some("https://acme.com"));
        assert_eq!(generator.call_count(), 4);
        let retry = &generator.requests()[2];
        assert!(retry.last_prompt().unwrap().contains("different queries"));
    }

    #[tokio::test]
    async fn test_fails_when_nothing_is_reachable() {
        let generator = search_then_json(r#"{"official_website_link": "https://gone.example"}"#);
        let crawler = MockCrawler::new();

        let err = finder(&generator, &crawler, Arc::new(MemoryCache::new()))
            .run(&CompanyRecord::new("Gone"))
            .await
            .unwrap_err();

        assert!(matches!(err, StageError::NotFound(_)));
        assert_eq!(generator.call_count(), 4);
    }

    #[tokio::test]
    async fn test_empty_answer_fails_without_retry() {
        let generator = search_then_json("{}");
        let crawler = MockCrawler::new();

        let err = finder(&generator, &crawler, Arc::new(MemoryCache::new()))
            .run(&CompanyRecord::new("Nobody"))
            .await
            .unwrap_err();

        assert!(matches!(err, StageError::Generation(_)));
        assert_eq!(generator.call_count(), 2);
    }
}
