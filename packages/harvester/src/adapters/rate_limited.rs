//! Rate-limited crawler wrapper.
//!
//! Wraps any [`WebCrawler`] with a `governor` limiter shared by all workers,
//! so the pool size does not translate directly into request rate.

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;

use crate::error::CrawlResult;
use crate::traits::crawler::{CrawledPage, DownloadedFile, WebCrawler};

type DefaultRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// A crawler wrapper that enforces a request rate.
pub struct RateLimitedCrawler<C: WebCrawler> {
    inner: C,
    limiter: Arc<DefaultRateLimiter>,
}

impl<C: WebCrawler> RateLimitedCrawler<C> {
    /// Limit to `requests_per_second` (at least 1).
    pub fn new(crawler: C, requests_per_second: u32) -> Self {
        Self::with_quota(crawler, Quota::per_second(non_zero(requests_per_second)))
    }

    /// Sustained rate with bursts of up to `burst` requests.
    pub fn with_burst(crawler: C, requests_per_second: u32, burst: u32) -> Self {
        let quota = Quota::per_second(non_zero(requests_per_second)).allow_burst(non_zero(burst));
        Self::with_quota(crawler, quota)
    }

    pub fn with_quota(crawler: C, quota: Quota) -> Self {
        Self {
            inner: crawler,
            limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    async fn wait_for_permit(&self) {
        self.limiter.until_ready().await;
    }
}

fn non_zero(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN)
}

#[async_trait]
impl<C: WebCrawler> WebCrawler for RateLimitedCrawler<C> {
    async fn fetch(&self, url: &str) -> CrawlResult<CrawledPage> {
        self.wait_for_permit().await;
        self.inner.fetch(url).await
    }

    async fn content_type(&self, url: &str) -> CrawlResult<Option<String>> {
        self.wait_for_permit().await;
        self.inner.content_type(url).await
    }

    async fn download(
        &self,
        url: &str,
        destination: &Path,
        user_agent: Option<&str>,
    ) -> CrawlResult<DownloadedFile> {
        self.wait_for_permit().await;
        self.inner.download(url, destination, user_agent).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCrawler;
    use std::time::Instant;

    #[tokio::test]
    async fn test_passes_through() {
        let mock = MockCrawler::new().with_page(CrawledPage::new("https://acme.com", "# Acme"));
        let crawler = RateLimitedCrawler::new(mock.clone(), 100);

        let page = crawler.fetch("https://acme.com").await.unwrap();
        assert_eq!(page.content, "# Acme");
        assert_eq!(mock.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_limits_rate() {
        let mock = MockCrawler::new().with_page(CrawledPage::new("https://acme.com", "# Acme"));
        let crawler = RateLimitedCrawler::new(mock, 5);

        let start = Instant::now();
        for _ in 0..7 {
            crawler.fetch("https://acme.com").await.unwrap();
        }

        // burst of 5, then two more at 200ms each
        assert!(start.elapsed().as_millis() >= 300);
    }
}
