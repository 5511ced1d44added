//! Firecrawl-backed web crawler.
//!
//! Pages are rendered through the Firecrawl scrape API, which handles
//! JavaScript-heavy investor sites and returns markdown plus links. Report
//! files are downloaded directly with `reqwest`.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{CrawlError, CrawlResult};
use crate::security::SecretString;
use crate::traits::crawler::{CrawledPage, DownloadedFile, WebCrawler};

const FIRECRAWL_API_URL: &str = "https://api.firecrawl.dev/v1";

/// Agent used when a server rejects the default client.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Web crawler over the Firecrawl API.
///
/// # Example
///
/// ```rust,ignore
/// use harvester::adapters::FirecrawlCrawler;
/// use harvester::traits::crawler::ValidatedCrawler;
///
/// let crawler = ValidatedCrawler::new(FirecrawlCrawler::from_env()?);
/// let page = crawler.fetch("https://www.adecco.com/investors").await?;
/// ```
pub struct FirecrawlCrawler {
    client: Client,
    api_key: SecretString,
    base_url: String,
}

#[derive(Serialize)]
struct ScrapeRequest<'a> {
    url: &'a str,
    formats: [&'static str; 2],
    #[serde(rename = "onlyMainContent")]
    only_main_content: bool,
}

#[derive(Deserialize)]
struct ScrapeResponse {
    success: bool,
    data: Option<ScrapeData>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct ScrapeData {
    markdown: Option<String>,
    #[serde(default)]
    links: Vec<String>,
    metadata: Option<PageMetadata>,
}

#[derive(Deserialize)]
struct PageMetadata {
    #[serde(rename = "sourceURL")]
    source_url: Option<String>,
}

impl FirecrawlCrawler {
    /// Create a crawler with the given API key.
    pub fn new(api_key: impl Into<SecretString>) -> CrawlResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| CrawlError::Http(Box::new(e)))?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: FIRECRAWL_API_URL.to_string(),
        })
    }

    /// Create from environment variable `FIRECRAWL_API_KEY`.
    pub fn from_env() -> CrawlResult<Self> {
        let api_key = std::env::var("FIRECRAWL_API_KEY")
            .map_err(|_| CrawlError::Config("FIRECRAWL_API_KEY environment variable not set".into()))?;
        Self::new(api_key)
    }

    /// Point at a self-hosted Firecrawl instance.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    fn scrape_data_to_page(url: &str, data: ScrapeData) -> CrawlResult<CrawledPage> {
        let markdown = data
            .markdown
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| CrawlError::Service(format!("no markdown returned for {}", url)))?;

        let source = data
            .metadata
            .and_then(|m| m.source_url)
            .unwrap_or_else(|| url.to_string());

        Ok(CrawledPage::new(source, markdown).with_links(data.links))
    }
}

#[async_trait]
impl WebCrawler for FirecrawlCrawler {
    async fn fetch(&self, url: &str) -> CrawlResult<CrawledPage> {
        let request = ScrapeRequest {
            url,
            formats: ["markdown", "links"],
            only_main_content: false,
        };

        let response = self
            .client
            .post(format!("{}/scrape", self.base_url))
            .bearer_auth(self.api_key.expose())
            .json(&request)
            .send()
            .await
            .map_err(|e| CrawlError::Http(Box::new(e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(CrawlError::Service(format!(
                "Firecrawl API error: {} - {}",
                status, text
            )));
        }

        let body: ScrapeResponse = response
            .json()
            .await
            .map_err(|e| CrawlError::Http(Box::new(e)))?;

        if !body.success {
            return Err(CrawlError::Service(
                body.error.unwrap_or_else(|| "Firecrawl scrape failed".into()),
            ));
        }

        let data = body
            .data
            .ok_or_else(|| CrawlError::Service("no data returned from Firecrawl".into()))?;

        Self::scrape_data_to_page(url, data)
    }

    async fn content_type(&self, url: &str) -> CrawlResult<Option<String>> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| CrawlError::Http(Box::new(e)))?;

        // some servers refuse HEAD; an unknown type falls back to the URL
        if response.status() == StatusCode::METHOD_NOT_ALLOWED {
            return Ok(None);
        }

        Ok(response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string))
    }

    async fn download(
        &self,
        url: &str,
        destination: &Path,
        user_agent: Option<&str>,
    ) -> CrawlResult<DownloadedFile> {
        let mut request = self.client.get(url);
        if let Some(agent) = user_agent {
            request = request.header(header::USER_AGENT, agent);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CrawlError::Http(Box::new(e)))?;

        if !response.status().is_success() {
            return Err(CrawlError::Status {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // a failed transfer leaves only the .part file behind
        let partial = destination.with_extension("part");
        let mut file = tokio::fs::File::create(&partial).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0usize;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| CrawlError::Http(Box::new(e)))?;
            written += chunk.len();
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&partial, destination).await?;
        debug!(url, path = %destination.display(), bytes = written, "Downloaded file");

        Ok(DownloadedFile {
            path: destination.to_path_buf(),
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_crawler() {
        assert!(FirecrawlCrawler::new("fc-test").is_ok());
    }

    #[test]
    fn test_scrape_data_to_page() {
        let data: ScrapeData = serde_json::from_value(serde_json::json!({
            "markdown": "# Investors\n\n[Annual report 2024](https://acme.com/ar2024.pdf)",
            "links": ["https://acme.com/ar2024.pdf"],
            "metadata": {"sourceURL": "https://acme.com/investors/"}
        }))
        .unwrap();

        let page = FirecrawlCrawler::scrape_data_to_page("https://acme.com/investors", data).unwrap();
        assert_eq!(page.url, "https://acme.com/investors/");
        assert_eq!(page.links, vec!["https://acme.com/ar2024.pdf"]);
        assert!(page.content.contains("Annual report"));
    }

    #[test]
    fn test_blank_markdown_is_an_error() {
        let data: ScrapeData = serde_json::from_value(serde_json::json!({"markdown": "  "})).unwrap();
        assert!(FirecrawlCrawler::scrape_data_to_page("https://acme.com", data).is_err());
    }
}
