//! Web crawl capability and URL validation for SSRF protection.

use async_trait::async_trait;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use crate::error::{CrawlError, CrawlResult, SecurityError, SecurityResult};

/// A fetched page rendered as markdown.
#[derive(Debug, Clone, PartialEq)]
pub struct CrawledPage {
    /// URL that was fetched (after redirects, when known)
    pub url: String,

    /// Page content as markdown
    pub content: String,

    /// Links discovered on the page
    pub links: Vec<String>,
}

impl CrawledPage {
    pub fn new(url: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            content: content.into(),
            links: Vec::new(),
        }
    }

    pub fn with_links(mut self, links: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.links = links.into_iter().map(Into::into).collect();
        self
    }
}

/// A file written to disk by [`WebCrawler::download`].
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedFile {
    pub path: PathBuf,

    /// `Content-Type` header as sent by the server
    pub content_type: Option<String>,
}

/// Fetches web pages and downloads files.
#[async_trait]
pub trait WebCrawler: Send + Sync {
    /// Fetch a single page as markdown plus its outgoing links.
    async fn fetch(&self, url: &str) -> CrawlResult<CrawledPage>;

    /// Content type of a URL without downloading the body.
    async fn content_type(&self, url: &str) -> CrawlResult<Option<String>>;

    /// Stream a URL's body to `destination`.
    ///
    /// `user_agent` overrides the client's default agent for this request.
    async fn download(
        &self,
        url: &str,
        destination: &Path,
        user_agent: Option<&str>,
    ) -> CrawlResult<DownloadedFile>;
}

/// Hosts that resolve to the machine itself or to cloud metadata services.
const BLOCKED_HOSTS: [&str; 7] = [
    "localhost",
    "0.0.0.0",
    "metadata.google.internal",
    "metadata.gke.internal",
    "instance-data",
    "127.0.0.1",
    "::1",
];

/// Loopback, private and link-local ranges.
const BLOCKED_CIDRS: [&str; 8] = [
    "10.0.0.0/8",
    "172.16.0.0/12",
    "192.168.0.0/16",
    "169.254.0.0/16",
    "127.0.0.0/8",
    "::1/128",
    "fc00::/7",
    "fe80::/10",
];

/// Rejects URLs a company website has no business pointing the crawler at.
///
/// Report links come from the model and from crawled pages, so only public
/// `http(s)` hosts are let through.
#[derive(Debug, Clone)]
pub struct UrlValidator {
    blocked_cidrs: Vec<ipnet::IpNet>,
}

impl Default for UrlValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl UrlValidator {
    pub fn new() -> Self {
        Self {
            blocked_cidrs: BLOCKED_CIDRS.iter().filter_map(|cidr| cidr.parse().ok()).collect(),
        }
    }

    /// Check scheme, host name and literal IPs without touching the network.
    pub fn validate(&self, url: &str) -> SecurityResult<()> {
        let parsed = url::Url::parse(url)?;
        let host = public_host(&parsed)?;
        match literal_ip(host) {
            Some(ip) => self.check_ip(host, ip),
            None => Ok(()),
        }
    }

    /// [`validate`](Self::validate), then resolve the host and check every address.
    pub async fn validate_with_dns(&self, url: &str) -> SecurityResult<()> {
        let parsed = url::Url::parse(url)?;
        let host = public_host(&parsed)?;
        if let Some(ip) = literal_ip(host) {
            return self.check_ip(host, ip);
        }

        let port = parsed.port_or_known_default().unwrap_or(80);
        let addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| SecurityError::DnsResolution(e.to_string()))?;
        for addr in addrs {
            self.check_ip(host, addr.ip())?;
        }
        Ok(())
    }

    fn check_ip(&self, host: &str, ip: IpAddr) -> SecurityResult<()> {
        if self.blocked_cidrs.iter().any(|cidr| cidr.contains(&ip)) {
            return Err(SecurityError::BlockedCidr(format!("{} ({})", host, ip)));
        }
        Ok(())
    }
}

fn public_host(url: &url::Url) -> SecurityResult<&str> {
    if !matches!(url.scheme(), "http" | "https") {
        return Err(SecurityError::DisallowedScheme(url.scheme().to_string()));
    }
    let host = url.host_str().ok_or(SecurityError::NoHost)?;
    if BLOCKED_HOSTS.contains(&host.trim_matches(['[', ']'])) {
        return Err(SecurityError::BlockedHost(host.to_string()));
    }
    Ok(host)
}

fn literal_ip(host: &str) -> Option<IpAddr> {
    host.trim_matches(['[', ']']).parse().ok()
}

/// A crawler that validates URLs before touching the network.
pub struct ValidatedCrawler<C: WebCrawler> {
    inner: C,
    validator: UrlValidator,
}

impl<C: WebCrawler> ValidatedCrawler<C> {
    pub fn new(crawler: C) -> Self {
        Self {
            inner: crawler,
            validator: UrlValidator::new(),
        }
    }
}

#[async_trait]
impl<C: WebCrawler> WebCrawler for ValidatedCrawler<C> {
    async fn fetch(&self, url: &str) -> CrawlResult<CrawledPage> {
        self.validator
            .validate_with_dns(url)
            .await
            .map_err(CrawlError::Security)?;

        let mut page = self.inner.fetch(url).await?;
        page.links.retain(|link| self.validator.validate(link).is_ok());
        Ok(page)
    }

    async fn content_type(&self, url: &str) -> CrawlResult<Option<String>> {
        self.validator.validate_with_dns(url).await?;
        self.inner.content_type(url).await
    }

    async fn download(
        &self,
        url: &str,
        destination: &Path,
        user_agent: Option<&str>,
    ) -> CrawlResult<DownloadedFile> {
        self.validator.validate_with_dns(url).await?;
        self.inner.download(url, destination, user_agent).await
    }
}
