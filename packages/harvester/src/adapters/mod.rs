//! Concrete implementations of the external capabilities.
//!
//! - `FirecrawlCrawler` - Web crawl via the Firecrawl API plus direct downloads
//! - `RateLimitedCrawler` - Request-rate wrapper for any crawler
//! - `GeminiClient` - Generative extraction via the Gemini API
//! - `ObjectStoreBlobStorage` - Blob storage via `object_store` (GCS)
//! - `Unconfigured` - Placeholder for a service a run does not call

pub mod firecrawl;
pub mod gcs;
pub mod gemini;
pub mod rate_limited;
pub mod unconfigured;

pub use firecrawl::{FirecrawlCrawler, BROWSER_USER_AGENT};
pub use gcs::ObjectStoreBlobStorage;
pub use gemini::GeminiClient;
pub use rate_limited::RateLimitedCrawler;
pub use unconfigured::Unconfigured;
