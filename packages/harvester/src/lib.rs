//! Annual Report Harvesting Library
//!
//! Given a list of company names, finds each company's website, locates its
//! latest annual financial report, downloads and archives it, and extracts
//! structured financial and NACE classification data with a generative
//! model.
//!
//! # Design
//!
//! - Every stage result is cached per (stage, company); re-running a stage
//!   only does the work that is missing
//! - Companies run on a bounded worker pool and fail independently
//! - External services sit behind traits and can be swapped for mocks
//!
//! # Usage
//!
//! ```rust,ignore
//! use harvester::{Pipeline, PipelineConfig, Services, MemoryCache, Stage};
//! use harvester::testing::{MockBlobStorage, MockCrawler, MockGenerator};
//!
//! let services = Services {
//!     crawler: Arc::new(MockCrawler::new()),
//!     generator: Arc::new(MockGenerator::new()),
//!     storage: Arc::new(MockBlobStorage::new()),
//! };
//! let pipeline = Pipeline::new(services, Arc::new(MemoryCache::new()), PipelineConfig::default());
//!
//! let mut records = harvester::input::load_companies(Path::new("companies.csv"), b';')?;
//! let summary = pipeline.run_stage(Stage::FindSites, &mut records).await?;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Cache and capability abstractions (StageCache, WebCrawler, Generator, BlobStorage)
//! - [`types`] - Company records, stage outputs, configuration
//! - [`cache`] - Typed cache entries and failure sentinels
//! - [`pipeline`] - Stage runner, stage workers and orchestrator
//! - [`stores`] - Cache implementations (MemoryCache, SqliteCache)
//! - [`adapters`] - Firecrawl, Gemini and object storage clients
//! - [`input`] / [`export`] - Tabular input and output
//! - [`security`] - Credential handling
//! - [`testing`] - Mock implementations for testing

pub mod adapters;
pub mod cache;
pub mod error;
pub mod export;
pub mod input;
pub mod pipeline;
pub mod schema;
pub mod security;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

pub use error::{
    CacheError, CrawlError, GenerationError, PipelineError, Result, SecurityError, StageError, StorageError,
};
pub use traits::{
    ai::{Attachment, Generator, Inference, InferenceRequest, Message, ModelTier, Role},
    cache::StageCache,
    crawler::{CrawledPage, DownloadedFile, UrlValidator, ValidatedCrawler, WebCrawler},
    storage::BlobStorage,
};
pub use types::{
    company::{CompanyKey, CompanyRecord},
    config::{PipelineConfig, StageSettings},
    financials::AnnualReportInfo,
    nace::{NaceCode, NaceTaxonomy},
    report::{DownloadedReport, ReportFormat, ReportLink, SiteDiscovery, StoredReport},
    stage::{Capability, RetryPolicy, Stage, StageStatus},
    Validate,
};

pub use cache::CacheEntry;
pub use export::ExportReport;
pub use pipeline::{CompanyStatus, FnWorker, Pipeline, Services, StageReport, StageRunner, StageSummary, StageWorker};
pub use schema::StructuredOutput;
pub use security::SecretString;

pub use stores::MemoryCache;

#[cfg(feature = "sqlite")]
pub use stores::SqliteCache;

pub use adapters::{FirecrawlCrawler, GeminiClient, ObjectStoreBlobStorage, RateLimitedCrawler, Unconfigured};
