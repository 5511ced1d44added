//! Command line flags, environment, and service construction.

use anyhow::{bail, Context, Result};
use clap::Args;
use harvester::{
    BlobStorage, Capability, FirecrawlCrawler, GeminiClient, Generator, MemoryCache, ObjectStoreBlobStorage,
    PipelineConfig, RateLimitedCrawler, RetryPolicy, Services, SqliteCache, Stage, StageCache, Unconfigured,
    ValidatedCrawler, WebCrawler,
};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEFAULT_CACHE_URL: &str = "sqlite://harvester.db";

/// Flags shared by every command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Company list (`ID;NAME`)
    #[arg(short, long, global = true, default_value = "data/companies.csv")]
    pub input: PathBuf,

    /// Field delimiter of the input and output tables
    #[arg(long, global = true, default_value_t = ';')]
    pub delimiter: char,

    /// Companies processed at once within a stage
    #[arg(short, long, global = true)]
    pub concurrency: Option<usize>,

    /// Deadline in seconds for one company in one stage
    #[arg(long, global = true)]
    pub timeout_secs: Option<u64>,

    /// Model turns per start page when crawling for reports
    #[arg(long, global = true)]
    pub max_pages: Option<usize>,

    /// Crawler requests per second
    #[arg(long, global = true, default_value_t = 5)]
    pub crawl_rps: u32,

    /// Environment file to load instead of `.env`
    #[arg(long, global = true)]
    pub env_file: Option<PathBuf>,

    /// Cache database URL [env: HARVESTER_CACHE_URL] [default: sqlite://harvester.db]
    #[arg(long, global = true)]
    pub cache_url: Option<String>,

    #[arg(long, global = true)]
    pub download_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    pub output_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    pub discovery_template: Option<PathBuf>,

    #[arg(long, global = true)]
    pub extraction_template: Option<PathBuf>,

    /// Level 1 NACE taxonomy JSON
    #[arg(long = "nace-level1", global = true)]
    pub nace_level1: Option<PathBuf>,

    /// Level 2 NACE taxonomy JSON
    #[arg(long = "nace-level2", global = true)]
    pub nace_level2: Option<PathBuf>,

    /// Stages whose recorded failures are not retried (comma separated)
    #[arg(long = "no-retry", global = true, value_name = "STAGE", value_delimiter = ',')]
    pub no_retry: Vec<Stage>,
}

impl RunArgs {
    /// Pipeline settings with flag overrides applied to the defaults.
    pub fn pipeline_config(&self) -> Result<PipelineConfig> {
        if !self.delimiter.is_ascii() {
            bail!("Delimiter must be a single ASCII character, got {:?}", self.delimiter);
        }

        let mut config = PipelineConfig {
            delimiter: self.delimiter as u8,
            ..PipelineConfig::default()
        };

        if let Some(concurrency) = self.concurrency {
            config = config.with_concurrency(concurrency);
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_timeout_secs(secs);
        }
        if let Some(max) = self.max_pages {
            config = config.with_max_pages(max);
        }
        if let Some(dir) = &self.download_dir {
            config = config.with_download_dir(dir);
        }
        if let Some(dir) = &self.output_dir {
            config = config.with_output_dir(dir);
        }
        if let Some(path) = &self.discovery_template {
            config.discovery_template = path.clone();
        }
        if let Some(path) = &self.extraction_template {
            config.extraction_template = path.clone();
        }
        if let Some(path) = &self.nace_level1 {
            config.nace_level1_path = path.clone();
        }
        if let Some(path) = &self.nace_level2 {
            config.nace_level2_path = path.clone();
        }
        for stage in &self.no_retry {
            config = config.with_retry_policy(*stage, RetryPolicy::Permanent);
        }

        Ok(config)
    }

    /// `--cache-url`, then `HARVESTER_CACHE_URL`, then the local default.
    pub fn cache_url(&self) -> String {
        self.cache_url
            .clone()
            .or_else(|| env::var("HARVESTER_CACHE_URL").ok())
            .unwrap_or_else(|| DEFAULT_CACHE_URL.to_string())
    }
}

/// Load `--env-file` if given, else `.env` when present.
pub fn load_env(env_file: Option<&Path>) -> Result<()> {
    match env_file {
        Some(path) => {
            dotenvy::from_path(path).with_context(|| format!("Failed to load env file {}", path.display()))?;
        }
        None => {
            let _ = dotenvy::dotenv();
        }
    }
    Ok(())
}

/// Open the stage cache. `memory` keeps everything in process.
pub async fn open_cache(url: &str) -> Result<Arc<dyn StageCache>> {
    if url == "memory" {
        tracing::warn!("Using in-memory cache; results are lost on exit");
        return Ok(Arc::new(MemoryCache::new()));
    }

    tracing::info!(url = %url, "Opening cache");
    let cache = SqliteCache::new(url)
        .await
        .with_context(|| format!("Failed to open cache at {}", url))?;
    Ok(Arc::new(cache))
}

/// Build the crawl, model and storage clients `stages` call from the
/// environment. Services no stage calls are left [`Unconfigured`].
pub fn services(stages: &[Stage], crawl_rps: u32) -> Result<Services> {
    let crawler: Arc<dyn WebCrawler> = if Capability::Crawler.needed_by(stages) {
        let firecrawl = FirecrawlCrawler::from_env().context("FIRECRAWL_API_KEY must be set")?;
        Arc::new(ValidatedCrawler::new(RateLimitedCrawler::new(firecrawl, crawl_rps)))
    } else {
        Arc::new(Unconfigured)
    };

    let generator: Arc<dyn Generator> = if Capability::Generator.needed_by(stages) {
        Arc::new(GeminiClient::from_env().context("GEMINI_API_TOKEN must be set")?)
    } else {
        Arc::new(Unconfigured)
    };

    let storage: Arc<dyn BlobStorage> = if Capability::Storage.needed_by(stages) {
        Arc::new(ObjectStoreBlobStorage::gcs_from_env().context("Failed to configure report storage")?)
    } else {
        Arc::new(Unconfigured)
    };

    Ok(Services {
        crawler,
        generator,
        storage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: RunArgs,
    }

    fn parse(argv: &[&str]) -> RunArgs {
        TestCli::parse_from(std::iter::once("harvest").chain(argv.iter().copied())).args
    }

    #[test]
    fn test_defaults_match_pipeline_config() {
        let config = parse(&[]).pipeline_config().unwrap();
        let defaults = PipelineConfig::default();

        assert_eq!(config.concurrency, defaults.concurrency);
        assert_eq!(config.download_dir, defaults.download_dir);
        assert_eq!(config.delimiter, b';');
        assert_eq!(config.retry_policy(Stage::FindSites), RetryPolicy::Retry);
    }

    #[test]
    fn test_flags_override_config() {
        let config = parse(&[
            "--concurrency",
            "3",
            "--output-dir",
            "/tmp/out",
            "--nace-level1",
            "l1.json",
            "--no-retry",
            "find-sites,extract-data",
        ])
        .pipeline_config()
        .unwrap();

        assert_eq!(config.concurrency, 3);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/out"));
        assert_eq!(config.nace_level1_path, PathBuf::from("l1.json"));
        assert_eq!(config.retry_policy(Stage::FindSites), RetryPolicy::Permanent);
        assert_eq!(config.retry_policy(Stage::ExtractData), RetryPolicy::Permanent);
        assert_eq!(config.retry_policy(Stage::FindReports), RetryPolicy::Retry);
    }

    #[test]
    fn test_unknown_stage_is_rejected() {
        let result = TestCli::try_parse_from(["harvest", "--no-retry", "find-everything"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cache_url_flag_wins() {
        let args = parse(&["--cache-url", "sqlite://other.db"]);
        assert_eq!(args.cache_url(), "sqlite://other.db");
    }

    #[tokio::test]
    async fn test_export_needs_no_credentials() {
        let services = services(&[Stage::ExportData], 5).unwrap();

        let err = services.generator.infer(&harvester::InferenceRequest::new(Vec::new())).await.unwrap_err();
        assert!(matches!(err, harvester::GenerationError::Config(_)));
    }
}
