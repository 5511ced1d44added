//! Pipeline orchestrator - run the stages in order over one batch.
//!
//! ```text
//! find-sites -> find-reports -> download-reports -> upload-reports
//!            -> extract-data -> classify-nace -> export-data
//! ```
//!
//! A stage run on its own first hydrates every record from the cached
//! results of all upstream stages. `run_all` threads the records through
//! every stage in one go.

use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use crate::cache::{entry_status, read_entry, CacheEntry};
use crate::error::{PipelineError, Result};
use crate::export::{self, ExportReport, Table};
use crate::pipeline::runner::{StageOutput, StageRunner, StageSummary, StageWorker};
use crate::pipeline::stages::{
    DataExtractor, NaceClassifier, ReportDownloader, ReportFinder, ReportUploader, SiteFinder,
};
use crate::traits::ai::Generator;
use crate::traits::cache::StageCache;
use crate::traits::crawler::WebCrawler;
use crate::traits::storage::BlobStorage;
use crate::types::company::{CompanyKey, CompanyRecord};
use crate::types::config::PipelineConfig;
use crate::types::financials::AnnualReportInfo;
use crate::types::nace::{NaceCode, NaceTaxonomy};
use crate::types::report::{DownloadedReport, ReportLink, SiteDiscovery, StoredReport};
use crate::types::stage::{Stage, StageStatus};

/// The external capabilities the stages call.
#[derive(Clone)]
pub struct Services {
    pub crawler: Arc<dyn WebCrawler>,
    pub generator: Arc<dyn Generator>,
    pub storage: Arc<dyn BlobStorage>,
}

/// Per-stage status of one company.
#[derive(Debug, Clone, PartialEq)]
pub struct CompanyStatus {
    pub key: CompanyKey,
    pub name: String,
    pub stages: Vec<(Stage, StageStatus)>,
}

impl CompanyStatus {
    pub fn get(&self, stage: Stage) -> Option<StageStatus> {
        self.stages.iter().find(|(s, _)| *s == stage).map(|(_, status)| *status)
    }
}

/// Files loaded once per run.
struct Resources {
    taxonomy: Option<Arc<NaceTaxonomy>>,
}

/// Sequences stage workers over a batch of company records.
pub struct Pipeline {
    services: Services,
    cache: Arc<dyn StageCache>,
    config: PipelineConfig,
    taxonomy: Option<Arc<NaceTaxonomy>>,
}

impl Pipeline {
    pub fn new(services: Services, cache: Arc<dyn StageCache>, config: PipelineConfig) -> Self {
        Self {
            services,
            cache,
            config,
            taxonomy: None,
        }
    }

    /// Use an already-loaded taxonomy instead of reading the configured files.
    pub fn with_taxonomy(mut self, taxonomy: NaceTaxonomy) -> Self {
        self.taxonomy = Some(Arc::new(taxonomy));
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn StageCache> {
        &self.cache
    }

    /// Run one stage on its own, hydrating records from upstream results.
    pub async fn run_stage(&self, stage: Stage, records: &mut [CompanyRecord]) -> Result<StageSummary> {
        let resources = self.prepare(&[stage])?;
        self.hydrate(records, stage).await?;
        self.execute(stage, records, &resources).await
    }

    /// Run every stage in order over the same records.
    pub async fn run_all(&self, records: &mut [CompanyRecord]) -> Result<Vec<StageSummary>> {
        let started = Instant::now();
        let resources = self.prepare(&Stage::ALL)?;
        let mut summaries = Vec::with_capacity(Stage::ALL.len());

        for stage in Stage::ALL {
            summaries.push(self.execute(stage, records, &resources).await?);
        }

        info!(
            companies = records.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Pipeline complete"
        );
        Ok(summaries)
    }

    /// Load cached `Done` results of every stage upstream of `stage`.
    pub async fn hydrate(&self, records: &mut [CompanyRecord], stage: Stage) -> Result<()> {
        hydrate(self.cache.as_ref(), records, stage).await
    }

    /// Cached status of every (company, stage) pair.
    pub async fn status(&self, records: &[CompanyRecord]) -> Result<Vec<CompanyStatus>> {
        status(self.cache.as_ref(), records).await
    }

    /// Write the output tables for already hydrated records.
    pub fn export(&self, records: &[CompanyRecord]) -> Result<ExportReport> {
        export::export(records, &self.config)
    }

    /// Load the files `stages` depend on so a bad path fails before any
    /// external call is made.
    fn prepare(&self, stages: &[Stage]) -> Result<Resources> {
        let taxonomy = if stages.contains(&Stage::ClassifyNace) {
            Some(self.taxonomy()?)
        } else {
            None
        };

        if stages.contains(&Stage::ExportData) {
            for template in [&self.config.discovery_template, &self.config.extraction_template] {
                Table::read(template, self.config.delimiter).map_err(|e| PipelineError::Setup(e.to_string()))?;
            }
        }

        Ok(Resources { taxonomy })
    }

    async fn execute(&self, stage: Stage, records: &mut [CompanyRecord], resources: &Resources) -> Result<StageSummary> {
        let cache = self.cache.clone();
        let Services {
            crawler,
            generator,
            storage,
        } = self.services.clone();

        match stage {
            Stage::FindSites => self.run_worker(&SiteFinder::new(generator, crawler, cache), records).await,
            Stage::FindReports => {
                let worker = ReportFinder::new(generator, crawler, cache).with_max_pages(self.config.max_pages_per_company);
                self.run_worker(&worker, records).await
            }
            Stage::DownloadReports => {
                let worker = ReportDownloader::new(crawler, self.config.download_dir.clone());
                self.run_worker(&worker, records).await
            }
            Stage::UploadReports => self.run_worker(&ReportUploader::new(storage), records).await,
            Stage::ExtractData => self.run_worker(&DataExtractor::new(generator, cache), records).await,
            Stage::ClassifyNace => {
                let taxonomy = match &resources.taxonomy {
                    Some(taxonomy) => taxonomy.clone(),
                    None => self.taxonomy()?,
                };
                self.run_worker(&NaceClassifier::new(generator, taxonomy, cache), records).await
            }
            Stage::ExportData => self.run_export(records),
        }
    }

    async fn run_worker<W: StageWorker>(&self, worker: &W, records: &mut [CompanyRecord]) -> Result<StageSummary> {
        let runner = StageRunner::for_stage(self.cache.clone(), &self.config, worker.stage());
        Ok(runner.run(worker, records).await?.summary())
    }

    fn run_export(&self, records: &[CompanyRecord]) -> Result<StageSummary> {
        let started = Instant::now();
        let report = self.export(records)?;
        Ok(StageSummary {
            stage: Stage::ExportData,
            executed: report.companies_matched,
            cached: 0,
            failed: 0,
            skipped: records.len().saturating_sub(report.companies_matched),
            skipped_failed: 0,
            failures: Default::default(),
            elapsed: started.elapsed(),
        })
    }

    fn taxonomy(&self) -> Result<Arc<NaceTaxonomy>> {
        match &self.taxonomy {
            Some(taxonomy) => Ok(taxonomy.clone()),
            None => Ok(Arc::new(NaceTaxonomy::load(
                &self.config.nace_level1_path,
                &self.config.nace_level2_path,
            )?)),
        }
    }
}

/// Load cached `Done` results of every stage upstream of `stage` into `records`.
pub async fn hydrate(cache: &dyn StageCache, records: &mut [CompanyRecord], stage: Stage) -> Result<()> {
    for upstream in stage.upstream() {
        match upstream {
            Stage::FindSites => hydrate_from::<SiteDiscovery>(cache, upstream, records).await?,
            Stage::FindReports => hydrate_from::<Vec<ReportLink>>(cache, upstream, records).await?,
            Stage::DownloadReports => hydrate_from::<Vec<DownloadedReport>>(cache, upstream, records).await?,
            Stage::UploadReports => hydrate_from::<Vec<StoredReport>>(cache, upstream, records).await?,
            Stage::ExtractData => hydrate_from::<AnnualReportInfo>(cache, upstream, records).await?,
            Stage::ClassifyNace => hydrate_from::<NaceCode>(cache, upstream, records).await?,
            Stage::ExportData => {}
        }
    }
    Ok(())
}

async fn hydrate_from<T: StageOutput>(cache: &dyn StageCache, stage: Stage, records: &mut [CompanyRecord]) -> Result<()> {
    let mut loaded = 0;
    for record in records.iter_mut() {
        if let Some(CacheEntry::Done { value }) = read_entry::<T>(cache, stage, &record.key).await? {
            value.apply(record);
            loaded += 1;
        }
    }
    info!(stage = %stage, loaded, total = records.len(), "Hydrated upstream results");
    Ok(())
}

/// Cached status of every (company, stage) pair.
pub async fn status(cache: &dyn StageCache, records: &[CompanyRecord]) -> Result<Vec<CompanyStatus>> {
    let mut statuses = Vec::with_capacity(records.len());
    for record in records {
        let mut stages = Vec::new();
        for stage in Stage::ALL.into_iter().filter(Stage::is_cached) {
            stages.push((stage, entry_status(cache, stage, &record.key).await?));
        }
        statuses.push(CompanyStatus {
            key: record.key.clone(),
            name: record.name.clone(),
            stages,
        });
    }
    Ok(statuses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::write_entry;
    use crate::stores::MemoryCache;
    use crate::testing::{MockBlobStorage, MockCrawler, MockGenerator};

    fn pipeline(cache: Arc<MemoryCache>) -> Pipeline {
        let services = Services {
            crawler: Arc::new(MockCrawler::new()),
            generator: Arc::new(MockGenerator::new()),
            storage: Arc::new(MockBlobStorage::new()),
        };
        Pipeline::new(services, cache, PipelineConfig::default())
    }

    #[tokio::test]
    async fn test_hydrate_loads_only_upstream() {
        let cache = Arc::new(MemoryCache::new());
        let key = CompanyKey::from_name("Acme");
        let site = SiteDiscovery {
            official_website_link: Some("https://acme.com".into()),
            investor_relations_page: None,
        };
        write_entry(cache.as_ref(), Stage::FindSites, &key, &CacheEntry::done(&site)).await.unwrap();
        write_entry(
            cache.as_ref(),
            Stage::FindReports,
            &key,
            &CacheEntry::done(vec![ReportLink::new("https://acme.com/ar.pdf", Some(2024))]),
        )
        .await
        .unwrap();

        let mut records = vec![CompanyRecord::new("Acme")];
        pipeline(cache).hydrate(&mut records, Stage::FindReports).await.unwrap();

        assert_eq!(records[0].site.as_ref(), Some(&site));
        assert!(records[0].reports.is_empty());
    }

    #[tokio::test]
    async fn test_status_reports_cached_outcomes() {
        let cache = Arc::new(MemoryCache::new());
        let key = CompanyKey::from_name("Acme");
        write_entry(cache.as_ref(), Stage::FindSites, &key, &CacheEntry::done(SiteDiscovery::default()))
            .await
            .unwrap();
        write_entry(cache.as_ref(), Stage::FindReports, &key, &CacheEntry::<()>::failed("no report"))
            .await
            .unwrap();

        let statuses = pipeline(cache).status(&[CompanyRecord::new("Acme")]).await.unwrap();

        assert_eq!(statuses[0].stages.len(), 6);
        assert_eq!(statuses[0].get(Stage::FindSites), Some(StageStatus::Done));
        assert_eq!(statuses[0].get(Stage::FindReports), Some(StageStatus::Failed));
        assert_eq!(statuses[0].get(Stage::ExtractData), Some(StageStatus::NotStarted));
        assert_eq!(statuses[0].get(Stage::ExportData), None);
    }

    fn counted_pipeline(config: PipelineConfig) -> (Pipeline, MockGenerator, MockCrawler) {
        let generator = MockGenerator::new();
        let crawler = MockCrawler::new();
        let services = Services {
            crawler: Arc::new(crawler.clone()),
            generator: Arc::new(generator.clone()),
            storage: Arc::new(MockBlobStorage::new()),
        };
        let pipeline = Pipeline::new(services, Arc::new(MemoryCache::new()), config);
        (pipeline, generator, crawler)
    }

    #[tokio::test]
    async fn test_missing_taxonomy_is_a_setup_error() {
        let config = PipelineConfig::default().with_nace_paths("/nonexistent/l1.json", "/nonexistent/l2.json");
        let (pipeline, _, _) = counted_pipeline(config);

        let err = pipeline
            .run_stage(Stage::ClassifyNace, &mut [CompanyRecord::new("Acme")])
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Setup(_)));
    }

    #[tokio::test]
    async fn test_missing_taxonomy_stops_run_all_before_any_call() {
        let config = PipelineConfig::default().with_nace_paths("/nonexistent/l1.json", "/nonexistent/l2.json");
        let (pipeline, generator, crawler) = counted_pipeline(config);

        let err = pipeline.run_all(&mut [CompanyRecord::new("Acme")]).await.unwrap_err();

        assert!(matches!(err, PipelineError::Setup(_)));
        assert_eq!(generator.call_count(), 0);
        assert_eq!(crawler.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_template_stops_run_all_before_any_call() {
        let config = PipelineConfig::default()
            .with_templates("/nonexistent/discovery.csv", "/nonexistent/extraction.csv");
        let (pipeline, generator, _) = counted_pipeline(config);
        let pipeline = pipeline.with_taxonomy(NaceTaxonomy::from_maps(Default::default(), Default::default()));

        let err = pipeline.run_all(&mut [CompanyRecord::new("Acme")]).await.unwrap_err();

        assert!(matches!(err, PipelineError::Setup(msg) if msg.contains("discovery.csv")));
        assert_eq!(generator.call_count(), 0);
    }
}
