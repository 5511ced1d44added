//! Stage runner - execute one stage over a batch of companies.
//!
//! For every company the runner consults the cache first and only invokes
//! the worker for companies without a usable `Done` entry. Work runs on a
//! bounded pool: at most `concurrency` companies are in flight and a freed
//! slot is refilled immediately. Every outcome is written to the cache as
//! soon as it is known, so an interrupted batch resumes where it stopped.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::cache::{read_entry, write_entry, CacheEntry};
use crate::error::{Result, StageError, StageResult};
use crate::traits::cache::StageCache;
use crate::types::company::{CompanyKey, CompanyRecord};
use crate::types::config::PipelineConfig;
use crate::types::stage::{RetryPolicy, Stage};

/// Output of a stage that knows which record field it fills.
pub trait StageOutput: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Merge into the record.
    fn apply(self, record: &mut CompanyRecord);
}

/// The per-company work of one stage.
#[async_trait]
pub trait StageWorker: Send + Sync {
    type Output: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    fn stage(&self) -> Stage;

    /// Whether the upstream fields this worker reads are present.
    ///
    /// Records that are not ready are skipped without touching the cache.
    fn is_ready(&self, _record: &CompanyRecord) -> bool {
        true
    }

    /// Do the work for one company.
    async fn run(&self, record: &CompanyRecord) -> StageResult<Self::Output>;

    /// Merge a result (fresh or cached) into the record.
    fn apply(&self, record: &mut CompanyRecord, output: Self::Output);
}

/// Outcome counts and per-company results of one stage invocation.
#[derive(Debug, Clone)]
pub struct StageReport<T> {
    pub stage: Stage,

    /// Companies whose work function ran and succeeded
    pub executed: usize,

    /// Companies served from a `Done` cache entry
    pub cached: usize,

    /// Companies whose work function failed or timed out
    pub failed: usize,

    /// Companies missing upstream data (or duplicated in the batch)
    pub skipped: usize,

    /// Companies skipped because of a failure sentinel under `Permanent`
    pub skipped_failed: usize,

    /// Results for executed and cached companies
    pub outputs: BTreeMap<CompanyKey, T>,

    /// Error messages for failed and skipped-as-failed companies
    pub failures: BTreeMap<CompanyKey, String>,

    pub elapsed: Duration,
}

impl<T> StageReport<T> {
    fn new(stage: Stage) -> Self {
        Self {
            stage,
            executed: 0,
            cached: 0,
            failed: 0,
            skipped: 0,
            skipped_failed: 0,
            outputs: BTreeMap::new(),
            failures: BTreeMap::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Whether no company failed in this invocation.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Type-erased counts for reporting.
    pub fn summary(&self) -> StageSummary {
        StageSummary {
            stage: self.stage,
            executed: self.executed,
            cached: self.cached,
            failed: self.failed,
            skipped: self.skipped,
            skipped_failed: self.skipped_failed,
            failures: self.failures.clone(),
            elapsed: self.elapsed,
        }
    }
}

/// [`StageReport`] without the outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct StageSummary {
    pub stage: Stage,
    pub executed: usize,
    pub cached: usize,
    pub failed: usize,
    pub skipped: usize,
    pub skipped_failed: usize,
    pub failures: BTreeMap<CompanyKey, String>,
    pub elapsed: Duration,
}

impl StageSummary {
    pub fn total(&self) -> usize {
        self.executed + self.cached + self.failed + self.skipped + self.skipped_failed
    }
}

/// Executes stage workers against the cache with a bounded pool.
#[derive(Clone)]
pub struct StageRunner {
    cache: Arc<dyn StageCache>,
    concurrency: usize,
    timeout: Duration,
    retry: RetryPolicy,
}

impl StageRunner {
    /// Runner with 10 workers, a 300 s deadline and `Retry`.
    pub fn new(cache: Arc<dyn StageCache>) -> Self {
        Self {
            cache,
            concurrency: 10,
            timeout: Duration::from_secs(300),
            retry: RetryPolicy::Retry,
        }
    }

    /// Runner with the settings `config` gives `stage`.
    pub fn for_stage(cache: Arc<dyn StageCache>, config: &PipelineConfig, stage: Stage) -> Self {
        Self::new(cache)
            .with_concurrency(config.concurrency)
            .with_timeout(config.timeout(stage))
            .with_retry_policy(config.retry_policy(stage))
    }

    /// Set the pool size (clamped to at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn cache(&self) -> &Arc<dyn StageCache> {
        &self.cache
    }

    /// Run `worker` over `records`, enriching them in place.
    ///
    /// Per-company failures are recorded in the report and the cache; only
    /// a cache failure aborts the stage, and entries written before it
    /// remain.
    pub async fn run<W: StageWorker>(
        &self,
        worker: &W,
        records: &mut [CompanyRecord],
    ) -> Result<StageReport<W::Output>> {
        let stage = worker.stage();
        let started = Instant::now();
        let mut report = StageReport::new(stage);
        let mut seen = HashSet::new();
        let mut pending = Vec::new();

        for (idx, record) in records.iter_mut().enumerate() {
            if !seen.insert(record.key.clone()) {
                warn!(stage = %stage, company = %record.key, "Duplicate company in batch, skipping");
                report.skipped += 1;
                continue;
            }

            if !worker.is_ready(record) {
                debug!(stage = %stage, company = %record.key, "Upstream data missing, skipping");
                report.skipped += 1;
                continue;
            }

            if !stage.is_cached() {
                pending.push(idx);
                continue;
            }

            match read_entry::<W::Output>(self.cache.as_ref(), stage, &record.key).await? {
                Some(CacheEntry::Done { value }) => {
                    worker.apply(record, value.clone());
                    report.outputs.insert(record.key.clone(), value);
                    report.cached += 1;
                }
                Some(CacheEntry::Failed { error, .. }) if self.retry == RetryPolicy::Permanent => {
                    debug!(stage = %stage, company = %record.key, "Previous failure is permanent, skipping");
                    report.failures.insert(record.key.clone(), error);
                    report.skipped_failed += 1;
                }
                Some(CacheEntry::Failed { .. }) | None => pending.push(idx),
            }
        }

        info!(
            stage = %stage,
            pending = pending.len(),
            cached = report.cached,
            concurrency = self.concurrency,
            "Starting stage"
        );

        let mut outcomes = Vec::with_capacity(pending.len());
        {
            let shared: &[CompanyRecord] = records;
            let mut in_flight = stream::iter(pending)
                .map(|idx| self.process(worker, idx, &shared[idx]))
                .buffer_unordered(self.concurrency);

            while let Some(outcome) = in_flight.next().await {
                outcomes.push(outcome?);
            }
        }

        for (idx, outcome) in outcomes {
            let record = &mut records[idx];
            match outcome {
                Ok(output) => {
                    worker.apply(record, output.clone());
                    report.outputs.insert(record.key.clone(), output);
                    report.executed += 1;
                }
                Err(e) => {
                    report.failures.insert(record.key.clone(), e.to_string());
                    report.failed += 1;
                }
            }
        }

        report.elapsed = started.elapsed();
        info!(
            stage = %stage,
            executed = report.executed,
            cached = report.cached,
            failed = report.failed,
            skipped = report.skipped,
            skipped_failed = report.skipped_failed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Stage complete"
        );

        Ok(report)
    }

    /// Run one company and persist the outcome.
    async fn process<W: StageWorker>(
        &self,
        worker: &W,
        idx: usize,
        record: &CompanyRecord,
    ) -> Result<(usize, StageResult<W::Output>)> {
        let stage = worker.stage();
        debug!(stage = %stage, company = %record.key, "Processing company");

        let outcome = match tokio::time::timeout(self.timeout, worker.run(record)).await {
            Ok(result) => result,
            Err(_) => Err(StageError::Timeout {
                secs: self.timeout.as_secs(),
            }),
        };

        if stage.is_cached() {
            match &outcome {
                Ok(output) => {
                    write_entry(self.cache.as_ref(), stage, &record.key, &CacheEntry::done(output))
                        .await?;
                }
                Err(e) => {
                    write_entry(
                        self.cache.as_ref(),
                        stage,
                        &record.key,
                        &CacheEntry::<()>::failed(e.to_string()),
                    )
                    .await?;
                }
            }
        }

        if let Err(e) = &outcome {
            warn!(stage = %stage, company = %record.key, error = %e, "Company failed");
        }

        Ok((idx, outcome))
    }
}

type Readiness = dyn Fn(&CompanyRecord) -> bool + Send + Sync;

/// Adapts an async closure into a [`StageWorker`].
///
/// The closure receives an owned copy of the record. Results are only
/// reported and cached; nothing is merged into the record.
///
/// ```rust,ignore
/// let worker = FnWorker::new(Stage::FindSites, |record: CompanyRecord| async move {
///     Ok::<_, StageError>(record.name.len())
/// });
/// let report = runner.run(&worker, &mut records).await?;
/// ```
pub struct FnWorker<F, T> {
    stage: Stage,
    f: F,
    readiness: Option<Box<Readiness>>,
    _output: PhantomData<fn() -> T>,
}

impl<F, Fut, T> FnWorker<F, T>
where
    F: Fn(CompanyRecord) -> Fut + Send + Sync,
    Fut: Future<Output = StageResult<T>> + Send,
{
    pub fn new(stage: Stage, f: F) -> Self {
        Self {
            stage,
            f,
            readiness: None,
            _output: PhantomData,
        }
    }

    /// Skip records for which `ready` returns false.
    pub fn with_readiness(mut self, ready: impl Fn(&CompanyRecord) -> bool + Send + Sync + 'static) -> Self {
        self.readiness = Some(Box::new(ready));
        self
    }
}

#[async_trait]
impl<F, Fut, T> StageWorker for FnWorker<F, T>
where
    F: Fn(CompanyRecord) -> Fut + Send + Sync,
    Fut: Future<Output = StageResult<T>> + Send,
    T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    type Output = T;

    fn stage(&self) -> Stage {
        self.stage
    }

    fn is_ready(&self, record: &CompanyRecord) -> bool {
        self.readiness.as_ref().map_or(true, |ready| ready(record))
    }

    async fn run(&self, record: &CompanyRecord) -> StageResult<T> {
        (self.f)(record.clone()).await
    }

    fn apply(&self, _record: &mut CompanyRecord, _output: T) {}
}
