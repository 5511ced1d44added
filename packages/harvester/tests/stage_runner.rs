//! Integration tests for the stage runner's caching and pool contract.
//!
//! Covers:
//! 1. Idempotence - a second run is served entirely from cache
//! 2. Resumability - an interrupted batch only redoes the missing companies
//! 3. Isolation - one failing company does not affect the others
//! 4. Concurrency bound - never more than N companies in flight, and a
//!    freed slot is refilled without waiting for slower companies
//! 5. Order independence - results are keyed by company, not position

use async_trait::async_trait;
use futures::future::BoxFuture;
use harvester::{
    error::{CacheResult, StageResult}, CacheError, CompanyKey, CompanyRecord, FnWorker, MemoryCache, PipelineError, Stage,
    StageCache, StageError, StageRunner,
};
use proptest::prelude::*;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn companies(n: usize) -> Vec<CompanyRecord> {
    (0..n).map(|i| CompanyRecord::new(format!("Company {}", i))).collect()
}

/// Worker that counts invocations and returns the upper-cased key.
fn counting_worker(
    calls: Arc<AtomicUsize>,
) -> FnWorker<impl Fn(CompanyRecord) -> BoxFuture<'static, StageResult<String>> + Send + Sync, String> {
    FnWorker::new(
        Stage::FindSites,
        move |record: CompanyRecord| -> BoxFuture<'static, StageResult<String>> {
            let calls = calls.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(record.key.as_str().to_uppercase())
            })
        },
    )
}

#[tokio::test]
async fn test_second_run_is_served_from_cache() {
    let cache = Arc::new(MemoryCache::new());
    let calls = Arc::new(AtomicUsize::new(0));
    let worker = counting_worker(calls.clone());
    let runner = StageRunner::new(cache.clone());
    let mut records = companies(5);

    let first = runner.run(&worker, &mut records).await.unwrap();
    let second = runner.run(&worker, &mut records).await.unwrap();

    assert_eq!(first.executed, 5);
    assert_eq!(second.executed, 0);
    assert_eq!(second.cached, 5);
    assert_eq!(calls.load(Ordering::SeqCst), 5);
    assert_eq!(first.outputs, second.outputs);
}

#[tokio::test]
async fn test_resume_processes_only_remaining_companies() {
    let cache = Arc::new(MemoryCache::new());
    let mut records = companies(10);

    // A previous run got through the first six companies.
    let done_calls = Arc::new(AtomicUsize::new(0));
    StageRunner::new(cache.clone())
        .run(&counting_worker(done_calls), &mut records[..6])
        .await
        .unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let report = StageRunner::new(cache.clone())
        .run(&counting_worker(calls.clone()), &mut records)
        .await
        .unwrap();

    assert_eq!(report.cached, 6);
    assert_eq!(report.executed, 4);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

/// Cache whose writes start failing after a fixed number of puts.
struct FlakyCache {
    inner: Arc<MemoryCache>,
    puts_left: AtomicUsize,
}

#[async_trait]
impl StageCache for FlakyCache {
    async fn get(&self, namespace: &str, key: &str) -> CacheResult<Option<Value>> {
        self.inner.get(namespace, key).await
    }

    async fn put(&self, namespace: &str, key: &str, value: &Value) -> CacheResult<()> {
        let ok = self
            .puts_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !ok {
            return Err(CacheError::Backend("store went away".into()));
        }
        self.inner.put(namespace, key, value).await
    }

    async fn delete(&self, namespace: &str, key: &str) -> CacheResult<()> {
        self.inner.delete(namespace, key).await
    }

    async fn keys(&self, namespace: &str) -> CacheResult<Vec<String>> {
        self.inner.keys(namespace).await
    }
}

#[tokio::test]
async fn test_cache_failure_aborts_stage_and_keeps_written_entries() {
    let store = Arc::new(MemoryCache::new());
    let flaky = Arc::new(FlakyCache {
        inner: store.clone(),
        puts_left: AtomicUsize::new(6),
    });
    let mut records = companies(10);

    let interrupted = StageRunner::new(flaky)
        .with_concurrency(1)
        .run(&counting_worker(Arc::new(AtomicUsize::new(0))), &mut records)
        .await;
    assert!(matches!(interrupted, Err(PipelineError::Cache(_))));
    assert_eq!(store.keys("find-sites").await.unwrap().len(), 6);

    let calls = Arc::new(AtomicUsize::new(0));
    let report = StageRunner::new(store)
        .run(&counting_worker(calls.clone()), &mut records)
        .await
        .unwrap();
    assert_eq!(report.executed, 4);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_failing_company_is_isolated() {
    let runner = StageRunner::new(Arc::new(MemoryCache::new()));
    let worker = FnWorker::new(Stage::ExtractData, |record: CompanyRecord| async move {
        if record.key.as_str() == "bad" {
            Err(StageError::Other("boom".into()))
        } else {
            Ok(format!("result for {}", record.key))
        }
    });

    let mut records: Vec<_> = ["acme", "bad", "globex"].into_iter().map(CompanyRecord::new).collect();
    let report = runner.run(&worker, &mut records).await.unwrap();

    assert_eq!(report.executed, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.outputs[&CompanyKey::new("acme")], "result for acme");
    assert_eq!(report.outputs[&CompanyKey::new("globex")], "result for globex");
    assert!(!report.outputs.contains_key(&CompanyKey::new("bad")));
    assert_eq!(report.failures[&CompanyKey::new("bad")], "boom");
}

#[tokio::test]
async fn test_no_more_than_n_in_flight() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let worker = {
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        FnWorker::new(Stage::DownloadReports, move |_record: CompanyRecord| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
    };

    let mut records = companies(10);
    let report = StageRunner::new(Arc::new(MemoryCache::new()))
        .with_concurrency(3)
        .run(&worker, &mut records)
        .await
        .unwrap();

    assert_eq!(report.executed, 10);
    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(peak.load(Ordering::SeqCst) >= 2);
}

#[tokio::test]
async fn test_slow_company_does_not_hold_back_the_pool() {
    let finished = Arc::new(Mutex::new(Vec::new()));

    let worker = {
        let finished = finished.clone();
        FnWorker::new(Stage::DownloadReports, move |record: CompanyRecord| {
            let finished = finished.clone();
            async move {
                let delay = if record.name == "Slow" { 300 } else { 10 };
                tokio::time::sleep(Duration::from_millis(delay)).await;
                finished.lock().unwrap().push(record.name.clone());
                Ok(())
            }
        })
    };

    let mut records = vec![CompanyRecord::new("Slow")];
    records.extend(companies(6));

    let report = StageRunner::new(Arc::new(MemoryCache::new()))
        .with_concurrency(2)
        .run(&worker, &mut records)
        .await
        .unwrap();

    assert_eq!(report.executed, 7);
    let order = finished.lock().unwrap().clone();
    assert_eq!(order.len(), 7);
    // The other slot works through all six fast companies meanwhile.
    assert_eq!(order.last().map(String::as_str), Some("Slow"));
}

async fn run_in_order(names: Vec<String>) -> BTreeMap<CompanyKey, String> {
    let worker = FnWorker::new(Stage::FindReports, |record: CompanyRecord| async move {
        // uneven delays so completion order differs from input order
        tokio::time::sleep(Duration::from_millis((record.name.len() % 4) as u64)).await;
        Ok(format!("{}:{}", record.key, record.name.len()))
    });
    let mut records: Vec<_> = names.into_iter().map(CompanyRecord::new).collect();
    StageRunner::new(Arc::new(MemoryCache::new()))
        .with_concurrency(4)
        .run(&worker, &mut records)
        .await
        .unwrap()
        .outputs
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_results_do_not_depend_on_input_order(
        shuffled in Just((0..8).map(|i| format!("Company {}", i)).collect::<Vec<_>>()).prop_shuffle()
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let ordered = rt.block_on(run_in_order((0..8).map(|i| format!("Company {}", i)).collect()));
        let reordered = rt.block_on(run_in_order(shuffled));
        prop_assert_eq!(ordered, reordered);
    }
}
