//! Testing utilities including mock implementations.
//!
//! These let applications and tests drive the pipeline without making real
//! crawl, model, or storage calls. Every mock is cheaply cloneable and clones
//! share state, so a test can keep a handle for assertions after handing a
//! clone to the pipeline.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::{CrawlError, CrawlResult, GenerationError, GenerationResult, StorageError, StorageResult};
use crate::traits::{
    ai::{Generator, Inference, InferenceRequest},
    crawler::{CrawledPage, DownloadedFile, WebCrawler},
    storage::BlobStorage,
};

/// Record of a call made to the mock crawler.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCrawlerCall {
    Fetch { url: String },
    ContentType { url: String },
    Download { url: String, user_agent: Option<String> },
}

#[derive(Default)]
struct CrawlerState {
    pages: HashMap<String, CrawledPage>,
    content_types: HashMap<String, String>,
    files: HashMap<String, (Vec<u8>, Option<String>)>,

    /// Remaining forced failures per URL, as HTTP status codes
    fetch_failures: HashMap<String, VecDeque<u16>>,
    download_failures: HashMap<String, VecDeque<u16>>,

    calls: Vec<MockCrawlerCall>,
}

/// A mock crawler serving canned pages and files.
///
/// Unknown URLs fail with HTTP 404.
#[derive(Clone, Default)]
pub struct MockCrawler {
    state: Arc<RwLock<CrawlerState>>,
}

impl MockCrawler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve a page at its own URL.
    pub fn with_page(self, page: CrawledPage) -> Self {
        self.state.write().unwrap().pages.insert(page.url.clone(), page);
        self
    }

    /// Report a content type for HEAD requests.
    pub fn with_content_type(self, url: impl Into<String>, content_type: impl Into<String>) -> Self {
        self.state
            .write()
            .unwrap()
            .content_types
            .insert(url.into(), content_type.into());
        self
    }

    /// Serve a downloadable file.
    pub fn with_file(self, url: impl Into<String>, body: impl Into<Vec<u8>>, content_type: Option<&str>) -> Self {
        self.state
            .write()
            .unwrap()
            .files
            .insert(url.into(), (body.into(), content_type.map(str::to_string)));
        self
    }

    /// Fail the next fetches of `url` with the given statuses, in order.
    pub fn fail_fetch(self, url: impl Into<String>, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.state
            .write()
            .unwrap()
            .fetch_failures
            .insert(url.into(), statuses.into_iter().collect());
        self
    }

    /// Fail the next downloads of `url` with the given statuses, in order.
    pub fn fail_download(self, url: impl Into<String>, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.state
            .write()
            .unwrap()
            .download_failures
            .insert(url.into(), statuses.into_iter().collect());
        self
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<MockCrawlerCall> {
        self.state.read().unwrap().calls.clone()
    }

    pub fn fetch_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MockCrawlerCall::Fetch { .. }))
            .count()
    }

    pub fn download_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MockCrawlerCall::Download { .. }))
            .count()
    }

    fn next_failure(failures: &mut HashMap<String, VecDeque<u16>>, url: &str) -> Option<u16> {
        failures.get_mut(url).and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl WebCrawler for MockCrawler {
    async fn fetch(&self, url: &str) -> CrawlResult<CrawledPage> {
        let mut state = self.state.write().unwrap();
        state.calls.push(MockCrawlerCall::Fetch { url: url.to_string() });

        if let Some(status) = Self::next_failure(&mut state.fetch_failures, url) {
            return Err(CrawlError::Status { status, url: url.to_string() });
        }

        state.pages.get(url).cloned().ok_or_else(|| CrawlError::Status {
            status: 404,
            url: url.to_string(),
        })
    }

    async fn content_type(&self, url: &str) -> CrawlResult<Option<String>> {
        let mut state = self.state.write().unwrap();
        state.calls.push(MockCrawlerCall::ContentType { url: url.to_string() });

        let known = state.content_types.get(url).cloned();
        Ok(known.or_else(|| state.files.get(url).and_then(|(_, ct)| ct.clone())))
    }

    async fn download(
        &self,
        url: &str,
        destination: &Path,
        user_agent: Option<&str>,
    ) -> CrawlResult<DownloadedFile> {
        let file = {
            let mut state = self.state.write().unwrap();
            state.calls.push(MockCrawlerCall::Download {
                url: url.to_string(),
                user_agent: user_agent.map(str::to_string),
            });

            if let Some(status) = Self::next_failure(&mut state.download_failures, url) {
                return Err(CrawlError::Status { status, url: url.to_string() });
            }

            state.files.get(url).cloned().ok_or_else(|| CrawlError::Status {
                status: 404,
                url: url.to_string(),
            })?
        };

        let (body, content_type) = file;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(destination, body).await?;

        Ok(DownloadedFile {
            path: destination.to_path_buf(),
            content_type,
        })
    }
}

type Handler = dyn Fn(&InferenceRequest) -> GenerationResult<String> + Send + Sync;

#[derive(Default)]
struct GeneratorState {
    /// (needle, responses); the last response repeats once the rest are used
    rules: Vec<(String, VecDeque<String>)>,
    queue: VecDeque<String>,
    requests: Vec<InferenceRequest>,
}

/// A mock generative model.
///
/// Answers are chosen in order of precedence:
/// 1. a handler closure, if set
/// 2. the first rule whose needle appears in the last user message
/// 3. the next queued response
///
/// Anything else fails with [`GenerationError::Empty`].
#[derive(Clone, Default)]
pub struct MockGenerator {
    state: Arc<RwLock<GeneratorState>>,
    handler: Option<Arc<Handler>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every request with a closure.
    pub fn with_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&InferenceRequest) -> GenerationResult<String> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Answer prompts containing `needle` with `response`.
    pub fn with_rule(self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.with_rule_sequence(needle, [response.into()])
    }

    /// Answer successive prompts containing `needle` with `responses` in order.
    pub fn with_rule_sequence(
        self,
        needle: impl Into<String>,
        responses: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.state
            .write()
            .unwrap()
            .rules
            .push((needle.into(), responses.into_iter().map(Into::into).collect()));
        self
    }

    /// Queue a response for the next otherwise-unmatched request.
    pub fn push_response(self, response: impl Into<String>) -> Self {
        self.state.write().unwrap().queue.push_back(response.into());
        self
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.state.read().unwrap().requests.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.read().unwrap().requests.len()
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn infer(&self, request: &InferenceRequest) -> GenerationResult<Inference> {
        self.state.write().unwrap().requests.push(request.clone());

        if let Some(handler) = &self.handler {
            return (**handler)(request).map(Inference::new);
        }

        let prompt = request.last_prompt().unwrap_or_default().to_string();
        let mut state = self.state.write().unwrap();

        let matched = state
            .rules
            .iter_mut()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .and_then(|(_, responses)| {
                if responses.len() > 1 {
                    responses.pop_front()
                } else {
                    responses.front().cloned()
                }
            });

        matched
            .or_else(|| state.queue.pop_front())
            .map(Inference::new)
            .ok_or_else(|| GenerationError::Empty("no scripted response".into()))
    }
}

/// Record of an upload made to the mock storage.
#[derive(Debug, Clone, PartialEq)]
pub struct MockUpload {
    pub local_path: PathBuf,
    pub destination_key: String,
}

/// A mock blob store that records uploads.
#[derive(Clone, Default)]
pub struct MockBlobStorage {
    uploads: Arc<RwLock<Vec<MockUpload>>>,
    failing_keys: Arc<RwLock<Vec<String>>>,
}

impl MockBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail uploads whose key contains `needle`.
    pub fn fail_for(self, needle: impl Into<String>) -> Self {
        self.failing_keys.write().unwrap().push(needle.into());
        self
    }

    pub fn uploads(&self) -> Vec<MockUpload> {
        self.uploads.read().unwrap().clone()
    }
}

#[async_trait]
impl BlobStorage for MockBlobStorage {
    async fn upload(&self, local_path: &Path, destination_key: &str) -> StorageResult<String> {
        if !local_path.exists() {
            return Err(StorageError::Read {
                path: local_path.display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
            });
        }

        let failing = self
            .failing_keys
            .read()
            .unwrap()
            .iter()
            .any(|needle| destination_key.contains(needle.as_str()));
        if failing {
            return Err(StorageError::Config(format!("upload of {} rejected", destination_key)));
        }

        self.uploads.write().unwrap().push(MockUpload {
            local_path: local_path.to_path_buf(),
            destination_key: destination_key.to_string(),
        });
        Ok(format!("mock://bucket/{}", destination_key))
    }
}
