//! Stage execution.
//!
//! - [`runner`] - cache-aware bounded worker pool for one stage
//! - [`stages`] - the per-company work of each stage
//! - [`orchestrator`] - stage ordering and upstream hydration
//! - [`structured`] / [`prompts`] - model calls shared by the stages
//! - [`transcript`] - stored model conversations

pub mod orchestrator;
pub mod prompts;
pub mod runner;
pub mod stages;
pub mod structured;
pub mod transcript;

pub use orchestrator::{CompanyStatus, Pipeline, Services};
pub use runner::{FnWorker, StageOutput, StageReport, StageRunner, StageSummary, StageWorker};
pub use stages::{
    ActionKind, CrawlAction, DataExtractor, NaceClassifier, ReportDownloader, ReportFinder, ReportUploader,
    SiteFinder,
};
pub use structured::{infer_structured, parse_structured, strip_code_fences};
pub use transcript::{Transcript, TranscriptLog};
