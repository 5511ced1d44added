//! Configuration types for the harvesting pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::stage::{RetryPolicy, Stage};

/// Per-stage overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageSettings {
    /// What to do with companies whose previous attempt failed.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Deadline for one company's work, overriding the pipeline default.
    pub timeout_secs: Option<u64>,
}

/// Configuration for a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum companies processed concurrently within a stage.
    ///
    /// Default: 10.
    pub concurrency: usize,

    /// Deadline for one company's work in one stage.
    ///
    /// Default: 300 seconds.
    pub timeout_secs: u64,

    /// Overrides keyed by stage.
    #[serde(default)]
    pub stages: HashMap<Stage, StageSettings>,

    /// Maximum model turns per start URL when crawling for reports.
    ///
    /// Default: 10.
    pub max_pages_per_company: usize,

    /// Where downloaded reports are written.
    pub download_dir: PathBuf,

    /// Where filled-in output tables are written.
    pub output_dir: PathBuf,

    /// Discovery output template (`ID;NAME;TYPE;SRC;REFYEAR`).
    pub discovery_template: PathBuf,

    /// Extraction output template (`ID;NAME;VARIABLE;VALUE;SRC;REFYEAR;CURRENCY`).
    pub extraction_template: PathBuf,

    /// Level 1 NACE taxonomy JSON.
    pub nace_level1_path: PathBuf,

    /// Level 2 NACE taxonomy JSON.
    pub nace_level2_path: PathBuf,

    /// Field delimiter for input and output tables.
    pub delimiter: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            timeout_secs: 300,
            stages: HashMap::new(),
            max_pages_per_company: 10,
            download_dir: PathBuf::from("data/downloads"),
            output_dir: PathBuf::from("data/output"),
            discovery_template: PathBuf::from("data/templates/discovery.csv"),
            extraction_template: PathBuf::from("data/templates/extraction.csv"),
            nace_level1_path: PathBuf::from("data/nace/nace2lvl1.json"),
            nace_level2_path: PathBuf::from("data/nace/nace2lvl2.json"),
            delimiter: b';',
        }
    }
}

impl PipelineConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the worker pool size (clamped to at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the default per-company deadline.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Override the deadline for one stage.
    pub fn with_stage_timeout(mut self, stage: Stage, secs: u64) -> Self {
        self.stages.entry(stage).or_default().timeout_secs = Some(secs);
        self
    }

    /// Set the retry policy for one stage.
    pub fn with_retry_policy(mut self, stage: Stage, retry: RetryPolicy) -> Self {
        self.stages.entry(stage).or_default().retry = retry;
        self
    }

    pub fn with_max_pages(mut self, max: usize) -> Self {
        self.max_pages_per_company = max;
        self
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_templates(mut self, discovery: impl Into<PathBuf>, extraction: impl Into<PathBuf>) -> Self {
        self.discovery_template = discovery.into();
        self.extraction_template = extraction.into();
        self
    }

    pub fn with_nace_paths(mut self, level1: impl Into<PathBuf>, level2: impl Into<PathBuf>) -> Self {
        self.nace_level1_path = level1.into();
        self.nace_level2_path = level2.into();
        self
    }

    /// Retry policy in effect for a stage.
    pub fn retry_policy(&self, stage: Stage) -> RetryPolicy {
        self.stages.get(&stage).map(|s| s.retry).unwrap_or_default()
    }

    /// Deadline in effect for a stage.
    pub fn timeout(&self, stage: Stage) -> Duration {
        let secs = self
            .stages
            .get(&stage)
            .and_then(|s| s.timeout_secs)
            .unwrap_or(self.timeout_secs);
        Duration::from_secs(secs)
    }
}
