//! Pipeline stages and their per-company lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One discrete transformation applied to every company.
///
/// Declaration order is execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    FindSites,
    FindReports,
    DownloadReports,
    UploadReports,
    ExtractData,
    ClassifyNace,
    ExportData,
}

impl Stage {
    /// All stages in dependency order.
    pub const ALL: [Stage; 7] = [
        Stage::FindSites,
        Stage::FindReports,
        Stage::DownloadReports,
        Stage::UploadReports,
        Stage::ExtractData,
        Stage::ClassifyNace,
        Stage::ExportData,
    ];

    /// Stable name, used as the cache namespace.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::FindSites => "find-sites",
            Stage::FindReports => "find-reports",
            Stage::DownloadReports => "download-reports",
            Stage::UploadReports => "upload-reports",
            Stage::ExtractData => "extract-data",
            Stage::ClassifyNace => "classify-nace",
            Stage::ExportData => "export-data",
        }
    }

    /// Stages that run strictly before this one.
    pub fn upstream(&self) -> impl Iterator<Item = Stage> + '_ {
        Stage::ALL.into_iter().take_while(move |s| s != self)
    }

    /// Whether results of this stage are cached per company.
    ///
    /// Export is a batch finisher over all companies and always reruns.
    pub fn is_cached(&self) -> bool {
        !matches!(self, Stage::ExportData)
    }

    /// Cache namespace holding model transcripts for this stage.
    pub fn transcript_namespace(&self) -> String {
        format!("transcript:{}", self.as_str())
    }

    /// External services this stage calls.
    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            Stage::FindSites | Stage::FindReports => &[Capability::Crawler, Capability::Generator],
            Stage::DownloadReports => &[Capability::Crawler],
            Stage::UploadReports => &[Capability::Storage],
            Stage::ExtractData | Stage::ClassifyNace => &[Capability::Generator],
            Stage::ExportData => &[],
        }
    }
}

/// An external service a stage depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Crawler,
    Generator,
    Storage,
}

impl Capability {
    /// Whether any of `stages` calls this service.
    pub fn needed_by(self, stages: &[Stage]) -> bool {
        stages.iter().any(|stage| stage.capabilities().contains(&self))
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("unknown stage: {}", s))
    }
}

/// Lifecycle of one company within one stage.
///
/// `Done` is terminal. `InProgress` only exists while a worker holds the
/// company; it is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageStatus {
    NotStarted,
    InProgress,
    Done,
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageStatus::NotStarted => "not started",
            StageStatus::InProgress => "in progress",
            StageStatus::Done => "done",
            StageStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// What a later run does with a company whose last attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Attempt the company again.
    #[default]
    Retry,

    /// Respect the failure sentinel and skip the company.
    Permanent,
}
