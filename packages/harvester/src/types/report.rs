//! Website and annual-report artifacts produced by the discovery stages.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::Validate;

/// Result of looking up a company's web presence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SiteDiscovery {
    /// The official homepage URL of the company
    pub official_website_link: Option<String>,

    /// The investor relations page or subdomain of the company
    pub investor_relations_page: Option<String>,
}

impl SiteDiscovery {
    /// Official website if known, else the investor relations page.
    pub fn primary_link(&self) -> Option<&str> {
        self.official_website_link
            .as_deref()
            .or(self.investor_relations_page.as_deref())
    }

    /// Crawl starting points, investor relations first.
    pub fn start_urls(&self) -> Vec<&str> {
        self.investor_relations_page
            .iter()
            .chain(self.official_website_link.iter())
            .map(String::as_str)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.official_website_link.is_none() && self.investor_relations_page.is_none()
    }
}

impl Validate for SiteDiscovery {
    fn validate(&self) -> Result<(), String> {
        if self.is_empty() {
            return Err("no site information found".into());
        }
        Ok(())
    }
}

/// Link to an annual financial report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportLink {
    pub url: String,

    /// Calendar year the report covers
    pub reference_year: Option<i32>,
}

impl ReportLink {
    pub fn new(url: impl Into<String>, reference_year: Option<i32>) -> Self {
        Self {
            url: url.into(),
            reference_year,
        }
    }
}

/// File format of a downloaded report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    Pdf,
    Html,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Pdf => "pdf",
            ReportFormat::Html => "html",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ReportFormat::Pdf => "application/pdf",
            ReportFormat::Html => "text/html",
        }
    }

    /// Infer from a file path extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("pdf") => ReportFormat::Pdf,
            _ => ReportFormat::Html,
        }
    }
}

/// A report saved to local disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadedReport {
    pub source: ReportLink,
    pub local_path: PathBuf,
    pub format: ReportFormat,
}

/// A report archived in blob storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredReport {
    pub local_path: PathBuf,
    pub remote_url: String,
}
