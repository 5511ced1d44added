//! Company identity and the record that accumulates stage outputs.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{
    financials::AnnualReportInfo,
    nace::NaceCode,
    report::{DownloadedReport, ReportLink, SiteDiscovery, StoredReport},
};

/// Stable identifier used for caching and record merging.
///
/// Derived from the company name: lower-cased, every run of
/// non-alphanumeric characters collapsed to a single `_`, no leading or
/// trailing `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompanyKey(String);

impl CompanyKey {
    /// Normalize a company name into a key.
    pub fn from_name(name: &str) -> Self {
        let mut key = String::with_capacity(name.len());
        let mut pending_sep = false;

        for c in name.chars() {
            if c.is_alphanumeric() {
                if pending_sep && !key.is_empty() {
                    key.push('_');
                }
                pending_sep = false;
                key.extend(c.to_lowercase());
            } else {
                pending_sep = true;
            }
        }

        Self(key)
    }

    /// Use an already-normalized key verbatim.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CompanyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CompanyKey {
    fn from(name: &str) -> Self {
        Self::from_name(name)
    }
}

/// Everything known about one company, enriched stage by stage.
///
/// Each field is owned by exactly one stage; downstream stages only read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyRecord {
    pub key: CompanyKey,

    /// Identifier from the input table, if any
    pub id: Option<String>,

    /// Company name as given in the input
    pub name: String,

    /// find-sites
    pub site: Option<SiteDiscovery>,

    /// find-reports, latest first
    pub reports: Vec<ReportLink>,

    /// download-reports
    pub downloads: Vec<DownloadedReport>,

    /// upload-reports
    pub uploads: Vec<StoredReport>,

    /// extract-data
    pub financials: Option<AnnualReportInfo>,

    /// classify-nace
    pub nace: Option<NaceCode>,
}

impl CompanyRecord {
    /// Create a record from a company name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            key: CompanyKey::from_name(&name),
            id: None,
            name,
            site: None,
            reports: Vec::new(),
            downloads: Vec::new(),
            uploads: Vec::new(),
            financials: None,
            nace: None,
        }
    }

    /// Set the input identifier.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Override the derived key.
    pub fn with_key(mut self, key: CompanyKey) -> Self {
        self.key = key;
        self
    }

    /// The preferred landing page: official site, else investor relations.
    pub fn website(&self) -> Option<&str> {
        self.site.as_ref().and_then(|s| s.primary_link())
    }

    /// The most recent report link, if any.
    pub fn latest_report(&self) -> Option<&ReportLink> {
        self.reports.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_key_normalization() {
        assert_eq!(CompanyKey::from_name("ADECCO GROUP AG").as_str(), "adecco_group_ag");
        assert_eq!(CompanyKey::from_name("  Acme, Inc. ").as_str(), "acme_inc");
        assert_eq!(CompanyKey::from_name("A/B\\C").as_str(), "a_b_c");
        assert_eq!(CompanyKey::from_name("Nestlé S.A.").as_str(), "nestlé_s_a");
        assert!(CompanyKey::from_name("--").is_empty());
    }

    #[test]
    fn test_record_starts_empty() {
        let record = CompanyRecord::new("Globex Corp").with_id("42");
        assert_eq!(record.key.as_str(), "globex_corp");
        assert_eq!(record.id.as_deref(), Some("42"));
        assert!(record.website().is_none());
        assert!(record.latest_report().is_none());
    }

    proptest! {
        #[test]
        fn prop_key_is_idempotent(name in "[ a-zA-Z0-9éÉ.,&/_-]{0,40}") {
            let once = CompanyKey::from_name(&name);
            let twice = CompanyKey::from_name(once.as_str());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_key_has_no_edge_separators(name in "[ a-zA-Z0-9.,&-]{0,40}") {
            let key = CompanyKey::from_name(&name);
            prop_assert!(!key.as_str().starts_with('_'));
            prop_assert!(!key.as_str().ends_with('_'));
            prop_assert!(!key.as_str().contains("__"));
        }
    }
}
