//! Stage workers.
//!
//! Each worker owns one field of [`CompanyRecord`]:
//!
//! | stage            | worker             | fills        |
//! |------------------|--------------------|--------------|
//! | find-sites       | `SiteFinder`       | `site`       |
//! | find-reports     | `ReportFinder`     | `reports`    |
//! | download-reports | `ReportDownloader` | `downloads`  |
//! | upload-reports   | `ReportUploader`   | `uploads`    |
//! | extract-data     | `DataExtractor`    | `financials` |
//! | classify-nace    | `NaceClassifier`   | `nace`       |

pub mod classifier;
pub mod downloader;
pub mod extractor;
pub mod report_finder;
pub mod site_finder;
pub mod uploader;

pub use classifier::NaceClassifier;
pub use downloader::ReportDownloader;
pub use extractor::DataExtractor;
pub use report_finder::{ActionKind, CrawlAction, ReportFinder};
pub use site_finder::SiteFinder;
pub use uploader::ReportUploader;

use crate::pipeline::runner::StageOutput;
use crate::types::{
    company::CompanyRecord,
    financials::AnnualReportInfo,
    nace::NaceCode,
    report::{DownloadedReport, ReportLink, SiteDiscovery, StoredReport},
};

impl StageOutput for SiteDiscovery {
    fn apply(self, record: &mut CompanyRecord) {
        record.site = Some(self);
    }
}

impl StageOutput for Vec<ReportLink> {
    fn apply(self, record: &mut CompanyRecord) {
        record.reports = self;
    }
}

impl StageOutput for Vec<DownloadedReport> {
    fn apply(self, record: &mut CompanyRecord) {
        record.downloads = self;
    }
}

impl StageOutput for Vec<StoredReport> {
    fn apply(self, record: &mut CompanyRecord) {
        record.uploads = self;
    }
}

impl StageOutput for AnnualReportInfo {
    fn apply(self, record: &mut CompanyRecord) {
        record.financials = Some(self);
    }
}

impl StageOutput for NaceCode {
    fn apply(self, record: &mut CompanyRecord) {
        record.nace = Some(self);
    }
}
