//! Output tables.
//!
//! Two operator-supplied templates are filled in per company and written to
//! the output directory. Template columns and row order are preserved; only
//! the value cells of matching rows change.
//!
//! - discovery (`ID;NAME;TYPE;SRC;REFYEAR`): `TYPE=FIN_REP` rows get the
//!   report URL, `TYPE=WEBSITE` rows get the company website.
//! - extraction (`ID;NAME;VARIABLE;VALUE;SRC;REFYEAR;CURRENCY`): one row per
//!   variable, filled from the extracted financials and NACE code.

use chrono::{Datelike, Utc};
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::types::company::{CompanyKey, CompanyRecord};
use crate::types::config::PipelineConfig;

pub const DISCOVERY_FILE: &str = "discovery.csv";
pub const EXTRACTION_FILE: &str = "extraction.csv";

/// A template table held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    headers: StringRecord,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn read(path: &Path, delimiter: u8) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|e| PipelineError::Export(format!("cannot open template {}: {}", path.display(), e)))?;
        Self::from_reader(file, delimiter)
    }

    pub fn from_reader<R: Read>(reader: R, delimiter: u8) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers = reader.headers()?.clone();
        let width = headers.len();
        let mut rows = Vec::new();
        for row in reader.records() {
            let mut cells: Vec<String> = row?.iter().map(str::to_string).collect();
            cells.resize(width, String::new());
            rows.push(cells);
        }

        Ok(Self { headers, rows })
    }

    pub fn write(&self, path: &Path, delimiter: u8) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = std::fs::File::create(path)?;
        self.to_writer(file, delimiter)
    }

    pub fn to_writer<W: Write>(&self, writer: W, delimiter: u8) -> Result<()> {
        let mut writer = WriterBuilder::new()
            .delimiter(delimiter)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(writer);
        writer.write_record(&self.headers)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a required column.
    pub fn column(&self, name: &str) -> Result<usize> {
        self.headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| PipelineError::Export(format!("template is missing column {}", name)))
    }

    /// Cell value by row index and column name.
    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let col = self.column(column).ok()?;
        self.rows.get(row)?.get(col).map(String::as_str)
    }
}

/// What an export wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportReport {
    pub discovery_path: PathBuf,
    pub extraction_path: PathBuf,

    /// Companies found in at least one template
    pub companies_matched: usize,

    /// Template rows whose company is not in the batch
    pub rows_unmatched: usize,

    /// Rows that received a value
    pub rows_filled: usize,
}

/// Fill both templates from `records` and write them to the output directory.
pub fn export(records: &[CompanyRecord], config: &PipelineConfig) -> Result<ExportReport> {
    let by_key: HashMap<&CompanyKey, &CompanyRecord> = records.iter().map(|r| (&r.key, r)).collect();
    let current_year = Utc::now().year();

    let mut discovery = Table::read(&config.discovery_template, config.delimiter)?;
    let mut extraction = Table::read(&config.extraction_template, config.delimiter)?;

    let d = fill_discovery(&mut discovery, &by_key, current_year)?;
    let e = fill_extraction(&mut extraction, &by_key, current_year)?;

    let discovery_path = config.output_dir.join(DISCOVERY_FILE);
    let extraction_path = config.output_dir.join(EXTRACTION_FILE);
    discovery.write(&discovery_path, config.delimiter)?;
    extraction.write(&extraction_path, config.delimiter)?;

    let mut matched = d.matched;
    matched.extend(e.matched);

    let report = ExportReport {
        discovery_path,
        extraction_path,
        companies_matched: matched.len(),
        rows_unmatched: d.unmatched + e.unmatched,
        rows_filled: d.filled + e.filled,
    };
    info!(
        companies = report.companies_matched,
        rows_filled = report.rows_filled,
        rows_unmatched = report.rows_unmatched,
        output = %config.output_dir.display(),
        "Export written"
    );
    Ok(report)
}

/// Counters from filling one template.
#[derive(Debug, Default)]
pub struct FillStats {
    pub matched: std::collections::HashSet<CompanyKey>,
    pub unmatched: usize,
    pub filled: usize,
}

/// Fill `FIN_REP` and `WEBSITE` rows.
pub fn fill_discovery(
    table: &mut Table,
    records: &HashMap<&CompanyKey, &CompanyRecord>,
    current_year: i32,
) -> Result<FillStats> {
    let name = table.column("NAME")?;
    let kind = table.column("TYPE")?;
    let src = table.column("SRC")?;
    let refyear = table.column("REFYEAR")?;
    let mut stats = FillStats::default();

    for row in &mut table.rows {
        let key = CompanyKey::from_name(&row[name]);
        let Some(record) = records.get(&key) else {
            stats.unmatched += 1;
            continue;
        };
        stats.matched.insert(key);

        let value = match row[kind].trim() {
            "FIN_REP" => record
                .latest_report()
                .zip(reference_year(record))
                .map(|(report, year)| (report.url.clone(), year)),
            "WEBSITE" => record.website().map(|site| (with_scheme(site), current_year)),
            other => {
                debug!(kind = %other, "Unknown discovery row type");
                None
            }
        };

        if let Some((url, year)) = value {
            row[src] = url;
            row[refyear] = year.to_string();
            stats.filled += 1;
        }
    }

    Ok(stats)
}

/// Fill one row per extracted variable.
///
/// `WEBSITE` needs only a site. The report-derived variables are filled only
/// when a reference year is known.
pub fn fill_extraction(
    table: &mut Table,
    records: &HashMap<&CompanyKey, &CompanyRecord>,
    current_year: i32,
) -> Result<FillStats> {
    let name = table.column("NAME")?;
    let variable = table.column("VARIABLE")?;
    let value_col = table.column("VALUE")?;
    let src = table.column("SRC")?;
    let refyear = table.column("REFYEAR")?;
    let currency = table.column("CURRENCY")?;
    let mut stats = FillStats::default();

    for row in &mut table.rows {
        let key = CompanyKey::from_name(&row[name]);
        let Some(record) = records.get(&key) else {
            stats.unmatched += 1;
            continue;
        };
        stats.matched.insert(key);

        let Some(cell) = extraction_value(record, row[variable].trim(), current_year) else {
            continue;
        };

        row[value_col] = cell.value;
        row[src] = cell.source;
        row[refyear] = cell.year.to_string();
        if let Some(code) = cell.currency {
            row[currency] = code;
        }
        stats.filled += 1;
    }

    Ok(stats)
}

struct Cell {
    value: String,
    source: String,
    year: i32,
    currency: Option<String>,
}

fn extraction_value(record: &CompanyRecord, variable: &str, current_year: i32) -> Option<Cell> {
    if variable == "WEBSITE" {
        let site = record.website()?;
        return Some(Cell {
            value: site.to_string(),
            source: with_scheme(site),
            year: current_year,
            currency: None,
        });
    }

    let report = record.latest_report()?;
    let info = record.financials.as_ref()?;
    let year = reference_year(record)?;

    let cell = |value: String, currency: Option<&String>| Cell {
        value,
        source: report.url.clone(),
        year,
        currency: currency.cloned(),
    };

    match variable {
        "COUNTRY" => info.country_code.clone().map(|c| cell(c, None)),
        "EMPLOYEES" => info.employee_count.map(|n| cell(n.to_string(), None)),
        "TURNOVER" => info
            .net_turnover
            .zip(info.currency_code_turnover.as_ref())
            .map(|(n, cur)| cell(n.to_string(), Some(cur))),
        "ASSETS" => info
            .assets_value
            .zip(info.currency_code_assets.as_ref())
            .map(|(n, cur)| cell(n.to_string(), Some(cur))),
        "ACTIVITY" => record.nace.as_ref().map(|code| cell(code.code(), None)),
        _ => None,
    }
}

/// The later of the report-link year and the extracted year.
pub fn reference_year(record: &CompanyRecord) -> Option<i32> {
    let link_year = record.latest_report().and_then(|r| r.reference_year);
    let extracted_year = record.financials.as_ref().and_then(|f| f.reference_year);
    link_year.max(extracted_year)
}

fn with_scheme(url: &str) -> String {
    if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    }
}
