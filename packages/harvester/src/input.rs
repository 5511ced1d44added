//! Company list input.
//!
//! A delimited table with a header row. `NAME` is required, `ID` is
//! optional; any other columns are ignored.

use csv::ReaderBuilder;
use indexmap::IndexMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{PipelineError, Result};
use crate::types::company::{CompanyKey, CompanyRecord};

pub const NAME_COLUMN: &str = "NAME";
pub const ID_COLUMN: &str = "ID";

/// Load company records from a file.
pub fn load_companies(path: &Path, delimiter: u8) -> Result<Vec<CompanyRecord>> {
    let file = File::open(path)
        .map_err(|e| PipelineError::Input(format!("cannot open {}: {}", path.display(), e)))?;
    let records = read_companies(file, delimiter)?;
    info!(path = %path.display(), companies = records.len(), "Loaded company list");
    Ok(records)
}

/// Parse company records; duplicate keys keep the first occurrence.
pub fn read_companies<R: Read>(reader: R, delimiter: u8) -> Result<Vec<CompanyRecord>> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader.headers()?.clone();
    let name_idx = headers
        .iter()
        .position(|h| h == NAME_COLUMN)
        .ok_or_else(|| PipelineError::Input(format!("missing required column {}", NAME_COLUMN)))?;
    let id_idx = headers.iter().position(|h| h == ID_COLUMN);

    let mut companies: IndexMap<CompanyKey, CompanyRecord> = IndexMap::new();

    for (line, row) in reader.records().enumerate() {
        let row = row?;
        let name = row.get(name_idx).unwrap_or_default();
        let key = CompanyKey::from_name(name);
        if key.is_empty() {
            warn!(line = line + 2, "Skipping row without a usable company name");
            continue;
        }

        if companies.contains_key(&key) {
            warn!(line = line + 2, company = %key, name = %name, "Duplicate company, keeping first");
            continue;
        }

        let mut record = CompanyRecord::new(name);
        if let Some(id) = id_idx.and_then(|idx| row.get(idx)).filter(|id| !id.is_empty()) {
            record = record.with_id(id);
        }
        companies.insert(key, record);
    }

    Ok(companies.into_values().collect())
}
