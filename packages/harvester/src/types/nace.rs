//! NACE activity codes and the operator-supplied taxonomy.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::types::Validate;

/// A NACE Rev. 2 classification, e.g. `C` or `C25`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NaceCode {
    /// Level 1 section letter
    pub section: String,

    /// Level 2 two-digit division, absent when only level 1 was determined
    pub division: Option<String>,
}

impl NaceCode {
    pub fn section(section: impl Into<String>) -> Self {
        Self {
            section: section.into(),
            division: None,
        }
    }

    pub fn with_division(mut self, division: impl Into<String>) -> Self {
        self.division = Some(division.into());
        self
    }

    pub fn code(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for NaceCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.section)?;
        if let Some(division) = &self.division {
            write!(f, "{}", division)?;
        }
        Ok(())
    }
}

/// Model answer for the level 1 section.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SectionAnswer {
    /// The level 1 NACE class the company belongs to (single letter)
    pub classification: String,
}

/// Model answer for the level 2 division.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DivisionAnswer {
    /// The level 2 NACE class the company belongs to (2 digit code)
    pub classification: String,
}

impl Validate for SectionAnswer {
    fn validate(&self) -> std::result::Result<(), String> {
        let letter = self.classification.trim();
        if letter.len() != 1 || !letter.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(format!("expected a single section letter, got {:?}", self.classification));
        }
        Ok(())
    }
}

impl Validate for DivisionAnswer {
    fn validate(&self) -> std::result::Result<(), String> {
        let code = self.classification.trim();
        if code.is_empty() || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(format!("expected a numeric division, got {:?}", self.classification));
        }
        Ok(())
    }
}

/// Two-level NACE taxonomy loaded from JSON files.
///
/// Level 1 maps section letters to descriptions. Level 2 maps each section
/// letter to its divisions, either as an object keyed by code or as a list.
#[derive(Debug, Clone, Default)]
pub struct NaceTaxonomy {
    pub level1: BTreeMap<String, Value>,
    pub level2: BTreeMap<String, Value>,
}

impl NaceTaxonomy {
    /// Load both levels from disk.
    pub fn load(level1_path: &Path, level2_path: &Path) -> Result<Self> {
        Ok(Self {
            level1: read_json_map(level1_path)?,
            level2: read_json_map(level2_path)?,
        })
    }

    pub fn from_maps(level1: BTreeMap<String, Value>, level2: BTreeMap<String, Value>) -> Self {
        Self { level1, level2 }
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.level1.contains_key(section)
    }

    /// Divisions belonging to a section.
    pub fn divisions(&self, section: &str) -> Option<&Value> {
        self.level2.get(section)
    }

    /// Whether `division` is listed under `section`.
    pub fn has_division(&self, section: &str, division: &str) -> bool {
        let Some(divisions) = self.divisions(section) else {
            return false;
        };
        let prefixed = format!("{}{}", section, division);

        match divisions {
            Value::Object(map) => map.contains_key(division) || map.contains_key(&prefixed),
            Value::Array(items) => items.iter().any(|item| match item {
                Value::String(s) => s.starts_with(division) || s.starts_with(&prefixed),
                Value::Object(obj) => obj
                    .values()
                    .any(|v| v.as_str().is_some_and(|s| s == division || s == prefixed)),
                _ => false,
            }),
            _ => false,
        }
    }
}

fn read_json_map(path: &Path) -> Result<BTreeMap<String, Value>> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| PipelineError::Setup(format!("cannot read {}: {}", path.display(), e)))?;
    serde_json::from_str(&raw)
        .map_err(|e| PipelineError::Setup(format!("invalid taxonomy {}: {}", path.display(), e)))
}
