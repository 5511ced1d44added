//! Data types for the harvesting pipeline.

pub mod company;
pub mod config;
pub mod financials;
pub mod nace;
pub mod report;
pub mod stage;

/// Field-level checks applied to model output after it parses.
pub trait Validate {
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}
