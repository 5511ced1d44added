//! Financial facts extracted from an annual report.

use chrono::Datelike;
use schemars::JsonSchema;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};

use crate::types::Validate;

/// Earliest reference year accepted from the model.
const MIN_REFERENCE_YEAR: i32 = 1990;

/// Financial and general information extracted from an annual report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnnualReportInfo {
    /// The ISO 3166-1 alpha-2 country code where the company is headquartered (2 uppercase letters).
    #[serde(default)]
    pub country_code: Option<String>,

    /// The number of employees employed by the company (worldwide).
    #[serde(default, deserialize_with = "whole_number")]
    #[schemars(with = "Option<i64>")]
    pub employee_count: Option<i64>,

    /// Total assets of the company expressed in nominal value.
    #[serde(default, deserialize_with = "whole_number")]
    #[schemars(with = "Option<i64>")]
    pub assets_value: Option<i64>,

    /// Net turnover for the company in the financial year.
    #[serde(default, deserialize_with = "whole_number")]
    #[schemars(with = "Option<i64>")]
    pub net_turnover: Option<i64>,

    /// ISO 4217 currency code in which assets_value is denominated (3 uppercase letters).
    #[serde(default)]
    pub currency_code_assets: Option<String>,

    /// ISO 4217 currency code in which net_turnover is denominated (3 uppercase letters).
    #[serde(default)]
    pub currency_code_turnover: Option<String>,

    /// Brief description (5 sentences max) of the main activity performed by the company.
    #[serde(default)]
    pub main_activity_description: Option<String>,

    /// The calendar year of the closing date of the financial year the report covers.
    #[serde(default)]
    pub reference_year: Option<i32>,
}

/// An integer, also when written as a float with no fraction (`9000000000.0`).
fn whole_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let Some(number) = Option::<serde_json::Number>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let Some(n) = number.as_i64() {
        return Ok(Some(n));
    }
    match number.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => Ok(Some(f as i64)),
        _ => Err(D::Error::custom(format!("expected a whole number, got {}", number))),
    }
}

fn is_upper_code(value: &str, len: usize) -> bool {
    value.len() == len && value.chars().all(|c| c.is_ascii_uppercase())
}

impl Validate for AnnualReportInfo {
    fn validate(&self) -> Result<(), String> {
        if let Some(code) = &self.country_code {
            if !is_upper_code(code, 2) {
                return Err(format!("country_code must match ^[A-Z]{{2}}$, got {:?}", code));
            }
        }

        for (field, code) in [
            ("currency_code_assets", &self.currency_code_assets),
            ("currency_code_turnover", &self.currency_code_turnover),
        ] {
            if let Some(code) = code {
                if !is_upper_code(code, 3) {
                    return Err(format!("{} must match ^[A-Z]{{3}}$, got {:?}", field, code));
                }
            }
        }

        for (field, value) in [
            ("employee_count", self.employee_count),
            ("assets_value", self.assets_value),
            ("net_turnover", self.net_turnover),
        ] {
            if matches!(value, Some(v) if v < 0) {
                return Err(format!("{} must not be negative", field));
            }
        }

        if let Some(year) = self.reference_year {
            let max = chrono::Utc::now().year() + 1;
            if !(MIN_REFERENCE_YEAR..=max).contains(&year) {
                return Err(format!("reference_year {} outside {}..={}", year, MIN_REFERENCE_YEAR, max));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> AnnualReportInfo {
        AnnualReportInfo {
            country_code: Some("CH".into()),
            employee_count: Some(36_000),
            assets_value: Some(12_000_000_000),
            net_turnover: Some(23_000_000_000),
            currency_code_assets: Some("EUR".into()),
            currency_code_turnover: Some("EUR".into()),
            main_activity_description: Some("Staffing services.".into()),
            reference_year: Some(2024),
        }
    }

    #[test]
    fn test_valid_info_passes() {
        assert!(sample().validate().is_ok());
        assert!(AnnualReportInfo::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_codes() {
        let mut info = sample();
        info.country_code = Some("che".into());
        assert!(info.validate().is_err());

        let mut info = sample();
        info.currency_code_turnover = Some("EURO".into());
        assert!(info.validate().unwrap_err().contains("currency_code_turnover"));
    }

    #[test]
    fn test_rejects_negative_amounts_and_odd_years() {
        let mut info = sample();
        info.assets_value = Some(-1);
        assert!(info.validate().is_err());

        let mut info = sample();
        info.reference_year = Some(1066);
        assert!(info.validate().is_err());
    }

    #[test]
    fn test_missing_fields_default_to_none() {
        let info: AnnualReportInfo = serde_json::from_str(r#"{"country_code":"DE"}"#).unwrap();
        assert_eq!(info.country_code.as_deref(), Some("DE"));
        assert!(info.net_turnover.is_none());
    }

    #[test]
    fn test_amounts_accept_whole_floats() {
        let info: AnnualReportInfo =
            serde_json::from_str(r#"{"net_turnover": 9000000000.0, "employee_count": 1200, "assets_value": null}"#)
                .unwrap();
        assert_eq!(info.net_turnover, Some(9_000_000_000));
        assert_eq!(info.employee_count, Some(1200));
        assert_eq!(info.assets_value, None);

        let err = serde_json::from_str::<AnnualReportInfo>(r#"{"employee_count": 12.5}"#).unwrap_err();
        assert!(err.to_string().contains("whole number"));
    }
}
