use crate::spreadsheet::reference::CellAddress;
use chrono::NaiveDateTime;
use chrono::Timelike;
use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;

/// Value held by a spreadsheet cell.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Boolean(bool),
    /// Date or date/time; the loader has already resolved serial numbers and epochs
    Date(NaiveDateTime),
}

/// Coarse value category used by the heterogeneity scorer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Empty,
    Text,
    Number,
    Boolean,
    Date,
}

impl CellValue {
    /// Empty, or text made only of whitespace.
    pub fn is_empty(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(text) => text.trim().is_empty(),
            _ => false,
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            _ if self.is_empty() => ValueKind::Empty,
            CellValue::Text(_) => ValueKind::Text,
            CellValue::Number(_) => ValueKind::Number,
            CellValue::Boolean(_) => ValueKind::Boolean,
            CellValue::Date(_) => ValueKind::Date,
            CellValue::Empty => ValueKind::Empty,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(text) => Some(text.as_str()),
            _ => None,
        }
    }
}

impl Display for CellValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellValue::Empty => Ok(()),
            CellValue::Text(text) => write!(f, "{}", text),
            CellValue::Number(number) => write!(f, "{}", number),
            CellValue::Boolean(value) => write!(f, "{}", value),
            CellValue::Date(datetime) if datetime.num_seconds_from_midnight() == 0 => {
                write!(f, "{}", datetime.format("%Y-%m-%d"))
            }
            CellValue::Date(datetime) => write!(f, "{}", datetime.format("%Y-%m-%d %H:%M:%S")),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_owned())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Boolean(value)
    }
}

impl From<NaiveDateTime> for CellValue {
    fn from(value: NaiveDateTime) -> Self {
        CellValue::Date(value)
    }
}

/// Represents a single cell in a worksheet with position, value and formatting.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CellData {
    pub address: CellAddress,
    pub value: CellValue,
    /// Excel number format code (e.g., "$#,##0.00")
    pub number_format: Option<String>,
    /// Formula source without evaluation, when the loader kept it
    pub formula: Option<String>,
    /// Opaque style signature (font, fill, border); equal signatures mean equal styling
    pub style: Option<String>,
}

impl CellData {
    pub fn new(address: CellAddress, value: impl Into<CellValue>) -> Self {
        Self {
            address,
            value: value.into(),
            number_format: None,
            formula: None,
            style: None,
        }
    }

    pub fn with_format(mut self, number_format: &str) -> Self {
        self.number_format = Some(number_format.to_owned());
        self
    }

    pub fn with_formula(mut self, formula: &str) -> Self {
        self.formula = Some(formula.to_owned());
        self
    }

    pub fn with_style(mut self, style: &str) -> Self {
        self.style = Some(style.to_owned());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Returns the Excel-style cell reference (e.g., "A1", "B2").
    pub fn reference(&self) -> String {
        self.address.label()
    }

    /// Value rendered as text, the form every encoder emits.
    pub fn rendered(&self) -> String {
        self.value.to_string()
    }

    /// Number format unless it is missing or the neutral "General".
    pub fn explicit_format(&self) -> Option<&str> {
        self.number_format
            .as_deref()
            .map(str::trim)
            .filter(|format| !format.is_empty() && !format.eq_ignore_ascii_case("General"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn cell_empty_values() {
        assert!(CellValue::Empty.is_empty());
        assert!(CellValue::from("   ").is_empty());
        assert!(CellValue::from("\t\n").is_empty());
        assert!(!CellValue::from(" x ").is_empty());
        assert!(!CellValue::from(0.0).is_empty());
        assert!(!CellValue::from(false).is_empty());
    }

    #[test]
    fn cell_rendering() {
        assert_eq!(CellValue::from(5.0).to_string(), "5");
        assert_eq!(CellValue::from(1000.5).to_string(), "1000.5");
        assert_eq!(CellValue::from(true).to_string(), "true");
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(CellValue::from(date.and_hms_opt(0, 0, 0).unwrap()).to_string(), "2024-03-01");
        assert_eq!(
            CellValue::from(date.and_hms_opt(13, 5, 9).unwrap()).to_string(),
            "2024-03-01 13:05:09"
        );
    }

    #[test]
    fn cell_explicit_format() {
        let cell = CellData::new(CellAddress::new(0, 0), 1.0);
        assert_eq!(cell.explicit_format(), None);
        assert_eq!(cell.clone().with_format("General").explicit_format(), None);
        assert_eq!(cell.with_format("0.00%").explicit_format(), Some("0.00%"));
    }
}
