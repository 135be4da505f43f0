//! Conversions between zero-based indexes and Excel-style cell references.
use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;
use std::str::FromStr;
use thiserror::Error;

/// Errors related to cell reference parsing.
#[derive(Error, Debug, PartialEq)]
pub enum ReferenceError {
    #[error("Invalid cell reference '{0}'")]
    InvalidReference(String),

    #[error("Invalid range '{0}'")]
    InvalidRange(String),
}

/// Zero-based cell coordinate. Ordering is row-major (row first, then column).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellAddress {
    pub row: usize,
    pub col: usize,
}

impl CellAddress {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Returns the Excel-style label (e.g., "A1", "B12").
    pub fn label(&self) -> String {
        index_to_reference(self.row, self.col)
    }
}

impl Display for CellAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for CellAddress {
    type Err = ReferenceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        reference_to_index(value)
            .map(|(row, col)| CellAddress::new(row, col))
            .ok_or_else(|| ReferenceError::InvalidReference(value.to_owned()))
    }
}

/// Converts a zero-based column index to column letters (0 = "A", 26 = "AA").
pub fn col_to_letters(col: usize) -> String {
    let mut column = col + 1;
    let mut letters = Vec::new();
    while column > 0 {
        column -= 1;
        letters.push(b'A' + (column % 26) as u8);
        column /= 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Converts zero-based row & column indexes to an Excel-style cell reference.
pub fn index_to_reference(row: usize, col: usize) -> String {
    format!("{}{}", col_to_letters(col), row + 1)
}

/// Parses column letters (case-insensitive) to a zero-based column index.
pub fn col_to_index(letters: &str) -> Option<usize> {
    if letters.is_empty() || !letters.chars().all(|char| char.is_ascii_alphabetic()) {
        return None;
    }
    letters
        .to_ascii_uppercase()
        .bytes()
        .map(|byte| (byte - b'A') as usize + 1)
        .try_fold(0usize, |index, digit| index.checked_mul(26)?.checked_add(digit))
        .map(|column| column - 1)
}

/// Parses a one-based row number to a zero-based row index.
pub fn row_to_index(number: &str) -> Option<usize> {
    number
        .parse::<usize>()
        .ok()
        .filter(|row| *row > 0)
        .map(|row| row - 1)
}

/// Parses an Excel-style cell reference (e.g., "B12") to zero-based (row, col).
pub fn reference_to_index(reference: &str) -> Option<(usize, usize)> {
    let reference = reference.trim();
    let split = reference.find(|char: char| char.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    Some((row_to_index(digits)?, col_to_index(letters)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_from_index() {
        assert_eq!(index_to_reference(0, 0), "A1");
        assert_eq!(index_to_reference(11, 1), "B12");
        assert_eq!(index_to_reference(0, 25), "Z1");
        assert_eq!(index_to_reference(0, 26), "AA1");
        assert_eq!(index_to_reference(99, 701), "ZZ100");
        assert_eq!(index_to_reference(0, 702), "AAA1");
    }

    #[test]
    fn reference_to_index_round_trip() {
        for row in [0, 1, 9, 1_048_575] {
            for col in [0, 1, 25, 26, 51, 52, 701, 702, 16_383] {
                let label = index_to_reference(row, col);
                assert_eq!(reference_to_index(&label), Some((row, col)), "{label}");
            }
        }
    }

    #[test]
    fn reference_is_case_insensitive() {
        assert_eq!(reference_to_index("aa10"), Some((9, 26)));
        assert_eq!("b2".parse::<CellAddress>(), Ok(CellAddress::new(1, 1)));
    }

    #[test]
    fn reference_rejects_malformed_labels() {
        assert_eq!(reference_to_index("A0"), None);
        assert_eq!(reference_to_index("12"), None);
        assert_eq!(reference_to_index("A"), None);
        assert_eq!(reference_to_index("A1B"), None);
        assert!("?1".parse::<CellAddress>().is_err());
    }

    #[test]
    fn address_orders_row_major() {
        let mut addresses = vec![
            CellAddress::new(1, 0),
            CellAddress::new(0, 2),
            CellAddress::new(0, 1),
        ];
        addresses.sort();
        assert_eq!(
            addresses,
            vec![CellAddress::new(0, 1), CellAddress::new(0, 2), CellAddress::new(1, 0)]
        );
    }
}
