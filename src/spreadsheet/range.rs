use crate::spreadsheet::reference::col_to_index;
use crate::spreadsheet::reference::row_to_index;
use crate::spreadsheet::reference::CellAddress;
use crate::spreadsheet::reference::ReferenceError;
use regex::Regex;
use serde::Serialize;
use std::fmt::Display;
use std::sync::OnceLock;

/// Rectangular block of cells with inclusive, zero-based bounds.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct CellRange {
    pub start: CellAddress,
    pub end: CellAddress,
}

fn range_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^([A-Z]+)(\d+)(:([A-Z]+)(\d+))?$").expect("Hardcode regex pattern"))
}

impl CellRange {
    /// Creates a range from two corners, normalizing them to top-left / bottom-right.
    pub fn new(first: CellAddress, second: CellAddress) -> Self {
        Self {
            start: CellAddress::new(first.row.min(second.row), first.col.min(second.col)),
            end: CellAddress::new(first.row.max(second.row), first.col.max(second.col)),
        }
    }

    pub fn single(address: CellAddress) -> Self {
        Self { start: address, end: address }
    }

    pub fn is_single(&self) -> bool {
        self.start == self.end
    }

    pub fn row_count(&self) -> usize {
        self.end.row - self.start.row + 1
    }

    pub fn col_count(&self) -> usize {
        self.end.col - self.start.col + 1
    }

    pub fn cell_count(&self) -> usize {
        self.row_count() * self.col_count()
    }

    pub fn contains(&self, address: &CellAddress) -> bool {
        self.start.row <= address.row
            && address.row <= self.end.row
            && self.start.col <= address.col
            && address.col <= self.end.col
    }

    pub fn intersects(&self, other: &CellRange) -> bool {
        self.start.row <= other.end.row
            && other.start.row <= self.end.row
            && self.start.col <= other.end.col
            && other.start.col <= self.end.col
    }

    /// Iterates every address of the range in row-major order.
    pub fn addresses(&self) -> impl Iterator<Item = CellAddress> + '_ {
        (self.start.row..=self.end.row)
            .flat_map(move |row| (self.start.col..=self.end.col).map(move |col| CellAddress::new(row, col)))
    }

    /// Returns "A1" for a single cell and "A2:A10" otherwise.
    pub fn label(&self) -> String {
        if self.is_single() {
            self.start.label()
        } else {
            format!("{}:{}", self.start.label(), self.end.label())
        }
    }
}

impl Display for CellRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl TryFrom<&str> for CellRange {
    type Error = ReferenceError;

    /// Parses a cell ("B2") or a fully bounded range ("B2:C5").
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let upper = value.trim().to_ascii_uppercase();
        let captures = range_pattern()
            .captures(upper.as_str())
            .ok_or_else(|| ReferenceError::InvalidRange(value.to_owned()))?;
        let corner = |letters: usize, digits: usize| {
            let col = captures.get(letters).map(|matcher| matcher.as_str()).and_then(col_to_index);
            let row = captures.get(digits).map(|matcher| matcher.as_str()).and_then(row_to_index);
            row.zip(col).map(|(row, col)| CellAddress::new(row, col))
        };
        let start = corner(1, 2).ok_or_else(|| ReferenceError::InvalidRange(value.to_owned()))?;
        if captures.get(3).is_some() {
            let end = corner(4, 5).ok_or_else(|| ReferenceError::InvalidRange(value.to_owned()))?;
            Ok(CellRange::new(start, end))
        } else {
            Ok(CellRange::single(start))
        }
    }
}
