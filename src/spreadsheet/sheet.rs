use crate::spreadsheet::cell::CellData;
use crate::spreadsheet::range::CellRange;
use crate::spreadsheet::reference::CellAddress;
use crate::spreadsheet::SpreadsheetError;
use serde::Serialize;
use std::collections::BTreeMap;

/// Grid size of a worksheet.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Dimensions {
    pub row_count: usize,
    pub col_count: usize,
}

/// Cell counts of a worksheet or workbook.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Statistics {
    /// Cells of the grid, populated or not
    pub total_cells: usize,
    pub non_empty_cells: usize,
}

/// One worksheet: sparse cells keyed by address, in row-major order.
#[derive(Clone, Debug, Default)]
pub struct WorksheetContext {
    pub name: String,
    cells: BTreeMap<CellAddress, CellData>,
    dimensions: Dimensions,
    non_empty_cells: usize,
}

impl WorksheetContext {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    /// Creates a sheet with a fixed grid size; pushing a cell outside it fails.
    pub fn with_dimensions(name: &str, row_count: usize, col_count: usize) -> Self {
        Self {
            name: name.to_owned(),
            dimensions: Dimensions { row_count, col_count },
            ..Default::default()
        }
    }

    /// Builds a sheet from cells, growing the grid to contain all of them.
    pub fn from_cells(name: &str, cells: impl IntoIterator<Item = CellData>) -> Self {
        let mut sheet = Self::new(name);
        for cell in cells {
            sheet.push(cell);
        }
        sheet
    }

    /// Adds or replaces a cell, growing the grid when needed.
    pub fn push(&mut self, cell: CellData) {
        self.update_bound(&cell.address);
        self.insert(cell);
    }

    /// Adds or replaces a cell that must lie within the current grid.
    pub fn try_push(&mut self, cell: CellData) -> Result<(), SpreadsheetError> {
        if cell.address.row >= self.dimensions.row_count || cell.address.col >= self.dimensions.col_count {
            return Err(SpreadsheetError::CellOutOfBounds {
                sheet: self.name.to_owned(),
                reference: cell.reference(),
            });
        }
        self.insert(cell);
        Ok(())
    }

    fn insert(&mut self, cell: CellData) {
        let is_empty = cell.is_empty();
        if let Some(previous) = self.cells.insert(cell.address, cell) {
            if !previous.is_empty() {
                self.non_empty_cells -= 1;
            }
        }
        if !is_empty {
            self.non_empty_cells += 1;
        }
    }

    fn update_bound(&mut self, address: &CellAddress) {
        self.dimensions.row_count = self.dimensions.row_count.max(address.row + 1);
        self.dimensions.col_count = self.dimensions.col_count.max(address.col + 1);
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn statistics(&self) -> Statistics {
        Statistics {
            total_cells: self.dimensions.row_count * self.dimensions.col_count,
            non_empty_cells: self.non_empty_cells,
        }
    }

    pub fn get(&self, address: &CellAddress) -> Option<&CellData> {
        self.cells.get(address)
    }

    /// Non-empty cell at (row, col), if any.
    pub fn value_at(&self, row: usize, col: usize) -> Option<&CellData> {
        self.cells.get(&CellAddress::new(row, col)).filter(|cell| !cell.is_empty())
    }

    /// All stored cells in row-major order, including empty ones.
    pub fn cells(&self) -> impl Iterator<Item = &CellData> {
        self.cells.values()
    }

    /// Non-empty cells in row-major order.
    pub fn non_empty_cells(&self) -> impl Iterator<Item = &CellData> {
        self.cells.values().filter(|cell| !cell.is_empty())
    }

    /// Non-empty cells inside a range, in row-major order.
    pub fn non_empty_cells_in(&self, range: CellRange) -> impl Iterator<Item = &CellData> {
        let end_row = CellAddress::new(range.end.row, usize::MAX);
        self.cells
            .range(range.start..=end_row)
            .map(|(_, cell)| cell)
            .filter(move |cell| range.contains(&cell.address) && !cell.is_empty())
    }

    /// New sheet with the same name and grid size holding only the given cells.
    pub(crate) fn derive<'a>(&self, cells: impl IntoIterator<Item = &'a CellData>) -> Self {
        let mut sheet = Self::with_dimensions(&self.name, self.dimensions.row_count, self.dimensions.col_count);
        for cell in cells {
            sheet.insert(cell.clone());
        }
        sheet
    }
}
