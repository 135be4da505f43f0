//! # Spreadsheet Grid Model
//!
//! In-memory representation of a loaded workbook: zero-based cell addresses
//! with their Excel-style labels, sparse worksheets keyed in row-major order,
//! and the loader port through which workbooks arrive. Everything downstream
//! reads these structures without mutating them.
pub(crate) mod cell;
pub(crate) mod range;
pub(crate) mod reference;
pub(crate) mod sheet;

pub use cell::CellData;
pub use cell::CellValue;
pub use cell::ValueKind;
pub use range::CellRange;
pub use reference::CellAddress;
pub use reference::ReferenceError;
pub use sheet::Dimensions;
pub use sheet::Statistics;
pub use sheet::WorksheetContext;

use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

/// Errors raised while assembling or querying a workbook.
#[derive(Error, Debug)]
pub enum SpreadsheetError {
    #[error("Cell '{reference}' lies outside the grid of sheet '{sheet}'")]
    CellOutOfBounds { sheet: String, reference: String },

    #[error("Load workbook '{path}' failed: {source}")]
    LoadFailed { path: String, source: anyhow::Error },
}

/// Ordered worksheets of one workbook. Immutable once loaded.
#[derive(Clone, Debug, Default)]
pub struct WorkbookContext {
    pub sheets: Vec<WorksheetContext>,
}

impl WorkbookContext {
    pub fn new(sheets: Vec<WorksheetContext>) -> Self {
        Self { sheets }
    }

    /// Aggregate statistics over all sheets.
    pub fn statistics(&self) -> Statistics {
        self.sheets.iter().map(WorksheetContext::statistics).fold(
            Statistics::default(),
            |total, sheet| Statistics {
                total_cells: total.total_cells + sheet.total_cells,
                non_empty_cells: total.non_empty_cells + sheet.non_empty_cells,
            },
        )
    }

    /// Returns the sheet with the given name (case-insensitive).
    pub fn sheet(&self, name: &str) -> Option<&WorksheetContext> {
        self.sheets
            .iter()
            .find(|sheet| sheet.name == name)
            .or_else(|| self.sheets.iter().find(|sheet| sheet.name.eq_ignore_ascii_case(name)))
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.sheets.iter().map(|sheet| sheet.name.to_owned()).collect()
    }
}

/// How aggressively the loader may trade fidelity for memory.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryOptimizationLevel {
    #[default]
    None,
    Balanced,
    Aggressive,
}

/// Options forwarded to the workbook loader.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    pub include_styles: bool,
    pub include_formulas: bool,
    pub memory_optimization_level: MemoryOptimizationLevel,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            include_styles: true,
            include_formulas: false,
            memory_optimization_level: MemoryOptimizationLevel::None,
        }
    }
}

/// Port to whatever parses spreadsheet bytes into a [`WorkbookContext`].
///
/// Implementations must report statistics consistent with the returned cells,
/// which [`WorksheetContext`] guarantees by construction.
pub trait WorkbookLoader: Send + Sync {
    fn load(&self, path: &Path, options: &LoadOptions) -> anyhow::Result<WorkbookContext>;
}

/// Loads a workbook, wrapping loader failures with the path.
pub(crate) fn load_workbook(
    loader: &dyn WorkbookLoader,
    path: &Path,
    options: &LoadOptions,
) -> Result<WorkbookContext, SpreadsheetError> {
    loader.load(path, options).map_err(|source| SpreadsheetError::LoadFailed {
        path: path.to_string_lossy().to_string(),
        source,
    })
}
