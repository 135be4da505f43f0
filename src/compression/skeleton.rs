//! Skeleton extraction: keep anchors and their neighborhood, drop the rest.
use crate::compression::anchor::StructuralAnchors;
use crate::spreadsheet::CellAddress;
use crate::spreadsheet::WorkbookContext;
use crate::spreadsheet::WorksheetContext;
use log::debug;
use log::warn;
use rayon::prelude::*;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeSet;
use std::collections::HashSet;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkeletonOptions {
    /// Rows/columns kept on each side of an anchor
    pub k: usize,
    /// Also keeps non-empty cells adjacent to a cell kept by the anchor rule
    pub preserve_nearby_non_empty: bool,
    pub preserve_formulas: bool,
    pub preserve_formatted_cells: bool,
    /// Ratios below this produce a warning; never enforced
    pub min_compression_ratio: f64,
}

impl Default for SkeletonOptions {
    fn default() -> Self {
        Self {
            k: 2,
            preserve_nearby_non_empty: true,
            preserve_formulas: true,
            preserve_formatted_cells: true,
            min_compression_ratio: 0.3,
        }
    }
}

/// Kept cells of one sheet. `sheet` keeps the source grid size.
#[derive(Clone, Debug)]
pub struct SkeletonWorksheet {
    pub sheet: WorksheetContext,
    pub skeleton_cell_count: usize,
    pub non_empty_cells: usize,
}

impl SkeletonWorksheet {
    /// `1 - kept / non_empty`, zero for an empty sheet.
    pub fn compression_ratio(&self) -> f64 {
        ratio(self.skeleton_cell_count, self.non_empty_cells)
    }
}

#[derive(Clone, Debug)]
pub struct SkeletonWorkbook {
    pub sheets: Vec<SkeletonWorksheet>,
    pub warnings: Vec<String>,
}

impl SkeletonWorkbook {
    pub fn skeleton_cell_count(&self) -> usize {
        self.sheets.iter().map(|sheet| sheet.skeleton_cell_count).sum()
    }

    pub fn non_empty_cells(&self) -> usize {
        self.sheets.iter().map(|sheet| sheet.non_empty_cells).sum()
    }

    /// Global `1 - kept / non_empty` over all sheets.
    pub fn compression_ratio(&self) -> f64 {
        ratio(self.skeleton_cell_count(), self.non_empty_cells())
    }

    pub fn worksheets(&self) -> impl Iterator<Item = &WorksheetContext> {
        self.sheets.iter().map(|skeleton| &skeleton.sheet)
    }
}

fn ratio(kept: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        1.0 - kept as f64 / total as f64
    }
}

/// Indexes within `k` of any anchor index.
fn expand(anchors: impl Iterator<Item = usize>, k: usize) -> HashSet<usize> {
    anchors
        .flat_map(|index| index.saturating_sub(k)..=index.saturating_add(k))
        .collect()
}

/// Extracts the skeleton of one sheet.
pub fn extract_sheet(sheet: &WorksheetContext, anchors: &StructuralAnchors, options: &SkeletonOptions) -> SkeletonWorksheet {
    let rows = expand(anchors.rows.keys().copied(), options.k);
    let cols = expand(anchors.cols.keys().copied(), options.k);

    let anchored: BTreeSet<CellAddress> = sheet
        .non_empty_cells()
        .filter(|cell| rows.contains(&cell.address.row) || cols.contains(&cell.address.col))
        .map(|cell| cell.address)
        .collect();

    let is_adjacent = |address: &CellAddress| {
        let CellAddress { row, col } = *address;
        [
            row.checked_sub(1).map(|row| CellAddress::new(row, col)),
            Some(CellAddress::new(row + 1, col)),
            col.checked_sub(1).map(|col| CellAddress::new(row, col)),
            Some(CellAddress::new(row, col + 1)),
        ]
        .into_iter()
        .flatten()
        .any(|neighbor| anchored.contains(&neighbor))
    };

    let kept = sheet.non_empty_cells().filter(|cell| {
        anchored.contains(&cell.address)
            || (options.preserve_nearby_non_empty && is_adjacent(&cell.address))
            || (options.preserve_formulas && cell.formula.is_some())
            || (options.preserve_formatted_cells && cell.style.is_some())
    });
    let skeleton = sheet.derive(kept);
    let skeleton_cell_count = skeleton.statistics().non_empty_cells;

    debug!(
        "Sheet '{}': skeleton keeps {} of {} cells",
        sheet.name,
        skeleton_cell_count,
        sheet.statistics().non_empty_cells
    );
    SkeletonWorksheet {
        sheet: skeleton,
        skeleton_cell_count,
        non_empty_cells: sheet.statistics().non_empty_cells,
    }
}

/// Extracts the skeleton of every sheet that has anchors in `anchors`, in parallel.
///
/// Sheets without a matching anchor entry are treated as having no anchors.
pub fn extract(workbook: &WorkbookContext, anchors: &[StructuralAnchors], options: &SkeletonOptions) -> SkeletonWorkbook {
    let empty = StructuralAnchors::default();
    let sheets: Vec<SkeletonWorksheet> = workbook
        .sheets
        .par_iter()
        .map(|sheet| {
            let sheet_anchors = anchors
                .iter()
                .find(|anchors| anchors.sheet_name == sheet.name)
                .unwrap_or(&empty);
            extract_sheet(sheet, sheet_anchors, options)
        })
        .collect();

    let mut warnings = Vec::new();
    for (skeleton, source) in sheets.iter().zip(&workbook.sheets) {
        let has_anchors = anchors
            .iter()
            .any(|anchors| anchors.sheet_name == source.name && !anchors.is_empty());
        if !has_anchors && skeleton.non_empty_cells > 0 {
            warnings.push(format!(
                "Sheet '{}' has no structural anchors; only preserved cells remain",
                source.name
            ));
        }
        if skeleton.non_empty_cells > 0 && skeleton.compression_ratio() < options.min_compression_ratio {
            warnings.push(format!(
                "Sheet '{}' compressed by only {:.1}% (expected at least {:.1}%)",
                source.name,
                skeleton.compression_ratio() * 100.0,
                options.min_compression_ratio * 100.0
            ));
        }
    }
    for warning in &warnings {
        warn!("{}", warning);
    }
    SkeletonWorkbook { sheets, warnings }
}
