//! Format-aware aggregation: homogeneous rectangles become one type token.
//!
//! Cells are visited row-major. From the first recognized cell not yet in a
//! region two maximal rectangles of matching cells are grown, one widening
//! first and one deepening first; the larger wins, the wide one on ties. It
//! becomes a region when it covers at least `min_group_size` cells, otherwise
//! the starting cell stays literal.
use crate::compression::recognizer::RecognizerRegistry;
use crate::compression::vanilla::render_cell;
use crate::spreadsheet::CellAddress;
use crate::spreadsheet::CellData;
use crate::spreadsheet::CellRange;
use crate::spreadsheet::WorksheetContext;
use log::debug;
use rayon::prelude::*;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::collections::HashSet;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationOptions {
    pub enable_type_recognition: bool,
    #[serde(skip)]
    pub recognizers: RecognizerRegistry,
    pub min_group_size: usize,
    /// Cells only group when their number formats are equal as well
    pub match_formats: bool,
}

impl Default for AggregationOptions {
    fn default() -> Self {
        Self {
            enable_type_recognition: true,
            recognizers: RecognizerRegistry::builtin(),
            min_group_size: 4,
            match_formats: true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AggregatedRegion {
    pub start: CellAddress,
    pub end: CellAddress,
    pub type_token: String,
    pub format_string: Option<String>,
    pub cell_count: usize,
}

impl AggregatedRegion {
    pub fn range(&self) -> CellRange {
        CellRange::new(self.start, self.end)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "range": self.range().label(),
            "type": self.type_token,
            "format": self.format_string,
            "cells": self.cell_count,
        })
    }
}

/// Regions plus the cells left literal, of one sheet.
#[derive(Clone, Debug)]
pub struct AggregatedSheet {
    pub name: String,
    pub regions: Vec<AggregatedRegion>,
    pub literals: WorksheetContext,
}

impl AggregatedSheet {
    pub fn aggregated_cells(&self) -> usize {
        self.regions.iter().map(|region| region.cell_count).sum()
    }

    /// `## Sheet:` header, one `range,token` line per region, then literal rows.
    pub fn to_text(&self) -> String {
        let mut text = format!("## Sheet: {}", self.name);
        for region in &self.regions {
            text.push('\n');
            text.push_str(&format!("{},{}", region.range(), region.type_token));
            if let Some(format) = region.format_string.as_deref().filter(|format| *format != region.type_token) {
                text.push_str(&format!(" <{format}>"));
            }
        }
        let mut current_row = None;
        for cell in self.literals.non_empty_cells() {
            text.push(if current_row == Some(cell.address.row) { '|' } else { '\n' });
            text.push_str(&render_cell(cell, false));
            current_row = Some(cell.address.row);
        }
        text
    }

    pub fn to_json(&self) -> serde_json::Value {
        let literals: serde_json::Map<String, serde_json::Value> = self
            .literals
            .non_empty_cells()
            .map(|cell| (cell.reference(), serde_json::Value::from(cell.rendered())))
            .collect();
        serde_json::json!({
            "regions": self.regions.iter().map(AggregatedRegion::to_json).collect::<Vec<_>>(),
            "literals": literals,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct Signature<'a> {
    token: String,
    format: Option<&'a str>,
}

struct Grid<'a> {
    signatures: HashMap<CellAddress, Signature<'a>>,
    assigned: HashSet<CellAddress>,
}

impl Grid<'_> {
    fn matches(&self, row: usize, col: usize, signature: &Signature) -> bool {
        let address = CellAddress::new(row, col);
        !self.assigned.contains(&address) && self.signatures.get(&address) == Some(signature)
    }

    fn row_matches(&self, row: usize, cols: std::ops::Range<usize>, signature: &Signature) -> bool {
        cols.into_iter().all(|col| self.matches(row, col, signature))
    }

    fn col_matches(&self, col: usize, rows: std::ops::Range<usize>, signature: &Signature) -> bool {
        rows.into_iter().all(|row| self.matches(row, col, signature))
    }

    /// `(height, width)` grown rightwards first, then downwards.
    fn grow_wide(&self, origin: CellAddress, signature: &Signature) -> (usize, usize) {
        let mut width = 1;
        while self.matches(origin.row, origin.col + width, signature) {
            width += 1;
        }
        let mut height = 1;
        while self.row_matches(origin.row + height, origin.col..origin.col + width, signature) {
            height += 1;
        }
        (height, width)
    }

    /// `(height, width)` grown downwards first, then rightwards.
    fn grow_tall(&self, origin: CellAddress, signature: &Signature) -> (usize, usize) {
        let mut height = 1;
        while self.matches(origin.row + height, origin.col, signature) {
            height += 1;
        }
        let mut width = 1;
        while self.col_matches(origin.col + width, origin.row..origin.row + height, signature) {
            width += 1;
        }
        (height, width)
    }
}

/// Aggregates one sheet.
pub fn aggregate_sheet(sheet: &WorksheetContext, options: &AggregationOptions) -> AggregatedSheet {
    if !options.enable_type_recognition {
        return AggregatedSheet {
            name: sheet.name.to_owned(),
            regions: Vec::new(),
            literals: sheet.derive(sheet.non_empty_cells()),
        };
    }

    let signatures: HashMap<CellAddress, Signature> = sheet
        .non_empty_cells()
        .filter_map(|cell| {
            let format = cell.explicit_format();
            let token = options.recognizers.recognize(&cell.value, format)?;
            let format = format.filter(|_| options.match_formats);
            Some((cell.address, Signature { token, format }))
        })
        .collect();
    let mut grid = Grid {
        signatures,
        assigned: HashSet::new(),
    };

    let mut regions = Vec::new();
    for cell in sheet.non_empty_cells() {
        let origin = cell.address;
        let Some(signature) = grid.signatures.get(&origin).filter(|_| !grid.assigned.contains(&origin)).cloned() else {
            continue;
        };
        let wide = grid.grow_wide(origin, &signature);
        let tall = grid.grow_tall(origin, &signature);
        let (height, width) = if tall.0 * tall.1 > wide.0 * wide.1 { tall } else { wide };
        let cell_count = height * width;
        if cell_count < options.min_group_size.max(1) {
            continue;
        }

        let end = CellAddress::new(origin.row + height - 1, origin.col + width - 1);
        grid.assigned.extend(CellRange::new(origin, end).addresses());
        regions.push(AggregatedRegion {
            start: origin,
            end,
            type_token: signature.token,
            format_string: signature.format.map(str::to_owned),
            cell_count,
        });
    }

    let literals = sheet.derive(sheet.non_empty_cells().filter(|cell| !grid.assigned.contains(&cell.address)));
    debug!(
        "Sheet '{}': {} regions cover {} cells, {} literal cells",
        sheet.name,
        regions.len(),
        grid.assigned.len(),
        literals.statistics().non_empty_cells
    );
    AggregatedSheet {
        name: sheet.name.to_owned(),
        regions,
        literals,
    }
}

/// Aggregates every sheet, in parallel, keeping sheet order.
pub fn aggregate(sheets: &[&WorksheetContext], options: &AggregationOptions) -> Vec<AggregatedSheet> {
    sheets
        .par_iter()
        .map(|sheet| aggregate_sheet(sheet, options))
        .collect()
}

pub fn render(sheets: &[AggregatedSheet]) -> String {
    sheets
        .iter()
        .map(AggregatedSheet::to_text)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Cells inside `region`, for checking a region against its source sheet.
pub fn region_cells<'a>(sheet: &'a WorksheetContext, region: &AggregatedRegion) -> Vec<&'a CellData> {
    sheet.non_empty_cells_in(region.range()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::recognizer::CURRENCY_TOKEN;
    use crate::compression::recognizer::NUMBER_TOKEN;
    use crate::compression::recognizer::PERCENTAGE_TOKEN;
    use proptest::prelude::*;

    fn report() -> WorksheetContext {
        let mut sheet = WorksheetContext::new("Report");
        for (col, title) in ["Region", "Sales", "Share"].iter().enumerate() {
            sheet.push(CellData::new(CellAddress::new(0, col), *title));
        }
        for row in 1..=5 {
            sheet.push(CellData::new(CellAddress::new(row, 0), format!("R{row}")));
            sheet.push(CellData::new(CellAddress::new(row, 1), row as f64 * 100.0).with_format("$#,##0.00"));
            sheet.push(CellData::new(CellAddress::new(row, 2), row as f64 / 10.0).with_format("0.00%"));
        }
        sheet
    }

    #[test]
    fn aggregate_columns_by_type() {
        let aggregated = aggregate_sheet(&report(), &AggregationOptions::default());
        assert_eq!(aggregated.regions.len(), 2);
        let sales = &aggregated.regions[0];
        assert_eq!(sales.range().label(), "B2:B6");
        assert_eq!(sales.type_token, CURRENCY_TOKEN);
        assert_eq!(sales.format_string.as_deref(), Some("$#,##0.00"));
        assert_eq!(sales.cell_count, 5);
        assert_eq!(aggregated.regions[1].type_token, PERCENTAGE_TOKEN);
        assert_eq!(aggregated.literals.statistics().non_empty_cells, 8);
        assert_eq!(aggregated.aggregated_cells(), 10);
    }

    #[test]
    fn aggregate_merges_types_without_format_matching() {
        let mut sheet = WorksheetContext::new("Numbers");
        for row in 0..3 {
            for col in 0..2 {
                let format = if col == 0 { "0.0" } else { "#,##0" };
                sheet.push(CellData::new(CellAddress::new(row, col), 1.0).with_format(format));
            }
        }
        let strict = aggregate_sheet(&sheet, &AggregationOptions {
            min_group_size: 3,
            ..Default::default()
        });
        assert_eq!(strict.regions.len(), 2);

        let loose = aggregate_sheet(&sheet, &AggregationOptions {
            min_group_size: 3,
            match_formats: false,
            ..Default::default()
        });
        assert_eq!(loose.regions.len(), 1);
        assert_eq!(loose.regions[0].range().label(), "A1:B3");
        assert_eq!(loose.regions[0].type_token, NUMBER_TOKEN);
        assert_eq!(loose.regions[0].format_string, None);
    }

    #[test]
    fn aggregate_prefers_larger_rectangle() {
        // Two wide cells on top of a tall column: the tall candidate is larger.
        let mut sheet = WorksheetContext::new("Shape");
        for (row, col) in [(0, 0), (0, 1), (1, 0), (2, 0), (3, 0)] {
            sheet.push(CellData::new(CellAddress::new(row, col), 5.0));
        }
        let aggregated = aggregate_sheet(&sheet, &AggregationOptions {
            min_group_size: 2,
            ..Default::default()
        });
        assert_eq!(aggregated.regions[0].range().label(), "A1:A4");
        assert_eq!(aggregated.literals.statistics().non_empty_cells, 1);
    }

    #[test]
    fn aggregate_small_groups_stay_literal() {
        let aggregated = aggregate_sheet(&report(), &AggregationOptions {
            min_group_size: 6,
            ..Default::default()
        });
        assert!(aggregated.regions.is_empty());
        assert_eq!(aggregated.literals.statistics().non_empty_cells, 18);
    }

    #[test]
    fn aggregate_disabled_keeps_every_cell() {
        let aggregated = aggregate_sheet(&report(), &AggregationOptions {
            enable_type_recognition: false,
            ..Default::default()
        });
        assert!(aggregated.regions.is_empty());
        assert_eq!(aggregated.literals.statistics().non_empty_cells, 18);
    }

    #[test]
    fn aggregate_renders_text_and_json() {
        let aggregated = aggregate_sheet(&report(), &AggregationOptions::default());
        let text = render(std::slice::from_ref(&aggregated));
        assert!(text.starts_with("## Sheet: Report\nB2:B6,Currency <$#,##0.00>\nC2:C6,0.00%\nA1,Region|B1,Sales|C1,Share\nA2,R1"));
        let json = aggregated.to_json();
        assert_eq!(json["regions"][0]["range"], "B2:B6");
        assert_eq!(json["literals"]["A1"], "Region");
    }

    fn arbitrary_sheet() -> impl Strategy<Value = WorksheetContext> {
        prop::collection::vec((0usize..10, 0usize..6, 0u8..5), 0..60).prop_map(|cells| {
            WorksheetContext::from_cells(
                "Sheet1",
                cells.into_iter().map(|(row, col, kind)| {
                    let address = CellAddress::new(row, col);
                    match kind {
                        0 => CellData::new(address, "label"),
                        1 => CellData::new(address, 3.5),
                        2 => CellData::new(address, "yes"),
                        3 => CellData::new(address, 0.25).with_format("0%"),
                        _ => CellData::new(address, "2024-01-31"),
                    }
                }),
            )
        })
    }

    proptest! {
        #[test]
        fn aggregate_regions_are_disjoint_and_typed(sheet in arbitrary_sheet(), min_group_size in 1usize..5) {
            let options = AggregationOptions {
                min_group_size,
                ..Default::default()
            };
            let aggregated = aggregate_sheet(&sheet, &options);
            let mut covered = HashSet::new();
            for region in &aggregated.regions {
                prop_assert!(region.cell_count >= min_group_size);
                let cells = region_cells(&sheet, region);
                prop_assert_eq!(cells.len(), region.cell_count);
                for cell in cells {
                    prop_assert!(covered.insert(cell.address));
                    let token = options.recognizers.recognize(&cell.value, cell.explicit_format());
                    prop_assert_eq!(token.as_deref(), Some(region.type_token.as_str()));
                }
            }
            let total = aggregated.aggregated_cells() + aggregated.literals.statistics().non_empty_cells;
            prop_assert_eq!(total, sheet.statistics().non_empty_cells);
        }
    }
}
