//! Inverted-index translation: each distinct value is written once, followed
//! by the locations holding it. Contiguous runs collapse into ranges.
//!
//! ```text
//! {"Sales":{"Product":"A1:A10","Item":["A1:A3","A5","B1"]}}
//! ```
use crate::compression::CompressionError;
use crate::spreadsheet::CellAddress;
use crate::spreadsheet::CellData;
use crate::spreadsheet::CellRange;
use crate::spreadsheet::ReferenceError;
use crate::spreadsheet::WorksheetContext;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::HashSet;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvertedIndexOptions {
    /// Collapses row-wise or column-wise runs into `A2:A10` labels
    pub optimize_ranges: bool,
    /// Suffixes keys with `|` and the number format, keeping differently formatted values apart
    pub include_formats: bool,
    /// Shortest run written as a range
    pub range_threshold: usize,
}

impl Default for InvertedIndexOptions {
    fn default() -> Self {
        Self {
            optimize_ranges: true,
            include_formats: true,
            range_threshold: 2,
        }
    }
}

/// One label, or several, for a key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum IndexLocations {
    Single(String),
    Many(Vec<String>),
}

impl IndexLocations {
    pub fn labels(&self) -> Vec<&str> {
        match self {
            IndexLocations::Single(label) => vec![label.as_str()],
            IndexLocations::Many(labels) => labels.iter().map(String::as_str).collect(),
        }
    }

    /// Every address covered by the labels, ranges expanded.
    pub fn addresses(&self) -> Result<Vec<CellAddress>, ReferenceError> {
        let mut addresses = Vec::new();
        for label in self.labels() {
            addresses.extend(CellRange::try_from(label)?.addresses());
        }
        Ok(addresses)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IndexEntry {
    pub key: String,
    pub locations: IndexLocations,
}

/// Inverted index of one sheet; keys in row-major order of first occurrence.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InvertedIndex {
    pub sheet_name: String,
    pub entries: Vec<IndexEntry>,
}

impl InvertedIndex {
    pub fn get(&self, key: &str) -> Option<&IndexLocations> {
        self.entries
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| &entry.locations)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `{"key": "A1" | ["A1:A3", ...]}` in key order.
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .entries
            .iter()
            .map(|entry| {
                let value = match &entry.locations {
                    IndexLocations::Single(label) => serde_json::Value::from(label.as_str()),
                    IndexLocations::Many(labels) => serde_json::Value::from(labels.clone()),
                };
                (entry.key.to_owned(), value)
            })
            .collect();
        serde_json::Value::Object(map)
    }

    /// Every (key, address) pair, ranges expanded.
    pub fn expand(&self) -> Result<Vec<(String, CellAddress)>, ReferenceError> {
        let mut pairs = Vec::new();
        for entry in &self.entries {
            for address in entry.locations.addresses()? {
                pairs.push((entry.key.to_owned(), address));
            }
        }
        Ok(pairs)
    }
}

/// Grouping key of a cell: the rendered value, optionally `|` + number format.
pub fn cell_key(cell: &CellData, include_formats: bool) -> String {
    match cell.explicit_format().filter(|_| include_formats) {
        Some(format) => format!("{}|{}", cell.rendered(), format),
        None => cell.rendered(),
    }
}

/// Maximal runs of consecutive values, as (first, last) pairs.
fn runs(mut values: Vec<usize>) -> Vec<(usize, usize)> {
    values.sort_unstable();
    let mut runs: Vec<(usize, usize)> = Vec::new();
    for value in values {
        match runs.last_mut() {
            Some((_, last)) if *last + 1 == value => *last = value,
            _ => runs.push((value, value)),
        }
    }
    runs
}

/// Partitions addresses into column runs, then row runs, then single cells.
fn collapse(addresses: &[CellAddress], options: &InvertedIndexOptions) -> Vec<CellRange> {
    let threshold = options.range_threshold.max(2);
    let mut ranges = Vec::new();
    let mut covered: HashSet<CellAddress> = HashSet::new();

    if options.optimize_ranges {
        let mut by_col: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for address in addresses {
            by_col.entry(address.col).or_default().push(address.row);
        }
        for (col, rows) in by_col {
            for (first, last) in runs(rows) {
                if last - first + 1 >= threshold {
                    let range = CellRange::new(CellAddress::new(first, col), CellAddress::new(last, col));
                    covered.extend(range.addresses());
                    ranges.push(range);
                }
            }
        }

        let mut by_row: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for address in addresses.iter().filter(|address| !covered.contains(*address)) {
            by_row.entry(address.row).or_default().push(address.col);
        }
        for (row, cols) in by_row {
            for (first, last) in runs(cols) {
                if last - first + 1 >= threshold {
                    let range = CellRange::new(CellAddress::new(row, first), CellAddress::new(row, last));
                    covered.extend(range.addresses());
                    ranges.push(range);
                }
            }
        }
    }

    ranges.extend(
        addresses
            .iter()
            .filter(|address| !covered.contains(*address))
            .map(|address| CellRange::single(*address)),
    );
    ranges.sort_by_key(|range| (range.start.col, range.start.row));
    ranges
}

/// Translates the non-empty cells of a sheet into an inverted index.
pub fn translate(sheet: &WorksheetContext, options: &InvertedIndexOptions) -> InvertedIndex {
    let mut order: Vec<(String, Vec<CellAddress>)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for cell in sheet.non_empty_cells() {
        let key = cell_key(cell, options.include_formats);
        match positions.get(&key) {
            Some(position) => order[*position].1.push(cell.address),
            None => {
                positions.insert(key.to_owned(), order.len());
                order.push((key, vec![cell.address]));
            }
        }
    }

    let entries = order
        .into_iter()
        .map(|(key, addresses)| {
            let mut labels: Vec<String> = collapse(&addresses, options).iter().map(CellRange::label).collect();
            let locations = if labels.len() == 1 {
                IndexLocations::Single(labels.remove(0))
            } else {
                IndexLocations::Many(labels)
            };
            IndexEntry { key, locations }
        })
        .collect();

    InvertedIndex {
        sheet_name: sheet.name.to_owned(),
        entries,
    }
}

/// Renders indexes as one compact JSON object keyed by sheet name.
pub fn render(indexes: &[InvertedIndex]) -> Result<String, CompressionError> {
    let workbook: serde_json::Map<String, serde_json::Value> = indexes
        .iter()
        .map(|index| (index.sheet_name.to_owned(), index.to_json()))
        .collect();
    Ok(serde_json::to_string(&workbook)?)
}

/// Renders indexes one `key: labels` line per entry under a sheet header.
pub fn render_text(indexes: &[InvertedIndex]) -> String {
    indexes
        .iter()
        .map(|index| {
            let mut text = format!("## Sheet: {}", index.sheet_name);
            for entry in &index.entries {
                text.push('\n');
                text.push_str(&entry.key);
                text.push_str(": ");
                text.push_str(&entry.locations.labels().join(","));
            }
            text
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn sheet(cells: &[(&str, &str)]) -> WorksheetContext {
        WorksheetContext::from_cells(
            "Sheet1",
            cells.iter().map(|(label, value)| {
                let address: CellAddress = label.parse().unwrap();
                CellData::new(address, *value)
            }),
        )
    }

    #[test]
    fn index_collapses_column_run() {
        let labels: Vec<String> = (1..=10).map(|row| format!("A{row}")).collect();
        let cells: Vec<(&str, &str)> = labels.iter().map(|label| (label.as_str(), "Product")).collect();
        let index = translate(&sheet(&cells), &InvertedIndexOptions {
            range_threshold: 10,
            ..Default::default()
        });
        assert_eq!(index.to_json(), serde_json::json!({"Product": "A1:A10"}));
    }

    #[test]
    fn index_mixes_ranges_and_singles() {
        let index = translate(
            &sheet(&[("A1", "Item"), ("A2", "Item"), ("A3", "Item"), ("A5", "Item"), ("B1", "Item")]),
            &InvertedIndexOptions::default(),
        );
        assert_eq!(
            index.get("Item"),
            Some(&IndexLocations::Many(vec!["A1:A3".to_owned(), "A5".to_owned(), "B1".to_owned()]))
        );
    }

    #[test]
    fn index_collapses_row_run_after_columns() {
        let index = translate(
            &sheet(&[("A1", "x"), ("B1", "x"), ("C1", "x"), ("C2", "x")]),
            &InvertedIndexOptions::default(),
        );
        assert_eq!(
            index.get("x"),
            Some(&IndexLocations::Many(vec!["A1:B1".to_owned(), "C1:C2".to_owned()]))
        );
    }

    #[test]
    fn index_single_address_is_not_wrapped() {
        let index = translate(&sheet(&[("C3", "solo")]), &InvertedIndexOptions::default());
        assert_eq!(index.to_json(), serde_json::json!({"solo": "C3"}));
    }

    #[test]
    fn index_without_range_optimization() {
        let index = translate(
            &sheet(&[("A1", "v"), ("A2", "v")]),
            &InvertedIndexOptions {
                optimize_ranges: false,
                ..Default::default()
            },
        );
        assert_eq!(index.to_json(), serde_json::json!({"v": ["A1", "A2"]}));
    }

    #[test]
    fn index_separates_formats() {
        let sheet = WorksheetContext::from_cells(
            "Sheet1",
            vec![
                CellData::new(CellAddress::new(0, 0), 1000.5).with_format("$#,##0.00"),
                CellData::new(CellAddress::new(1, 0), 1000.5).with_format("0.00%"),
            ],
        );
        let index = translate(&sheet, &InvertedIndexOptions::default());
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("1000.5|$#,##0.00"), Some(&IndexLocations::Single("A1".to_owned())));
        assert_eq!(index.get("1000.5|0.00%"), Some(&IndexLocations::Single("A2".to_owned())));

        let merged = translate(&sheet, &InvertedIndexOptions {
            include_formats: false,
            ..Default::default()
        });
        assert_eq!(merged.get("1000.5"), Some(&IndexLocations::Single("A1:A2".to_owned())));
    }

    #[test]
    fn index_renders_workbook_json() {
        let index = translate(&sheet(&[("A1", "a"), ("B1", " ")]), &InvertedIndexOptions::default());
        assert_eq!(render(&[index]).unwrap(), r#"{"Sheet1":{"a":"A1"}}"#);
    }

    #[test]
    fn index_renders_text_lines() {
        let cells = [("A1", "Item"), ("A2", "Item"), ("A3", "Item"), ("B1", "Item"), ("B2", "x")];
        let index = translate(&sheet(&cells), &InvertedIndexOptions::default());
        assert_eq!(render_text(&[index]), "## Sheet: Sheet1\nItem: A1:A3,B1\nx: B2");
    }

    fn arbitrary_sheet() -> impl Strategy<Value = WorksheetContext> {
        prop::collection::vec((0usize..15, 0usize..8, prop::sample::select(vec!["a", "b", "c", " ", "7"])), 0..80)
            .prop_map(|cells| {
                WorksheetContext::from_cells(
                    "Sheet1",
                    cells
                        .into_iter()
                        .map(|(row, col, value)| CellData::new(CellAddress::new(row, col), value)),
                )
            })
    }

    proptest! {
        #[test]
        fn index_round_trips_non_empty_cells(sheet in arbitrary_sheet(), threshold in 0usize..5, optimize in any::<bool>()) {
            let options = InvertedIndexOptions {
                optimize_ranges: optimize,
                range_threshold: threshold,
                ..Default::default()
            };
            let pairs = translate(&sheet, &options).expand().unwrap();
            let expected: BTreeSet<(String, CellAddress)> = sheet
                .non_empty_cells()
                .map(|cell| (cell_key(cell, true), cell.address))
                .collect();
            let actual: BTreeSet<(String, CellAddress)> = pairs.iter().cloned().collect();
            prop_assert_eq!(pairs.len(), expected.len());
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn index_retranslation_is_idempotent(sheet in arbitrary_sheet()) {
            let options = InvertedIndexOptions::default();
            let index = translate(&sheet, &options);
            let rebuilt = WorksheetContext::from_cells(
                "Sheet1",
                index
                    .expand()
                    .unwrap()
                    .into_iter()
                    .map(|(key, address)| CellData::new(address, key)),
            );
            prop_assert_eq!(translate(&rebuilt, &options), index);
        }
    }
}
