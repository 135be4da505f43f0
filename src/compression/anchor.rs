//! Structural anchor detection.
//!
//! Every row (and column) gets a profile: the distribution of feature keys
//! over its non-empty cells, a feature key being the value kind optionally
//! refined by number format and style. A row scores the largest total
//! variation distance to its adjacent rows, so a band of text headers on top
//! of numeric records scores high while the records themselves score zero.
//! Rows and columns at or above the threshold become anchors.
use crate::spreadsheet::CellData;
use crate::spreadsheet::ValueKind;
use crate::spreadsheet::WorkbookContext;
use crate::spreadsheet::WorksheetContext;
use log::debug;
use rayon::prelude::*;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::ops::RangeInclusive;

/// Score given to a populated row whose neighbor inside the grid is empty.
pub const EMPTY_NEIGHBOR_SCORE: f64 = 0.5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorOptions {
    pub min_heterogeneity_score: f64,
    pub consider_styles: bool,
    pub consider_number_formats: bool,
    /// Anchors every row of the header zone instead of its boundary row only
    pub detect_multi_level_headers: bool,
}

impl Default for AnchorOptions {
    fn default() -> Self {
        Self {
            min_heterogeneity_score: 0.6,
            consider_styles: true,
            consider_number_formats: true,
            detect_multi_level_headers: true,
        }
    }
}

/// Anchor rows and columns of one sheet, each with its heterogeneity score.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StructuralAnchors {
    pub sheet_name: String,
    pub rows: BTreeMap<usize, f64>,
    pub cols: BTreeMap<usize, f64>,
}

impl StructuralAnchors {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.cols.is_empty()
    }

    pub fn is_anchor_row(&self, row: usize) -> bool {
        self.rows.contains_key(&row)
    }

    pub fn is_anchor_col(&self, col: usize) -> bool {
        self.cols.contains_key(&col)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
struct FeatureKey<'a> {
    kind: ValueKind,
    format: Option<&'a str>,
    style: Option<&'a str>,
}

#[derive(Debug, Default)]
struct Profile<'a> {
    counts: HashMap<FeatureKey<'a>, usize>,
    total: usize,
}

impl<'a> Profile<'a> {
    fn add(&mut self, key: FeatureKey<'a>) {
        *self.counts.entry(key).or_default() += 1;
        self.total += 1;
    }

    fn count(&self, key: &FeatureKey<'a>) -> u128 {
        self.counts.get(key).copied().unwrap_or(0) as u128
    }

    /// Total variation distance between the two feature distributions.
    ///
    /// Summed as `|a·T' - b·T|` in integers and divided once, so the score
    /// does not depend on key iteration order.
    fn distance(&self, other: &Profile<'a>) -> f64 {
        let (own_total, other_total) = (self.total as u128, other.total as u128);
        let gap = |key: &FeatureKey<'a>| (self.count(key) * other_total).abs_diff(other.count(key) * own_total);
        let own: u128 = self.counts.keys().map(gap).sum();
        let foreign: u128 = other
            .counts
            .keys()
            .filter(|key| !self.counts.contains_key(*key))
            .map(gap)
            .sum();
        ((own + foreign) as f64 / (2 * own_total * other_total) as f64).clamp(0.0, 1.0)
    }
}

fn feature_key<'a>(cell: &'a CellData, options: &AnchorOptions) -> FeatureKey<'a> {
    FeatureKey {
        kind: cell.value.kind(),
        format: cell.explicit_format().filter(|_| options.consider_number_formats),
        style: cell.style.as_deref().filter(|_| options.consider_styles),
    }
}

type Profiles<'a> = BTreeMap<usize, Profile<'a>>;

fn profiles<'a>(sheet: &'a WorksheetContext, options: &AnchorOptions) -> (Profiles<'a>, Profiles<'a>) {
    let mut rows = Profiles::new();
    let mut cols = Profiles::new();
    for cell in sheet.non_empty_cells() {
        let key = feature_key(cell, options);
        rows.entry(cell.address.row).or_default().add(key);
        cols.entry(cell.address.col).or_default().add(key);
    }
    (rows, cols)
}

/// Distance from `index` to `neighbor`, or `None` when the neighbor lies outside the grid.
fn neighbor_score(profiles: &Profiles<'_>, index: usize, neighbor: Option<usize>, line_count: usize) -> Option<f64> {
    let neighbor = neighbor.filter(|neighbor| *neighbor < line_count)?;
    let profile = profiles.get(&index)?;
    Some(match profiles.get(&neighbor) {
        Some(other) => profile.distance(other),
        None => EMPTY_NEIGHBOR_SCORE,
    })
}

/// Scores every populated line against its neighbors at `index - 1` and `index + 1`.
fn score_lines(profiles: &Profiles<'_>, line_count: usize) -> BTreeMap<usize, f64> {
    profiles
        .keys()
        .map(|&index| {
            let score = [index.checked_sub(1), index.checked_add(1)]
                .into_iter()
                .filter_map(|neighbor| neighbor_score(profiles, index, neighbor, line_count))
                .fold(0.0, f64::max);
            (index, score)
        })
        .collect()
}

/// Heterogeneity scores of all populated rows and columns of a sheet.
pub fn score_sheet(sheet: &WorksheetContext, options: &AnchorOptions) -> (BTreeMap<usize, f64>, BTreeMap<usize, f64>) {
    let (rows, cols) = profiles(sheet, options);
    let dimensions = sheet.dimensions();
    (
        score_lines(&rows, dimensions.row_count),
        score_lines(&cols, dimensions.col_count),
    )
}

/// Deepest header band considered at the top of a sheet.
pub const MAX_HEADER_ROWS: usize = 5;

/// Rows from the first populated row down to the first row whose profile
/// differs from the populated row below it. Stacked header rows sharing one
/// profile all belong to the zone, whatever the threshold.
fn header_zone(rows: &Profiles<'_>) -> Option<RangeInclusive<usize>> {
    let first = *rows.keys().next()?;
    for row in first..first + MAX_HEADER_ROWS {
        let current = rows.get(&row)?;
        let next = rows.get(&(row + 1))?;
        if current.distance(next) > 0.0 {
            return Some(first..=row);
        }
    }
    None
}

/// Detects the anchors of one sheet.
///
/// Inside the header zone only the boundary row is scored: with multi-level
/// headers every zone row inherits the boundary's score, otherwise the
/// boundary row stands alone. The row just below the zone is judged by its
/// lower neighbor only, so the header/data transition does not anchor the
/// first record.
pub fn detect_sheet(sheet: &WorksheetContext, options: &AnchorOptions) -> StructuralAnchors {
    let threshold = options.min_heterogeneity_score;
    let (row_profiles, col_profiles) = profiles(sheet, options);
    let dimensions = sheet.dimensions();
    let row_scores = score_lines(&row_profiles, dimensions.row_count);
    let col_scores = score_lines(&col_profiles, dimensions.col_count);

    let zone = header_zone(&row_profiles);
    let mut rows = BTreeMap::new();
    for (&row, &score) in &row_scores {
        let score = match &zone {
            Some(zone) if zone.contains(&row) => continue,
            Some(zone) if row == zone.end() + 1 => {
                neighbor_score(&row_profiles, row, row.checked_add(1), dimensions.row_count).unwrap_or(0.0)
            }
            _ => score,
        };
        if score >= threshold {
            rows.insert(row, score);
        }
    }
    if let Some(zone) = zone {
        let boundary = *zone.end();
        let score = row_scores.get(&boundary).copied().unwrap_or(0.0);
        if score >= threshold {
            if options.detect_multi_level_headers {
                rows.extend(zone.map(|row| (row, score)));
            } else {
                rows.insert(boundary, score);
            }
        }
    }

    let cols: BTreeMap<usize, f64> = col_scores
        .into_iter()
        .filter(|(_, score)| *score >= threshold)
        .collect();

    debug!(
        "Sheet '{}': {} anchor rows, {} anchor columns at threshold {}",
        sheet.name,
        rows.len(),
        cols.len(),
        threshold
    );
    StructuralAnchors {
        sheet_name: sheet.name.to_owned(),
        rows,
        cols,
    }
}

/// Detects anchors of every sheet; sheets are scored in parallel.
pub fn detect(workbook: &WorkbookContext, options: &AnchorOptions) -> Vec<StructuralAnchors> {
    workbook
        .sheets
        .par_iter()
        .map(|sheet| detect_sheet(sheet, options))
        .collect()
}
