//! Literal rendering of non-empty cells, one line per row:
//!
//! ```text
//! ## Sheet: Sales
//! A1,Product|B1,Price
//! A2,Widget|B2,9.99
//! ```
use crate::compression::tokens_for_chars;
use crate::spreadsheet::CellData;
use crate::spreadsheet::WorksheetContext;
use serde::Deserialize;
use serde::Serialize;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VanillaOptions {
    /// Appends ` <format>` after values carrying an explicit number format
    pub include_formats: bool,
    /// Stops emitting cells once the estimated output would exceed this many tokens
    pub max_tokens: Option<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct VanillaOutput {
    pub text: String,
    pub emitted_cells: usize,
    pub truncated_cells: usize,
}

impl VanillaOutput {
    pub fn warning(&self) -> Option<String> {
        (self.truncated_cells > 0).then(|| {
            format!(
                "Token budget reached: {} of {} cells were not serialized",
                self.truncated_cells,
                self.emitted_cells + self.truncated_cells
            )
        })
    }
}

/// Renders one cell as `A1,value`.
pub fn render_cell(cell: &CellData, include_formats: bool) -> String {
    match cell.explicit_format().filter(|_| include_formats) {
        Some(format) => format!("{},{} <{}>", cell.reference(), cell.rendered(), format),
        None => format!("{},{}", cell.reference(), cell.rendered()),
    }
}

fn append(text: &mut String, chars: &mut usize, piece: &str) {
    text.push_str(piece);
    *chars += piece.chars().count();
}

fn fits(chars: usize, piece: &str, max_tokens: Option<usize>) -> bool {
    max_tokens
        .map(|max_tokens| tokens_for_chars(chars + piece.chars().count()) <= max_tokens)
        .unwrap_or(true)
}

/// Renders the sheets in order, separated by blank lines.
///
/// Sheet headers count against `max_tokens` like cells do; once a piece does
/// not fit, every remaining cell is reported as truncated.
pub fn serialize<'a>(sheets: impl IntoIterator<Item = &'a WorksheetContext>, options: &VanillaOptions) -> VanillaOutput {
    let mut text = String::new();
    let mut chars = 0usize;
    let mut emitted_cells = 0usize;
    let mut truncated_cells = 0usize;
    let mut exhausted = false;

    for (index, sheet) in sheets.into_iter().enumerate() {
        let header = format!("{}## Sheet: {}", if index > 0 { "\n\n" } else { "" }, sheet.name);
        if !exhausted && !fits(chars, &header, options.max_tokens) {
            exhausted = true;
        }
        if exhausted {
            truncated_cells += sheet.statistics().non_empty_cells;
            continue;
        }
        append(&mut text, &mut chars, &header);

        let mut current_row = None;
        for cell in sheet.non_empty_cells() {
            if exhausted {
                truncated_cells += 1;
                continue;
            }
            let separator = if current_row == Some(cell.address.row) { "|" } else { "\n" };
            let piece = format!("{}{}", separator, render_cell(cell, options.include_formats));
            if fits(chars, &piece, options.max_tokens) {
                append(&mut text, &mut chars, &piece);
                current_row = Some(cell.address.row);
                emitted_cells += 1;
            } else {
                exhausted = true;
                truncated_cells += 1;
            }
        }
    }

    VanillaOutput {
        text,
        emitted_cells,
        truncated_cells,
    }
}
