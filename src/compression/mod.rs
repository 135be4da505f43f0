//! # Spreadsheet Compression
//!
//! Encoders that shrink a [`WorkbookContext`](crate::spreadsheet::WorkbookContext)
//! into text a language model can read within its context window:
//!
//! - **Anchors** ([`anchor`]): heterogeneity scoring of rows and columns
//! - **Skeleton** ([`skeleton`]): anchors plus a neighborhood, the rest dropped
//! - **Inverted index** ([`inverted_index`]): value to location groups with ranges
//! - **Aggregation** ([`aggregation`], [`recognizer`]): homogeneous regions as type tokens
//! - **Vanilla** ([`vanilla`]): literal `address,value` rendering
//!
//! The steps compose through [`pipeline::CompressionPipeline`]; the named
//! presets of [`strategy::CompressionStrategy`] are pre-built pipelines and
//! [`strategy::SpreadsheetCompressor`] adds the token budget.
pub mod aggregation;
pub mod anchor;
pub mod inverted_index;
pub mod pipeline;
pub mod recognizer;
pub mod skeleton;
pub mod strategy;
pub mod vanilla;

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by compression steps and their configuration.
#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Unsupported compression strategy '{0}'")]
    UnsupportedStrategy(String),

    #[error("A compression pipeline needs at least one step")]
    EmptyPipeline,

    #[error("Step '{step}' requires the output of '{requires}'")]
    MissingInput { step: String, requires: &'static str },

    #[error("Pipeline slot '{0}' was already filled by an earlier step")]
    SlotOccupied(&'static str),

    #[error("Step '{step}' failed: {message}")]
    StepFailed { step: String, message: String },

    #[error("{0}")]
    Serialization(#[from] serde_json::Error),
}

/// Opaque per-step outputs keyed by name, kept for inspection and debugging.
pub type Artifacts = BTreeMap<String, serde_json::Value>;

/// Estimates the token count of a text as `ceil(chars / 4)`.
///
/// Every budget, ratio and cost figure of the crate goes through this one
/// function so numbers stay comparable across runs.
pub fn estimate_tokens(text: &str) -> usize {
    tokens_for_chars(text.chars().count())
}

pub(crate) fn tokens_for_chars(chars: usize) -> usize {
    chars.div_ceil(4)
}

/// Wall-clock duration of one pipeline step.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StepTiming {
    pub step: String,
    pub duration: Duration,
}

/// Output of one compression call. Immutable once produced.
#[derive(Clone, Debug, Serialize)]
pub struct CompressionResult {
    pub compressed_text: String,
    /// Estimate for the literal rendering of every non-empty cell
    pub original_token_count: usize,
    pub compressed_token_count: usize,
    pub step_timings: Vec<StepTiming>,
    pub artifacts: Artifacts,
    pub warnings: Vec<String>,
    /// Preset that produced the text, `None` for hand-built pipelines
    pub strategy: Option<strategy::CompressionStrategy>,
}

impl CompressionResult {
    /// `original / compressed`, with a denominator of at least one token.
    pub fn compression_ratio(&self) -> f64 {
        self.original_token_count as f64 / self.compressed_token_count.max(1) as f64
    }

    pub fn total_duration(&self) -> Duration {
        self.step_timings.iter().map(|timing| timing.duration).sum()
    }
}
