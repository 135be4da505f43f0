//! Boundaries to the collaborators of the QA cascade.
//!
//! Table detection and chat completion are language-model calls behind
//! async traits; the cost ledger and activity sink are write-only,
//! fire-and-forget sinks.
use crate::chain::ChainError;
use crate::spreadsheet::CellAddress;
use crate::spreadsheet::CellRange;
use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;

/// Table region reported by table detection, with 1-based inclusive bounds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectedTable {
    #[serde(alias = "sheetName", alias = "sheet")]
    pub sheet_name: String,
    #[serde(alias = "topRow")]
    pub top_row: usize,
    #[serde(alias = "leftColumn")]
    pub left_column: usize,
    #[serde(alias = "bottomRow")]
    pub bottom_row: usize,
    #[serde(alias = "rightColumn")]
    pub right_column: usize,
    #[serde(alias = "confidenceScore", alias = "confidence")]
    pub confidence_score: f64,
    #[serde(default, alias = "tableType")]
    pub table_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl DetectedTable {
    /// Zero-based range of the bounds; `None` when a bound is zero.
    pub fn range(&self) -> Option<CellRange> {
        let start = CellAddress::new(self.top_row.checked_sub(1)?, self.left_column.checked_sub(1)?);
        let end = CellAddress::new(self.bottom_row.checked_sub(1)?, self.right_column.checked_sub(1)?);
        Some(CellRange::new(start, end))
    }

    /// `(1,1,10,4)` becomes `A1:D10`.
    pub fn range_label(&self) -> Option<String> {
        self.range().map(|range| range.label())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TableDetection {
    pub tables: Vec<DetectedTable>,
    pub tokens_used: usize,
    pub estimated_cost: f64,
    pub raw_response_text: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DetectionPayload {
    Tables(Vec<DetectedTable>),
    Wrapped { tables: Vec<DetectedTable> },
}

impl TableDetection {
    /// Parses a model response holding a JSON list of tables, bare or as
    /// `{"tables": [...]}`, optionally inside a Markdown code fence.
    pub fn from_json(raw_response_text: &str, tokens_used: usize, estimated_cost: f64) -> Result<Self, ChainError> {
        let body = raw_response_text.trim();
        let body = body
            .strip_prefix("```json")
            .or_else(|| body.strip_prefix("```"))
            .and_then(|inner| inner.trim_end().strip_suffix("```"))
            .unwrap_or(body)
            .trim();
        let tables = match serde_json::from_str(body) {
            Ok(DetectionPayload::Tables(tables)) | Ok(DetectionPayload::Wrapped { tables }) => tables,
            Err(error) => return Err(ChainError::InvalidDetection(error.to_string())),
        };
        Ok(Self {
            tables,
            tokens_used,
            estimated_cost,
            raw_response_text: raw_response_text.to_owned(),
        })
    }
}

/// Locates candidate tables in compressed spreadsheet text.
///
/// Finding no table is a normal, empty result; errors are for transport or
/// protocol failures only.
#[async_trait]
pub trait TableDetector: Send + Sync {
    async fn detect(&self, compressed_text: &str, hint: Option<&str>) -> anyhow::Result<TableDetection>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    pub temperature: f64,
    pub max_tokens: usize,
}

#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn complete(&self, prompt: &str, options: &CompletionOptions) -> anyhow::Result<String>;
}

pub trait CostLedger: Send + Sync {
    fn record(&self, action_name: &str, cost_estimate: f64, metadata: &serde_json::Value);
}

/// One completed QA call, as reported to the activity sink.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QaActivity {
    pub question: String,
    pub file_id: Option<String>,
    pub tables_detected: usize,
    pub selected_table: String,
    pub answer: String,
    pub duration: Duration,
    pub total_cost: f64,
}

pub trait ActivitySink: Send + Sync {
    fn notify(&self, activity: &QaActivity);
}
