//! # Chain-of-Spreadsheet question answering
//!
//! `compress → detect tables → select → extract → answer`, falling back to the
//! whole compressed text when no usable table is found. Language-model calls
//! sit behind the ports of [`ports`]; the cascade lives in [`orchestrator`].
pub mod cancellation;
pub mod orchestrator;
pub mod ports;

use crate::compression::pipeline::PipelineFailure;
use crate::spreadsheet::SpreadsheetError;
use thiserror::Error;

pub use cancellation::Cancellation;
pub use orchestrator::ChainOfSpreadsheet;
pub use orchestrator::QaOptions;
pub use orchestrator::QaRequest;
pub use orchestrator::QaResponse;
pub use orchestrator::ReasoningTrace;
pub use ports::ActivitySink;
pub use ports::ChatCompletion;
pub use ports::CostLedger;
pub use ports::DetectedTable;
pub use ports::TableDetection;
pub use ports::TableDetector;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Question answering was cancelled")]
    Cancelled,

    #[error("Table detection failed: {0:#}")]
    Detection(anyhow::Error),

    #[error("Answer generation failed: {0:#}")]
    Completion(anyhow::Error),

    #[error("Invalid table detection response: {0}")]
    InvalidDetection(String),

    #[error("{0}")]
    Compression(#[from] PipelineFailure),

    #[error("{0}")]
    Spreadsheet(#[from] SpreadsheetError),
}
