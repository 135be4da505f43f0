//! # Rusty Sheet LLM
//!
//! Spreadsheet compression for language-model context windows, and
//! question answering that localizes a table before asking the model.
//!
//! ## Features
//!
//! - **Grid model**: zero-based addresses with a bijective `A1` labeling and
//!   sparse worksheets ([`spreadsheet`])
//! - **Compression codec**: structural anchors, skeleton extraction, inverted
//!   index, format-aware aggregation and literal rendering ([`compression`])
//! - **Pipelines**: named presets (`none`, `balanced`, `aggressive`) or custom
//!   step lists with per-step timings and artifacts
//! - **Token budget**: `ceil(chars / 4)` estimates, with one escalation to the
//!   aggressive preset when the output is too large
//! - **Chain-of-Spreadsheet**: compress, detect tables, select, extract and
//!   answer, with a full-context fallback and an optional reasoning trace
//!   ([`chain`])
//!
//! Parsing spreadsheet files and calling language models are left to the
//! [`WorkbookLoader`], [`TableDetector`] and [`ChatCompletion`] ports.
pub mod chain;
pub mod compression;
pub mod config;
pub mod error;
pub mod spreadsheet;

pub use chain::Cancellation;
pub use chain::ChainOfSpreadsheet;
pub use chain::ChatCompletion;
pub use chain::QaOptions;
pub use chain::QaRequest;
pub use chain::QaResponse;
pub use chain::TableDetector;
pub use compression::estimate_tokens;
pub use compression::pipeline::CompressionPipeline;
pub use compression::strategy::CompressionOptions;
pub use compression::strategy::CompressionStrategy;
pub use compression::strategy::SpreadsheetCompressor;
pub use compression::CompressionResult;
pub use config::SheetLlmConfig;
pub use error::SheetLlmError;
pub use spreadsheet::WorkbookContext;
pub use spreadsheet::WorkbookLoader;
pub use spreadsheet::WorksheetContext;
