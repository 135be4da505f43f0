use thiserror::Error;

/// Main error type of the crate.
/// Aggregates the module errors and collaborator failures.
#[derive(Error, Debug)]
pub enum SheetLlmError {
    #[error("{0}")]
    WithContextError(String),

    #[error("{0}")]
    AnyhowError(#[from] anyhow::Error),

    #[error("{0}")]
    JsonError(#[from] serde_json::Error),

    // Spreadsheet module errors
    #[error("{0}")]
    SpreadsheetError(#[from] crate::spreadsheet::SpreadsheetError),

    #[error("{0}")]
    ReferenceError(#[from] crate::spreadsheet::ReferenceError),

    // Compression module errors
    #[error("{0}")]
    CompressionError(#[from] crate::compression::CompressionError),

    #[error("{0}")]
    PipelineFailure(#[from] crate::compression::pipeline::PipelineFailure),

    // Chain module errors
    #[error("{0}")]
    ChainError(#[from] crate::chain::ChainError),

    #[error("{0}")]
    ConfigError(#[from] crate::config::ConfigError),
}

pub trait ResultMessage {
    fn with_prefix(self, message: &str) -> Self;
}

impl<T> ResultMessage for Result<T, SheetLlmError> {
    fn with_prefix(self, message: &str) -> Self {
        self.map_err(|e| SheetLlmError::WithContextError(format!("{}: {}", message, e)))
    }
}
