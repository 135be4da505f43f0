//! Crate configuration, loaded from JSON.
//!
//! ```json
//! {
//!   "compression": { "strategy": "aggressive", "target_token_limit": 8000 },
//!   "qa": { "temperature": 0.0, "cost_per_thousand_tokens": 0.01 }
//! }
//! ```
//!
//! Every field is optional and falls back to its default.
use crate::chain::QaOptions;
use crate::compression::strategy::CompressionOptions;
use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Read config '{path}' failed: {source}")]
    Io { path: String, source: std::io::Error },

    #[error("Malformed config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetLlmConfig {
    pub compression: CompressionOptions,
    pub qa: QaOptions,
}

impl SheetLlmConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_string_lossy().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Rejects values no run could use.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let limits = [
            ("compression.target_token_limit", self.compression.target_token_limit),
            ("qa.compression.target_token_limit", self.qa.compression.target_token_limit),
        ];
        for (field, limit) in limits {
            if limit == Some(0) {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be positive".to_owned(),
                });
            }
        }
        if !(0.0..=2.0).contains(&self.qa.temperature) {
            return Err(ConfigError::Invalid {
                field: "qa.temperature",
                reason: format!("{} is outside 0.0..=2.0", self.qa.temperature),
            });
        }
        if self.qa.max_tokens == 0 {
            return Err(ConfigError::Invalid {
                field: "qa.max_tokens",
                reason: "must be positive".to_owned(),
            });
        }
        let cost = self.qa.cost_per_thousand_tokens;
        if cost.is_nan() || cost < 0.0 {
            return Err(ConfigError::Invalid {
                field: "qa.cost_per_thousand_tokens",
                reason: "must not be negative".to_owned(),
            });
        }
        Ok(())
    }
}
