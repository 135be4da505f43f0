//! Named compression presets and the budget-aware compressor.
use crate::compression::anchor::AnchorOptions;
use crate::compression::pipeline::CompressionPipeline;
use crate::compression::pipeline::PipelineBuilder;
use crate::compression::pipeline::PipelineFailure;
use crate::compression::skeleton::SkeletonOptions;
use crate::compression::vanilla::VanillaOptions;
use crate::compression::CompressionError;
use crate::compression::CompressionResult;
use crate::error::ResultMessage;
use crate::error::SheetLlmError;
use crate::spreadsheet::load_workbook;
use crate::spreadsheet::LoadOptions;
use crate::spreadsheet::WorkbookContext;
use crate::spreadsheet::WorkbookLoader;
use log::info;
use log::warn;
use serde::Deserialize;
use serde::Serialize;
use std::fmt::Display;
use std::path::Path;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum CompressionStrategy {
    /// Every non-empty cell, literally
    None,
    #[default]
    Balanced,
    /// Smallest output; structure beyond strong anchors is dropped
    Aggressive,
}

impl CompressionStrategy {
    pub const fn as_str(&self) -> &'static str {
        match self {
            CompressionStrategy::None => "none",
            CompressionStrategy::Balanced => "balanced",
            CompressionStrategy::Aggressive => "aggressive",
        }
    }

    /// Parses a strategy name, case-insensitively.
    ///
    /// - None: "none", "vanilla", "raw"
    /// - Balanced: "balanced", "default"
    /// - Aggressive: "aggressive", "max"
    pub fn parse(name: &str) -> Result<Self, CompressionError> {
        match name.trim().to_ascii_uppercase().as_str() {
            "NONE" | "VANILLA" | "RAW" => Ok(Self::None),
            "BALANCED" | "DEFAULT" => Ok(Self::Balanced),
            "AGGRESSIVE" | "MAX" => Ok(Self::Aggressive),
            _ => Err(CompressionError::UnsupportedStrategy(name.to_string())),
        }
    }

    /// Pre-built pipeline of this preset.
    ///
    /// `token_limit` caps the literal output of the aggressive preset only;
    /// the two flags steer what the balanced skeleton keeps.
    pub fn pipeline(
        &self,
        token_limit: Option<usize>,
        preserve_formulas: bool,
        preserve_formatting: bool,
    ) -> Result<CompressionPipeline, CompressionError> {
        let builder = PipelineBuilder::default().strategy(*self);
        let builder = match self {
            CompressionStrategy::None => builder,
            CompressionStrategy::Balanced => builder
                .anchors(AnchorOptions {
                    min_heterogeneity_score: 0.6,
                    consider_styles: true,
                    consider_number_formats: true,
                    detect_multi_level_headers: true,
                })
                .skeleton(SkeletonOptions {
                    k: 2,
                    preserve_nearby_non_empty: true,
                    preserve_formulas,
                    preserve_formatted_cells: preserve_formatting,
                    ..Default::default()
                }),
            CompressionStrategy::Aggressive => builder
                .anchors(AnchorOptions {
                    min_heterogeneity_score: 0.8,
                    consider_styles: false,
                    consider_number_formats: false,
                    detect_multi_level_headers: false,
                })
                .skeleton(SkeletonOptions {
                    k: 0,
                    preserve_nearby_non_empty: false,
                    preserve_formulas: false,
                    preserve_formatted_cells: false,
                    ..Default::default()
                }),
        };
        let max_tokens = token_limit.filter(|_| *self == CompressionStrategy::Aggressive);
        builder
            .vanilla(VanillaOptions {
                include_formats: false,
                max_tokens,
            })
            .build()
    }
}

impl Display for CompressionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for CompressionStrategy {
    type Error = CompressionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionOptions {
    pub strategy: CompressionStrategy,
    /// Output above this many tokens escalates once to the aggressive preset
    pub target_token_limit: Option<usize>,
    pub preserve_formulas: bool,
    pub preserve_formatting: bool,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            strategy: CompressionStrategy::Balanced,
            target_token_limit: None,
            preserve_formulas: true,
            preserve_formatting: true,
        }
    }
}

/// Compresses workbooks with a preset, honoring the token budget.
#[derive(Clone, Debug, Default)]
pub struct SpreadsheetCompressor {
    options: CompressionOptions,
}

const CONTEXT_LOSS_WARNING: &str =
    "Aggressive compression keeps only strong structural anchors; context outside them is lost";

impl SpreadsheetCompressor {
    pub fn new(options: CompressionOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CompressionOptions {
        &self.options
    }

    fn run(&self, strategy: CompressionStrategy, workbook: &WorkbookContext) -> Result<CompressionResult, PipelineFailure> {
        let options = &self.options;
        let pipeline = strategy
            .pipeline(options.target_token_limit, options.preserve_formulas, options.preserve_formatting)
            .map_err(|source| PipelineFailure {
                step: strategy.to_string(),
                source,
                step_timings: Vec::new(),
                artifacts: Default::default(),
                warnings: Vec::new(),
            })?;
        let mut result = pipeline.run(workbook)?;
        if strategy == CompressionStrategy::Aggressive {
            warn!("{}", CONTEXT_LOSS_WARNING);
            result.warnings.push(CONTEXT_LOSS_WARNING.to_owned());
        }
        Ok(result)
    }

    /// Compresses with the configured preset.
    ///
    /// When the output exceeds `target_token_limit`, the workbook is compressed
    /// once more with the aggressive preset capped to the limit. There is no
    /// further escalation.
    pub fn compress(&self, workbook: &WorkbookContext) -> Result<CompressionResult, PipelineFailure> {
        let strategy = self.options.strategy;
        let result = self.run(strategy, workbook)?;
        let limit = match self.options.target_token_limit {
            Some(limit) if result.compressed_token_count > limit => limit,
            _ => return Ok(result),
        };

        if strategy == CompressionStrategy::Aggressive {
            let message = format!(
                "Compressed output of {} tokens still exceeds the target of {} tokens",
                result.compressed_token_count, limit
            );
            warn!("{}", message);
            let mut result = result;
            result.warnings.push(message);
            return Ok(result);
        }

        let message = format!(
            "Compressed output of {} tokens exceeded the target of {} tokens; escalated from {} to {}",
            result.compressed_token_count,
            limit,
            strategy,
            CompressionStrategy::Aggressive
        );
        info!("{}", message);
        let mut escalated = self.run(CompressionStrategy::Aggressive, workbook)?;

        let mut warnings = result.warnings;
        warnings.push(message);
        warnings.append(&mut escalated.warnings);
        if escalated.compressed_token_count > limit {
            let message = format!(
                "Escalated output of {} tokens still exceeds the target of {} tokens",
                escalated.compressed_token_count, limit
            );
            warn!("{}", message);
            warnings.push(message);
        }
        let mut step_timings = result.step_timings;
        step_timings.append(&mut escalated.step_timings);

        Ok(CompressionResult {
            warnings,
            step_timings,
            ..escalated
        })
    }

    /// Loads a workbook through `loader`, then compresses it.
    pub fn compress_file(
        &self,
        loader: &dyn WorkbookLoader,
        path: &Path,
        load_options: &LoadOptions,
    ) -> Result<CompressionResult, SheetLlmError> {
        let workbook = load_workbook(loader, path, load_options)?;
        self.compress(&workbook)
            .map_err(SheetLlmError::from)
            .with_prefix(&format!("Compress '{}'", path.display()))
    }
}
