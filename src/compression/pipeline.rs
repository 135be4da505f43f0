//! Composable compression pipeline.
//!
//! A pipeline is an ordered list of [`PipelineStep`]s run strictly in
//! sequence over one [`PipelineContext`]. The context keeps one typed slot per
//! intermediate result; a slot is written once and read by later steps. The
//! first failing step halts the run, and the returned [`PipelineFailure`]
//! still carries the timings, artifacts and warnings of the steps that
//! completed.
use crate::compression::aggregation;
use crate::compression::aggregation::AggregatedSheet;
use crate::compression::aggregation::AggregationOptions;
use crate::compression::anchor;
use crate::compression::anchor::AnchorOptions;
use crate::compression::anchor::StructuralAnchors;
use crate::compression::estimate_tokens;
use crate::compression::inverted_index;
use crate::compression::inverted_index::InvertedIndex;
use crate::compression::inverted_index::InvertedIndexOptions;
use crate::compression::skeleton;
use crate::compression::skeleton::SkeletonOptions;
use crate::compression::skeleton::SkeletonWorkbook;
use crate::compression::strategy::CompressionStrategy;
use crate::compression::vanilla;
use crate::compression::vanilla::VanillaOptions;
use crate::compression::Artifacts;
use crate::compression::CompressionError;
use crate::compression::CompressionResult;
use crate::compression::StepTiming;
use crate::spreadsheet::WorkbookContext;
use crate::spreadsheet::WorksheetContext;
use log::debug;
use log::warn;
use std::time::Instant;
use thiserror::Error;

pub const ANCHOR_DETECTION: &str = "anchor_detection";
pub const SKELETON_EXTRACTION: &str = "skeleton_extraction";
pub const INVERTED_INDEX: &str = "inverted_index";
pub const FORMAT_AGGREGATION: &str = "format_aggregation";
pub const VANILLA_ENCODING: &str = "vanilla_encoding";

/// One named unit of work over the shared context.
pub trait PipelineStep: Send + Sync {
    fn name(&self) -> &str;

    fn execute(&self, context: &mut PipelineContext<'_>) -> Result<(), CompressionError>;
}

/// State shared by the steps of one run.
#[derive(Debug)]
pub struct PipelineContext<'a> {
    workbook: &'a WorkbookContext,
    anchors: Option<Vec<StructuralAnchors>>,
    skeleton: Option<SkeletonWorkbook>,
    index: Option<Vec<InvertedIndex>>,
    aggregation: Option<Vec<AggregatedSheet>>,
    rendered: Vec<(String, String)>,
    artifacts: Artifacts,
    warnings: Vec<String>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(workbook: &'a WorkbookContext) -> Self {
        Self {
            workbook,
            anchors: None,
            skeleton: None,
            index: None,
            aggregation: None,
            rendered: Vec::new(),
            artifacts: Artifacts::new(),
            warnings: Vec::new(),
        }
    }

    pub fn workbook(&self) -> &'a WorkbookContext {
        self.workbook
    }

    pub fn anchors(&self) -> Option<&[StructuralAnchors]> {
        self.anchors.as_deref()
    }

    pub fn skeleton(&self) -> Option<&SkeletonWorkbook> {
        self.skeleton.as_ref()
    }

    pub fn index(&self) -> Option<&[InvertedIndex]> {
        self.index.as_deref()
    }

    pub fn aggregation(&self) -> Option<&[AggregatedSheet]> {
        self.aggregation.as_deref()
    }

    /// Skeleton sheets once extracted, the source sheets otherwise.
    pub fn current_sheets(&self) -> Vec<&WorksheetContext> {
        match &self.skeleton {
            Some(skeleton) => skeleton.worksheets().collect(),
            None => self.workbook.sheets.iter().collect(),
        }
    }

    pub fn set_anchors(&mut self, anchors: Vec<StructuralAnchors>) -> Result<(), CompressionError> {
        fill(&mut self.anchors, anchors, "anchors")
    }

    pub fn set_skeleton(&mut self, skeleton: SkeletonWorkbook) -> Result<(), CompressionError> {
        fill(&mut self.skeleton, skeleton, "skeleton")
    }

    pub fn set_index(&mut self, index: Vec<InvertedIndex>) -> Result<(), CompressionError> {
        fill(&mut self.index, index, "index")
    }

    pub fn set_aggregation(&mut self, aggregation: Vec<AggregatedSheet>) -> Result<(), CompressionError> {
        fill(&mut self.aggregation, aggregation, "aggregation")
    }

    /// Appends text to the final output.
    pub fn push_text(&mut self, step: &str, text: String) {
        self.rendered.push((step.to_owned(), text));
    }

    pub fn rendered(&self) -> &[(String, String)] {
        &self.rendered
    }

    pub fn record_artifact(&mut self, name: &str, value: serde_json::Value) {
        self.artifacts.insert(name.to_owned(), value);
    }

    pub fn warn(&mut self, message: String) {
        warn!("{}", message);
        self.warnings.push(message);
    }
}

fn fill<T>(slot: &mut Option<T>, value: T, name: &'static str) -> Result<(), CompressionError> {
    match slot {
        Some(_) => Err(CompressionError::SlotOccupied(name)),
        None => {
            *slot = Some(value);
            Ok(())
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct AnchorDetectionStep {
    pub options: AnchorOptions,
}

impl PipelineStep for AnchorDetectionStep {
    fn name(&self) -> &str {
        ANCHOR_DETECTION
    }

    fn execute(&self, context: &mut PipelineContext<'_>) -> Result<(), CompressionError> {
        let anchors = anchor::detect(context.workbook(), &self.options);
        context.record_artifact(ANCHOR_DETECTION, serde_json::to_value(&anchors)?);
        context.set_anchors(anchors)
    }
}

#[derive(Clone, Debug, Default)]
pub struct SkeletonExtractionStep {
    pub options: SkeletonOptions,
}

impl PipelineStep for SkeletonExtractionStep {
    fn name(&self) -> &str {
        SKELETON_EXTRACTION
    }

    fn execute(&self, context: &mut PipelineContext<'_>) -> Result<(), CompressionError> {
        let anchors = context.anchors().ok_or_else(|| CompressionError::MissingInput {
            step: SKELETON_EXTRACTION.to_owned(),
            requires: ANCHOR_DETECTION,
        })?;
        let skeleton = skeleton::extract(context.workbook(), anchors, &self.options);

        let sheets: Vec<serde_json::Value> = skeleton
            .sheets
            .iter()
            .map(|sheet| {
                serde_json::json!({
                    "sheet": sheet.sheet.name,
                    "skeleton_cells": sheet.skeleton_cell_count,
                    "non_empty_cells": sheet.non_empty_cells,
                    "compression_ratio": sheet.compression_ratio(),
                })
            })
            .collect();
        context.record_artifact(
            SKELETON_EXTRACTION,
            serde_json::json!({
                "sheets": sheets,
                "compression_ratio": skeleton.compression_ratio(),
            }),
        );
        // already logged by the extractor
        context.warnings.extend(skeleton.warnings.iter().cloned());
        context.set_skeleton(skeleton)
    }
}

#[derive(Clone, Debug, Default)]
pub struct InvertedIndexStep {
    pub options: InvertedIndexOptions,
}

impl PipelineStep for InvertedIndexStep {
    fn name(&self) -> &str {
        INVERTED_INDEX
    }

    fn execute(&self, context: &mut PipelineContext<'_>) -> Result<(), CompressionError> {
        let indexes: Vec<InvertedIndex> = context
            .current_sheets()
            .into_iter()
            .map(|sheet| inverted_index::translate(sheet, &self.options))
            .collect();
        let text = inverted_index::render(&indexes)?;
        context.record_artifact(INVERTED_INDEX, serde_json::from_str(&text)?);
        context.push_text(INVERTED_INDEX, text);
        context.set_index(indexes)
    }
}

#[derive(Clone, Debug, Default)]
pub struct FormatAggregationStep {
    pub options: AggregationOptions,
}

impl PipelineStep for FormatAggregationStep {
    fn name(&self) -> &str {
        FORMAT_AGGREGATION
    }

    fn execute(&self, context: &mut PipelineContext<'_>) -> Result<(), CompressionError> {
        let sheets = aggregation::aggregate(&context.current_sheets(), &self.options);
        let artifact: serde_json::Map<String, serde_json::Value> = sheets
            .iter()
            .map(|sheet| (sheet.name.to_owned(), sheet.to_json()))
            .collect();
        context.record_artifact(FORMAT_AGGREGATION, serde_json::Value::Object(artifact));
        context.push_text(FORMAT_AGGREGATION, aggregation::render(&sheets));
        context.set_aggregation(sheets)
    }
}

#[derive(Clone, Debug, Default)]
pub struct VanillaEncodingStep {
    pub options: VanillaOptions,
}

impl PipelineStep for VanillaEncodingStep {
    fn name(&self) -> &str {
        VANILLA_ENCODING
    }

    fn execute(&self, context: &mut PipelineContext<'_>) -> Result<(), CompressionError> {
        let output = vanilla::serialize(context.current_sheets(), &self.options);
        context.record_artifact(
            VANILLA_ENCODING,
            serde_json::json!({
                "emitted_cells": output.emitted_cells,
                "truncated_cells": output.truncated_cells,
            }),
        );
        if let Some(warning) = output.warning() {
            context.warn(warning);
        }
        context.push_text(VANILLA_ENCODING, output.text);
        Ok(())
    }
}

type StepFn = dyn Fn(&mut PipelineContext<'_>) -> Result<(), CompressionError> + Send + Sync;

/// Caller-supplied step backed by a closure.
pub struct FnStep {
    name: String,
    function: Box<StepFn>,
}

impl FnStep {
    pub fn new<F>(name: &str, function: F) -> Self
    where
        F: Fn(&mut PipelineContext<'_>) -> Result<(), CompressionError> + Send + Sync + 'static,
    {
        Self {
            name: name.to_owned(),
            function: Box::new(function),
        }
    }
}

impl PipelineStep for FnStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, context: &mut PipelineContext<'_>) -> Result<(), CompressionError> {
        (self.function)(context)
    }
}

/// A step failed; completed work is kept for inspection.
#[derive(Error, Debug)]
#[error("Compression step '{step}' failed: {source}")]
pub struct PipelineFailure {
    pub step: String,
    pub source: CompressionError,
    pub step_timings: Vec<StepTiming>,
    pub artifacts: Artifacts,
    pub warnings: Vec<String>,
}

#[derive(Default)]
pub struct PipelineBuilder {
    steps: Vec<Box<dyn PipelineStep>>,
    strategy: Option<CompressionStrategy>,
}

impl PipelineBuilder {
    pub fn step(mut self, step: impl PipelineStep + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn anchors(self, options: AnchorOptions) -> Self {
        self.step(AnchorDetectionStep { options })
    }

    pub fn skeleton(self, options: SkeletonOptions) -> Self {
        self.step(SkeletonExtractionStep { options })
    }

    pub fn inverted_index(self, options: InvertedIndexOptions) -> Self {
        self.step(InvertedIndexStep { options })
    }

    pub fn aggregation(self, options: AggregationOptions) -> Self {
        self.step(FormatAggregationStep { options })
    }

    pub fn vanilla(self, options: VanillaOptions) -> Self {
        self.step(VanillaEncodingStep { options })
    }

    pub fn custom<F>(self, name: &str, function: F) -> Self
    where
        F: Fn(&mut PipelineContext<'_>) -> Result<(), CompressionError> + Send + Sync + 'static,
    {
        self.step(FnStep::new(name, function))
    }

    pub(crate) fn strategy(mut self, strategy: CompressionStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn build(self) -> Result<CompressionPipeline, CompressionError> {
        if self.steps.is_empty() {
            return Err(CompressionError::EmptyPipeline);
        }
        Ok(CompressionPipeline {
            steps: self.steps,
            strategy: self.strategy,
        })
    }
}

pub struct CompressionPipeline {
    steps: Vec<Box<dyn PipelineStep>>,
    strategy: Option<CompressionStrategy>,
}

impl CompressionPipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    pub fn strategy(&self) -> Option<CompressionStrategy> {
        self.strategy
    }

    /// Runs every step in order over `workbook`.
    pub fn run(&self, workbook: &WorkbookContext) -> Result<CompressionResult, PipelineFailure> {
        let mut context = PipelineContext::new(workbook);
        let mut step_timings = Vec::with_capacity(self.steps.len());

        for step in &self.steps {
            let started = Instant::now();
            let outcome = step.execute(&mut context);
            let duration = started.elapsed();
            if let Err(source) = outcome {
                warn!("Compression step '{}' failed after {:?}: {}", step.name(), duration, source);
                return Err(PipelineFailure {
                    step: step.name().to_owned(),
                    source,
                    step_timings,
                    artifacts: context.artifacts,
                    warnings: context.warnings,
                });
            }
            debug!("Compression step '{}' finished in {:?}", step.name(), duration);
            step_timings.push(StepTiming {
                step: step.name().to_owned(),
                duration,
            });
        }

        if context.rendered.is_empty() {
            let output = vanilla::serialize(context.current_sheets(), &VanillaOptions::default());
            context.push_text(VANILLA_ENCODING, output.text);
        }
        let compressed_text = context
            .rendered
            .iter()
            .map(|(_, text)| text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(CompressionResult {
            original_token_count: original_token_count(workbook),
            compressed_token_count: estimate_tokens(&compressed_text),
            compressed_text,
            step_timings,
            artifacts: context.artifacts,
            warnings: context.warnings,
            strategy: self.strategy,
        })
    }
}

/// Token estimate of the literal rendering of every non-empty cell.
pub fn original_token_count(workbook: &WorkbookContext) -> usize {
    estimate_tokens(&vanilla::serialize(&workbook.sheets, &VanillaOptions::default()).text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spreadsheet::CellAddress;
    use crate::spreadsheet::CellData;
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn workbook() -> WorkbookContext {
        let mut sheet = WorksheetContext::new("Sales");
        for (col, title) in ["Product", "Units", "Price"].iter().enumerate() {
            sheet.push(CellData::new(CellAddress::new(0, col), *title));
        }
        for row in 1..=20 {
            sheet.push(CellData::new(CellAddress::new(row, 0), "Widget"));
            sheet.push(CellData::new(CellAddress::new(row, 1), row as f64));
            sheet.push(CellData::new(CellAddress::new(row, 2), 9.99).with_format("$#,##0.00"));
        }
        WorkbookContext::new(vec![sheet])
    }

    #[test]
    fn pipeline_without_steps_fails_to_build() {
        assert!(matches!(
            CompressionPipeline::builder().build(),
            Err(CompressionError::EmptyPipeline)
        ));
    }

    #[test]
    fn pipeline_runs_steps_in_order() {
        let pipeline = CompressionPipeline::builder()
            .anchors(AnchorOptions::default())
            .skeleton(SkeletonOptions::default())
            .inverted_index(InvertedIndexOptions::default())
            .build()
            .unwrap();
        assert_eq!(pipeline.step_names(), vec![ANCHOR_DETECTION, SKELETON_EXTRACTION, INVERTED_INDEX]);

        let result = pipeline.run(&workbook()).unwrap();
        let steps: Vec<_> = result.step_timings.iter().map(|timing| timing.step.as_str()).collect();
        assert_eq!(steps, vec![ANCHOR_DETECTION, SKELETON_EXTRACTION, INVERTED_INDEX]);
        assert!(result.compressed_text.starts_with(r#"{"Sales":{"Product":"A1""#));
        assert!(result.artifacts.contains_key(ANCHOR_DETECTION));
        assert!(result.artifacts.contains_key(SKELETON_EXTRACTION));
        assert!(result.artifacts[INVERTED_INDEX]["Sales"]["Widget"].is_string());
        assert!(result.compression_ratio() > 1.0);
        assert_eq!(result.strategy, None);
    }

    #[test]
    fn pipeline_aggregation_step_renders_regions() {
        let pipeline = CompressionPipeline::builder()
            .aggregation(AggregationOptions::default())
            .build()
            .unwrap();
        let result = pipeline.run(&workbook()).unwrap();
        assert!(result.compressed_text.contains("B2:B21,#,##0.00"));
        assert!(result.compressed_text.contains("C2:C21,Currency <$#,##0.00>"));
        assert_eq!(result.artifacts[FORMAT_AGGREGATION]["Sales"]["regions"][0]["cells"], 20);
    }

    #[test]
    fn pipeline_falls_back_to_vanilla_text() {
        let pipeline = CompressionPipeline::builder()
            .anchors(AnchorOptions::default())
            .build()
            .unwrap();
        let result = pipeline.run(&workbook()).unwrap();
        assert!(result.compressed_text.starts_with("## Sheet: Sales\nA1,Product|B1,Units|C1,Price"));
        assert_eq!(result.original_token_count, result.compressed_token_count);
    }

    #[test]
    fn pipeline_skeleton_needs_anchors() {
        let pipeline = CompressionPipeline::builder()
            .skeleton(SkeletonOptions::default())
            .build()
            .unwrap();
        let failure = pipeline.run(&workbook()).unwrap_err();
        assert_eq!(failure.step, SKELETON_EXTRACTION);
        assert!(matches!(failure.source, CompressionError::MissingInput { .. }));
    }

    #[test]
    fn pipeline_failure_halts_and_keeps_completed_work() {
        let reached = Arc::new(AtomicBool::new(false));
        let flag = reached.clone();
        let pipeline = CompressionPipeline::builder()
            .anchors(AnchorOptions::default())
            .custom("validate", |context| {
                context.warn("checking".to_owned());
                Err(CompressionError::StepFailed {
                    step: "validate".to_owned(),
                    message: "rejected".to_owned(),
                })
            })
            .custom("never", move |_| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .build()
            .unwrap();

        let failure = pipeline.run(&workbook()).unwrap_err();
        assert_eq!(failure.step, "validate");
        assert_eq!(failure.step_timings.len(), 1);
        assert!(failure.artifacts.contains_key(ANCHOR_DETECTION));
        assert_eq!(failure.warnings, vec!["checking".to_owned()]);
        assert!(!reached.load(Ordering::SeqCst));
        assert!(failure.to_string().contains("rejected"));
    }

    #[test]
    fn pipeline_slots_are_written_once() {
        let pipeline = CompressionPipeline::builder()
            .anchors(AnchorOptions::default())
            .anchors(AnchorOptions::default())
            .build()
            .unwrap();
        let failure = pipeline.run(&workbook()).unwrap_err();
        assert!(matches!(failure.source, CompressionError::SlotOccupied("anchors")));
    }

    #[test]
    fn pipeline_custom_step_reads_context() {
        let pipeline = CompressionPipeline::builder()
            .anchors(AnchorOptions::default())
            .custom("summary", |context| {
                let rows: usize = context.anchors().unwrap_or_default().iter().map(|anchors| anchors.rows.len()).sum();
                context.push_text("summary", format!("anchor rows: {rows}"));
                Ok(())
            })
            .build()
            .unwrap();
        let result = pipeline.run(&workbook()).unwrap();
        assert!(result.compressed_text.starts_with("anchor rows: "));
    }
}
