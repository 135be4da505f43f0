//! The Chain-of-Spreadsheet cascade.
use crate::chain::ports::ActivitySink;
use crate::chain::ports::ChatCompletion;
use crate::chain::ports::CompletionOptions;
use crate::chain::ports::CostLedger;
use crate::chain::ports::DetectedTable;
use crate::chain::ports::QaActivity;
use crate::chain::ports::TableDetection;
use crate::chain::ports::TableDetector;
use crate::chain::Cancellation;
use crate::chain::ChainError;
use crate::compression::estimate_tokens;
use crate::compression::strategy::CompressionOptions;
use crate::compression::strategy::CompressionStrategy;
use crate::compression::strategy::SpreadsheetCompressor;
use crate::spreadsheet::load_workbook;
use crate::spreadsheet::LoadOptions;
use crate::spreadsheet::WorkbookContext;
use crate::spreadsheet::WorkbookLoader;
use log::debug;
use log::info;
use log::warn;
use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Selected-table label when the answer is built from the whole compressed text.
pub const FULL_CONTEXT: &str = "Full spreadsheet context";

const DETECTION_ACTION: &str = "table_detection";
const ANSWER_ACTION: &str = "question_answering";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QaOptions {
    pub temperature: f64,
    pub max_tokens: usize,
    /// Fixed price model applied to every phase
    pub cost_per_thousand_tokens: f64,
    pub compression: CompressionOptions,
}

impl Default for QaOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: 1000,
            cost_per_thousand_tokens: 0.002,
            compression: CompressionOptions {
                strategy: CompressionStrategy::Balanced,
                target_token_limit: None,
                preserve_formulas: false,
                preserve_formatting: true,
            },
        }
    }
}

impl QaOptions {
    pub fn cost_of(&self, tokens: usize) -> f64 {
        tokens as f64 / 1000.0 * self.cost_per_thousand_tokens
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QaRequest {
    pub question: String,
    /// Identifier of the source file, passed through to the activity sink
    pub file_id: Option<String>,
    /// Builds a [`ReasoningTrace`] for the response
    pub include_trace: bool,
}

impl QaRequest {
    pub fn new(question: &str) -> Self {
        Self {
            question: question.to_owned(),
            ..Default::default()
        }
    }

    pub fn with_file_id(mut self, file_id: &str) -> Self {
        self.file_id = Some(file_id.to_owned());
        self
    }

    pub fn with_trace(mut self) -> Self {
        self.include_trace = true;
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PhaseTrace {
    pub duration: Duration,
    pub tokens: usize,
    pub cost: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ReasoningTrace {
    pub detection: PhaseTrace,
    pub answering: PhaseTrace,
    pub tables: Vec<DetectedTable>,
    pub selected_table: String,
    pub context_lines: usize,
    pub total_tokens: usize,
    pub total_cost: f64,
    pub total_duration: Duration,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct QaResponse {
    pub success: bool,
    pub cancelled: bool,
    pub answer: String,
    pub error: Option<String>,
    pub selected_table: Option<String>,
    pub tables_detected: usize,
    pub compression_ratio: f64,
    pub total_tokens: usize,
    pub total_cost: f64,
    pub duration: Duration,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<ReasoningTrace>,
}

impl QaResponse {
    fn failure(error: &ChainError, duration: Duration) -> Self {
        Self {
            cancelled: matches!(error, ChainError::Cancelled),
            error: Some(error.to_string()),
            duration,
            ..Default::default()
        }
    }
}

/// What the cascade produced before side effects are issued.
struct Outcome {
    detection: TableDetection,
    detection_duration: Duration,
    selected_table: String,
    context_lines: usize,
    prompt_tokens: usize,
    answer: String,
    answer_duration: Duration,
    compression_ratio: f64,
    warnings: Vec<String>,
}

/// Table context of the chosen table, or `None` when it cannot be used.
fn extract_table(workbook: &WorkbookContext, table: &DetectedTable, warnings: &mut Vec<String>) -> Option<(String, Vec<String>)> {
    let Some(sheet) = workbook.sheet(&table.sheet_name) else {
        warnings.push(format!(
            "Selected table refers to sheet '{}' which is not in the workbook; using the full spreadsheet context",
            table.sheet_name
        ));
        return None;
    };
    let Some(range) = table.range() else {
        warnings.push(format!(
            "Selected table on sheet '{}' has invalid bounds; using the full spreadsheet context",
            table.sheet_name
        ));
        return None;
    };
    let lines: Vec<String> = sheet
        .non_empty_cells_in(range)
        .map(|cell| format!("{}: {}", cell.reference(), cell.rendered()))
        .collect();
    if lines.is_empty() {
        warnings.push(format!(
            "Selected table {}!{} holds no cells; using the full spreadsheet context",
            sheet.name, range
        ));
        return None;
    }
    Some((format!("{}!{}", sheet.name, range), lines))
}

/// Highest confidence first; the earliest table wins ties.
pub fn select_table(tables: &[DetectedTable]) -> Option<&DetectedTable> {
    tables
        .iter()
        .filter(|table| !table.confidence_score.is_nan())
        .fold(None, |best: Option<&DetectedTable>, table| match best {
            Some(best) if best.confidence_score >= table.confidence_score => Some(best),
            _ => Some(table),
        })
}

pub fn build_prompt(question: &str, context: &str) -> String {
    format!(
        "Answer the question using only the spreadsheet data below. \
         Cite cell addresses where helpful and say so if the data is insufficient.\n\n\
         Spreadsheet data:\n{context}\n\nQuestion: {question}\nAnswer:"
    )
}

/// Answers questions over a workbook by localizing a table first.
#[derive(Clone)]
pub struct ChainOfSpreadsheet {
    detector: Arc<dyn TableDetector>,
    chat: Arc<dyn ChatCompletion>,
    cost_ledger: Option<Arc<dyn CostLedger>>,
    activity_sink: Option<Arc<dyn ActivitySink>>,
    options: QaOptions,
}

impl ChainOfSpreadsheet {
    pub fn new(detector: Arc<dyn TableDetector>, chat: Arc<dyn ChatCompletion>) -> Self {
        Self {
            detector,
            chat,
            cost_ledger: None,
            activity_sink: None,
            options: QaOptions::default(),
        }
    }

    pub fn with_options(mut self, options: QaOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_cost_ledger(mut self, cost_ledger: Arc<dyn CostLedger>) -> Self {
        self.cost_ledger = Some(cost_ledger);
        self
    }

    pub fn with_activity_sink(mut self, activity_sink: Arc<dyn ActivitySink>) -> Self {
        self.activity_sink = Some(activity_sink);
        self
    }

    pub fn options(&self) -> &QaOptions {
        &self.options
    }

    async fn run(&self, workbook: &WorkbookContext, request: &QaRequest, cancel: &Cancellation) -> Result<Outcome, ChainError> {
        if cancel.is_cancelled() {
            return Err(ChainError::Cancelled);
        }
        let compressor = SpreadsheetCompressor::new(self.options.compression.clone());
        let compressed = compressor.compress(workbook)?;
        let mut warnings = compressed.warnings.clone();
        debug!(
            "Compressed workbook to {} tokens (ratio {:.2})",
            compressed.compressed_token_count,
            compressed.compression_ratio()
        );

        let started = Instant::now();
        let detection = cancel
            .run(self.detector.detect(&compressed.compressed_text, Some(request.question.as_str())))
            .await
            .ok_or(ChainError::Cancelled)?
            .map_err(ChainError::Detection)?;
        let detection_duration = started.elapsed();
        debug!(
            "Detected {} tables with {} tokens in {:?}",
            detection.tables.len(),
            detection.tokens_used,
            detection_duration
        );

        let extracted = match select_table(&detection.tables) {
            Some(table) => extract_table(workbook, table, &mut warnings),
            None => {
                warnings.push("No table detected; using the full spreadsheet context".to_owned());
                None
            }
        };
        let (selected_table, context) = match extracted {
            Some((label, lines)) => (label, lines),
            None => (FULL_CONTEXT.to_owned(), vec![compressed.compressed_text.to_owned()]),
        };
        let context_lines = if selected_table == FULL_CONTEXT { 0 } else { context.len() };
        let prompt = build_prompt(&request.question, &context.join("\n"));

        if cancel.is_cancelled() {
            return Err(ChainError::Cancelled);
        }
        let started = Instant::now();
        let options = CompletionOptions {
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
        };
        let answer = cancel
            .run(self.chat.complete(&prompt, &options))
            .await
            .ok_or(ChainError::Cancelled)?
            .map_err(ChainError::Completion)?;
        let answer_duration = started.elapsed();

        for warning in &warnings {
            warn!("{}", warning);
        }
        Ok(Outcome {
            detection,
            detection_duration,
            selected_table,
            context_lines,
            prompt_tokens: estimate_tokens(&prompt),
            answer,
            answer_duration,
            compression_ratio: compressed.compression_ratio(),
            warnings,
        })
    }

    /// Runs the cascade. Never fails: collaborator errors and cancellation come
    /// back as a response with `success == false`.
    pub async fn answer(&self, workbook: &WorkbookContext, request: &QaRequest, cancel: &Cancellation) -> QaResponse {
        let started = Instant::now();
        let outcome = match self.run(workbook, request, cancel).await {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!("Question answering failed: {}", error);
                return QaResponse::failure(&error, started.elapsed());
            }
        };

        let detection = PhaseTrace {
            duration: outcome.detection_duration,
            tokens: outcome.detection.tokens_used,
            cost: self.options.cost_of(outcome.detection.tokens_used),
        };
        let answer_tokens = outcome.prompt_tokens + estimate_tokens(&outcome.answer);
        let answering = PhaseTrace {
            duration: outcome.answer_duration,
            tokens: answer_tokens,
            cost: self.options.cost_of(answer_tokens),
        };
        let total_tokens = detection.tokens + answering.tokens;
        let total_cost = detection.cost + answering.cost;
        let duration = started.elapsed();

        if let Some(ledger) = &self.cost_ledger {
            ledger.record(
                DETECTION_ACTION,
                detection.cost,
                &serde_json::json!({
                    "tables": outcome.detection.tables.len(),
                    "tokens": detection.tokens,
                    "reported_cost": outcome.detection.estimated_cost,
                }),
            );
            ledger.record(
                ANSWER_ACTION,
                answering.cost,
                &serde_json::json!({
                    "selected_table": outcome.selected_table,
                    "tokens": answering.tokens,
                }),
            );
        }
        if let Some(sink) = &self.activity_sink {
            sink.notify(&QaActivity {
                question: request.question.to_owned(),
                file_id: request.file_id.to_owned(),
                tables_detected: outcome.detection.tables.len(),
                selected_table: outcome.selected_table.to_owned(),
                answer: outcome.answer.to_owned(),
                duration,
                total_cost,
            });
        }
        info!(
            "Answered from '{}' with {} tokens in {:?}",
            outcome.selected_table, total_tokens, duration
        );

        let trace = request.include_trace.then(|| ReasoningTrace {
            detection,
            answering,
            tables: outcome.detection.tables.clone(),
            selected_table: outcome.selected_table.to_owned(),
            context_lines: outcome.context_lines,
            total_tokens,
            total_cost,
            total_duration: duration,
        });
        QaResponse {
            success: true,
            cancelled: false,
            answer: outcome.answer,
            error: None,
            selected_table: Some(outcome.selected_table),
            tables_detected: outcome.detection.tables.len(),
            compression_ratio: outcome.compression_ratio,
            total_tokens,
            total_cost,
            duration,
            warnings: outcome.warnings,
            trace,
        }
    }

    /// Loads the workbook through `loader`, then answers; a load failure is
    /// reported like any collaborator failure.
    pub async fn answer_file(
        &self,
        loader: &dyn WorkbookLoader,
        path: &Path,
        load_options: &LoadOptions,
        request: &QaRequest,
        cancel: &Cancellation,
    ) -> QaResponse {
        let started = Instant::now();
        match load_workbook(loader, path, load_options) {
            Ok(workbook) => self.answer(&workbook, request, cancel).await,
            Err(error) => {
                let error = ChainError::from(error);
                warn!("Question answering failed: {}", error);
                QaResponse::failure(&error, started.elapsed())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spreadsheet::CellAddress;
    use crate::spreadsheet::CellData;
    use crate::spreadsheet::WorksheetContext;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn sales() -> WorkbookContext {
        let mut sheet = WorksheetContext::new("Sales");
        for (col, title) in ["Region", "Q1", "Q2"].iter().enumerate() {
            sheet.push(CellData::new(CellAddress::new(0, col), *title));
        }
        for (row, region) in ["North", "South", "East"].iter().enumerate() {
            sheet.push(CellData::new(CellAddress::new(row + 1, 0), *region));
            sheet.push(CellData::new(CellAddress::new(row + 1, 1), (row as f64 + 1.0) * 100.0));
            sheet.push(CellData::new(CellAddress::new(row + 1, 2), (row as f64 + 1.0) * 150.0));
        }
        sheet.push(CellData::new(CellAddress::new(9, 5), "Prepared by finance"));
        WorkbookContext::new(vec![sheet])
    }

    fn table(sheet: &str, bounds: (usize, usize, usize, usize), confidence: f64) -> DetectedTable {
        DetectedTable {
            sheet_name: sheet.to_owned(),
            top_row: bounds.0,
            left_column: bounds.1,
            bottom_row: bounds.2,
            right_column: bounds.3,
            confidence_score: confidence,
            table_type: None,
            description: None,
        }
    }

    struct FixedDetector {
        tables: Vec<DetectedTable>,
        hints: Mutex<Vec<Option<String>>>,
    }

    impl FixedDetector {
        fn new(tables: Vec<DetectedTable>) -> Arc<Self> {
            Arc::new(Self {
                tables,
                hints: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TableDetector for FixedDetector {
        async fn detect(&self, _: &str, hint: Option<&str>) -> anyhow::Result<TableDetection> {
            self.hints.lock().unwrap().push(hint.map(str::to_owned));
            Ok(TableDetection {
                tables: self.tables.clone(),
                tokens_used: 400,
                estimated_cost: 0.0008,
                raw_response_text: String::new(),
            })
        }
    }

    struct FailingDetector;

    #[async_trait]
    impl TableDetector for FailingDetector {
        async fn detect(&self, _: &str, _: Option<&str>) -> anyhow::Result<TableDetection> {
            anyhow::bail!("connection reset")
        }
    }

    struct StalledDetector;

    #[async_trait]
    impl TableDetector for StalledDetector {
        async fn detect(&self, _: &str, _: Option<&str>) -> anyhow::Result<TableDetection> {
            std::future::pending().await
        }
    }

    #[derive(Default)]
    struct EchoChat {
        prompts: Mutex<Vec<(String, CompletionOptions)>>,
    }

    #[async_trait]
    impl ChatCompletion for EchoChat {
        async fn complete(&self, prompt: &str, options: &CompletionOptions) -> anyhow::Result<String> {
            self.prompts.lock().unwrap().push((prompt.to_owned(), options.clone()));
            Ok("South had 200 in Q1.".to_owned())
        }
    }

    #[derive(Default)]
    struct Recorder {
        costs: Mutex<Vec<(String, f64)>>,
        activities: Mutex<Vec<QaActivity>>,
    }

    impl CostLedger for Recorder {
        fn record(&self, action_name: &str, cost_estimate: f64, _: &serde_json::Value) {
            self.costs.lock().unwrap().push((action_name.to_owned(), cost_estimate));
        }
    }

    impl ActivitySink for Recorder {
        fn notify(&self, activity: &QaActivity) {
            self.activities.lock().unwrap().push(activity.clone());
        }
    }

    fn chain(detector: Arc<dyn TableDetector>, chat: Arc<EchoChat>, recorder: Arc<Recorder>) -> ChainOfSpreadsheet {
        ChainOfSpreadsheet::new(detector, chat)
            .with_cost_ledger(recorder.clone())
            .with_activity_sink(recorder)
    }

    #[test]
    fn select_highest_confidence_first_on_ties() {
        let tables = vec![
            table("A", (1, 1, 2, 2), 0.4),
            table("B", (1, 1, 2, 2), 0.9),
            table("C", (1, 1, 2, 2), 0.9),
            table("D", (1, 1, 2, 2), f64::NAN),
        ];
        assert_eq!(select_table(&tables).unwrap().sheet_name, "B");
        assert!(select_table(&[]).is_none());
    }

    #[tokio::test]
    async fn qa_answers_from_selected_table() {
        let detector = FixedDetector::new(vec![table("Sales", (1, 1, 4, 2), 0.6), table("Sales", (1, 1, 4, 3), 0.95)]);
        let chat = Arc::new(EchoChat::default());
        let recorder = Arc::new(Recorder::default());
        let qa = chain(detector.clone(), chat.clone(), recorder.clone());

        let request = QaRequest::new("What were South's Q1 sales?").with_file_id("sales.xlsx");
        let response = qa.answer(&sales(), &request, &Cancellation::new()).await;

        assert!(response.success);
        assert_eq!(response.answer, "South had 200 in Q1.");
        assert_eq!(response.selected_table.as_deref(), Some("Sales!A1:C4"));
        assert_eq!(response.tables_detected, 2);
        assert!(response.trace.is_none());
        assert!(response.total_tokens > 400);

        let prompts = chat.prompts.lock().unwrap();
        let (prompt, options) = &prompts[0];
        assert!(prompt.contains("B3: 200\n"));
        assert!(!prompt.contains("Prepared by finance"));
        assert!(prompt.contains("Question: What were South's Q1 sales?"));
        assert_eq!(options.temperature, 0.1);
        assert_eq!(options.max_tokens, 1000);
        assert_eq!(
            detector.hints.lock().unwrap()[0].as_deref(),
            Some("What were South's Q1 sales?")
        );

        let costs = recorder.costs.lock().unwrap();
        assert_eq!(costs.len(), 2);
        assert_eq!(costs[0].0, DETECTION_ACTION);
        assert!((costs[0].1 - 0.0008).abs() < 1e-12);
        let activities = recorder.activities.lock().unwrap();
        assert_eq!(activities.len(), 1);
        assert_eq!(activities[0].file_id.as_deref(), Some("sales.xlsx"));
        assert_eq!(activities[0].selected_table, "Sales!A1:C4");
    }

    #[tokio::test]
    async fn qa_falls_back_to_full_context_without_tables() {
        let chat = Arc::new(EchoChat::default());
        let qa = chain(FixedDetector::new(Vec::new()), chat.clone(), Arc::new(Recorder::default()));

        let response = qa
            .answer(&sales(), &QaRequest::new("Who prepared this?").with_trace(), &Cancellation::new())
            .await;

        assert!(response.success);
        assert_eq!(response.selected_table.as_deref(), Some(FULL_CONTEXT));
        assert!(response.warnings.iter().any(|warning| warning.contains("No table detected")));
        assert!(chat.prompts.lock().unwrap()[0].0.contains("## Sheet: Sales"));

        let trace = response.trace.unwrap();
        assert_eq!(trace.selected_table, FULL_CONTEXT);
        assert_eq!(trace.detection.tokens, 400);
        assert_eq!(trace.total_tokens, trace.detection.tokens + trace.answering.tokens);
        assert!((trace.total_cost - (trace.detection.cost + trace.answering.cost)).abs() < 1e-12);
        assert!(trace.tables.is_empty());
    }

    #[tokio::test]
    async fn qa_falls_back_when_sheet_is_missing_or_empty() {
        for detected in [table("Archive", (1, 1, 4, 3), 0.9), table("Sales", (20, 1, 30, 3), 0.9)] {
            let chat = Arc::new(EchoChat::default());
            let qa = chain(FixedDetector::new(vec![detected]), chat, Arc::new(Recorder::default()));
            let response = qa.answer(&sales(), &QaRequest::new("Totals?"), &Cancellation::new()).await;
            assert!(response.success);
            assert_eq!(response.selected_table.as_deref(), Some(FULL_CONTEXT));
            let fallbacks = response
                .warnings
                .iter()
                .filter(|warning| warning.ends_with("using the full spreadsheet context"))
                .count();
            assert_eq!(fallbacks, 1);
        }
    }

    #[tokio::test]
    async fn qa_reports_collaborator_failure() {
        let recorder = Arc::new(Recorder::default());
        let qa = chain(Arc::new(FailingDetector), Arc::new(EchoChat::default()), recorder.clone());

        let response = qa.answer(&sales(), &QaRequest::new("Q1 total?"), &Cancellation::new()).await;

        assert!(!response.success);
        assert!(!response.cancelled);
        assert!(response.error.unwrap().contains("connection reset"));
        assert!(recorder.costs.lock().unwrap().is_empty());
        assert!(recorder.activities.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn qa_cancellation_skips_side_effects() {
        let recorder = Arc::new(Recorder::default());
        let chat = Arc::new(EchoChat::default());
        let qa = chain(Arc::new(StalledDetector), chat.clone(), recorder.clone());

        let cancel = Cancellation::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });
        let response = qa.answer(&sales(), &QaRequest::new("Q1 total?"), &cancel).await;

        assert!(!response.success);
        assert!(response.cancelled);
        assert!(chat.prompts.lock().unwrap().is_empty());
        assert!(recorder.costs.lock().unwrap().is_empty());
        assert!(recorder.activities.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn qa_file_load_failure_is_structured() {
        struct MissingLoader;

        impl WorkbookLoader for MissingLoader {
            fn load(&self, _: &Path, _: &LoadOptions) -> anyhow::Result<WorkbookContext> {
                anyhow::bail!("file not found")
            }
        }

        let qa = chain(FixedDetector::new(Vec::new()), Arc::new(EchoChat::default()), Arc::new(Recorder::default()));
        let response = qa
            .answer_file(
                &MissingLoader,
                Path::new("missing.xlsx"),
                &LoadOptions::default(),
                &QaRequest::new("Anything?"),
                &Cancellation::new(),
            )
            .await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("missing.xlsx"));
    }
}
