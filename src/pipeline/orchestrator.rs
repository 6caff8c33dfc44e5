//! Tender document analysis orchestrator.
//!
//! Single entry point that drives one document through the pipeline:
//! classify → extract (local, or custom model → layout) → semantic pass →
//! merge → critical-field validation and backfill → confidence → report.
//!
//! Every collaborator is a trait object, so the orchestrator runs unchanged
//! against the mocks in `providers::mock`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use super::analysis::MergedAnalysis;
use super::breaker::BreakerDecision;
use super::cleaner::clean_ocr_text;
use super::context::{BreakerStatus, PipelineContext};
use super::critical::{backfill_missing, truncate_head_tail, validate};
use super::diagnostic::DiagnosticDump;
use super::document::DocumentRef;
use super::merge::{merge, prepare, DroppedField};
use super::monitor::{ApiCallKind, RunMonitor};
use super::output::{
    AnalysisOutput, AnalysisSuccess, Completeness, CriticalFieldsReport, ExtractionSummary,
    FileInfo, Meta, Quality,
};
use super::providers::{
    Attempted, CustomModelAdapter, CustomModelService, DocumentAiClient, HealthService, HealthStatus,
    LayoutAdapter, LayoutService, LocalExtractor, MessagesClient, PlainTextExtractor,
    ProviderError, ProviderName, ProviderResult, SemanticAnalysisAdapter, SemanticOutcome,
    SemanticProvider,
};
use super::state::{
    resolve_final_action, transition, FinalAction, OcrState, ProviderFilter, ProviderUsed,
    TransitionInput,
};
use super::storage::{AnalysisStore, GuardedStore};
use super::PipelineError;
use crate::config::{BACKFILL_CONTEXT_LIMIT, MAX_HEURISTIC_CONFIDENCE, MIN_LOCAL_TEXT_CHARS};

pub const PIPELINE_VERSION: &str = "2.0.0";

// ═══════════════════════════════════════════════════════════════════════════
// Options and progress
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub stage: &'static str,
    pub message: String,
    pub percent: u8,
}

pub type ProgressCallback = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

#[derive(Clone, Default)]
pub struct AnalyzeOptions {
    /// Advisory; a panicking callback is logged and ignored.
    pub on_progress: Option<ProgressCallback>,
    pub provider: ProviderFilter,
    /// Document-type hint scoping the critical-field check.
    pub doc_type: Option<String>,
}

impl AnalyzeOptions {
    pub fn with_provider(mut self, provider: ProviderFilter) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_doc_type(mut self, doc_type: &str) -> Self {
        self.doc_type = Some(doc_type.to_string());
        self
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }
}

struct Progress(Option<ProgressCallback>);

impl Progress {
    fn emit(&self, stage: &'static str, message: &str, percent: u8) {
        let Some(callback) = &self.0 else {
            return;
        };
        let event = ProgressEvent {
            stage,
            message: message.to_string(),
            percent,
        };
        if catch_unwind(AssertUnwindSafe(|| callback(&event))).is_err() {
            tracing::warn!(stage, "Progress callback panicked, ignoring");
        }
    }
}

/// Mutable per-run state threaded through the stages.
struct Run {
    monitor: RunMonitor,
    progress: Progress,
    dump: Option<DiagnosticDump>,
}

/// What the extraction stages produced for merging.
struct Extraction {
    provider_result: Option<ProviderResult>,
    source: Option<ProviderName>,
    semantic: Option<SemanticOutcome>,
    provider_used: ProviderUsed,
    /// Text backfill prompts read from. Empty when only the raw file was read.
    context_text: String,
    dropped: Vec<DroppedField>,
}

/// Configuration flags, collaborator health and breaker states.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineHealth {
    pub healthy: bool,
    pub layout_configured: bool,
    pub custom_model_enabled: bool,
    pub semantic_configured: bool,
    pub document_service: Option<HealthStatus>,
    pub document_service_error: Option<String>,
    pub breakers: BreakerStatus,
}

// ═══════════════════════════════════════════════════════════════════════════
// Orchestrator
// ═══════════════════════════════════════════════════════════════════════════

pub struct PipelineOrchestrator {
    context: PipelineContext,
    local: Box<dyn LocalExtractor + Send + Sync>,
    custom: Option<CustomModelAdapter>,
    layout: Option<LayoutAdapter>,
    semantic: Arc<dyn SemanticProvider + Send + Sync>,
    health: Option<Box<dyn HealthService + Send + Sync>>,
    store: Option<Box<dyn AnalysisStore + Send + Sync>>,
}

impl PipelineOrchestrator {
    pub fn new(
        context: PipelineContext,
        local: Box<dyn LocalExtractor + Send + Sync>,
        semantic: Arc<dyn SemanticProvider + Send + Sync>,
    ) -> Self {
        Self {
            context,
            local,
            custom: None,
            layout: None,
            semantic,
            health: None,
            store: None,
        }
    }

    /// Real HTTP clients for everything the configuration enables.
    pub fn from_context(context: PipelineContext) -> Result<Self, PipelineError> {
        let config = context.config.clone();
        let semantic = Arc::new(MessagesClient::from_config(&config)?);
        let mut orchestrator =
            Self::new(context, Box::new(PlainTextExtractor::new()), semantic);

        if config.is_layout_configured() {
            orchestrator = orchestrator
                .with_layout(Box::new(DocumentAiClient::from_config(&config)?))
                .with_health(Box::new(DocumentAiClient::from_config(&config)?));
        }
        if config.is_custom_model_enabled() {
            orchestrator =
                orchestrator.with_custom_model(Box::new(DocumentAiClient::from_config(&config)?));
        }
        Ok(orchestrator)
    }

    pub fn with_custom_model(mut self, service: Box<dyn CustomModelService + Send + Sync>) -> Self {
        self.custom = Some(
            CustomModelAdapter::new(service, &self.context.config.custom_model_id)
                .with_retry_delay(self.context.config.retry_delay),
        );
        self
    }

    pub fn with_layout(mut self, service: Box<dyn LayoutService + Send + Sync>) -> Self {
        self.layout =
            Some(LayoutAdapter::new(service).with_retry_delay(self.context.config.retry_delay));
        self
    }

    pub fn with_health(mut self, service: Box<dyn HealthService + Send + Sync>) -> Self {
        self.health = Some(service);
        self
    }

    /// Persist every output through the store breaker.
    pub fn with_store<S: AnalysisStore + Send + Sync + 'static>(mut self, store: S) -> Self {
        self.store = Some(Box::new(GuardedStore::new(
            store,
            self.context.store.clone(),
        )));
        self
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    /// Analyze one document. Never fails: errors come back as
    /// [`AnalysisOutput::Failure`].
    pub fn analyze_document(&self, path: &Path, options: AnalyzeOptions) -> AnalysisOutput {
        let run_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("analyze_document", run_id = %run_id, file = %path.display());
        let _guard = span.enter();

        let mut run = Run {
            monitor: RunMonitor::new(run_id.clone()),
            progress: Progress(options.on_progress.clone()),
            dump: DiagnosticDump::for_run(&run_id),
        };

        tracing::info!(provider = %options.provider, doc_type = ?options.doc_type, "Analysis started");

        let output = match self.run_pipeline(path, &options, &mut run) {
            Ok(success) => AnalysisOutput::Success(Box::new(success)),
            Err(e) => {
                tracing::error!(error = %e, "Analysis failed");
                AnalysisOutput::failure(&run_id, e.to_string())
            }
        };

        if let Some(dump) = &run.dump {
            dump.write_json("output.json", &output);
        }
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&output) {
                tracing::warn!(error = %e, "Analysis result not saved");
            }
        }
        output
    }

    fn run_pipeline(
        &self,
        path: &Path,
        options: &AnalyzeOptions,
        run: &mut Run,
    ) -> Result<AnalysisSuccess, PipelineError> {
        let started = Instant::now();

        // Step 1: input validation and classification
        run.progress.emit("validate", "Checking document", 5);
        run.monitor
            .start_stage("input", json!({ "path": path.display().to_string() }));
        let document = DocumentRef::open(path)?;
        run.monitor.end_stage(Some(json!({
            "extension": document.extension,
            "ocr_required": document.ocr_required,
            "size_kb": document.size_kb(),
        })));

        // Step 2: extraction + semantic pass
        let extraction = if document.ocr_required {
            self.run_ocr_branch(&document, options.provider, run)?
        } else {
            self.run_local_branch(&document, run)?
        };

        // Step 3: merge
        run.progress.emit("merge", "Merging results", 85);
        run.monitor.start_stage("merge", json!({}));
        let mut analysis = merge(
            extraction.provider_result.as_ref(),
            extraction.semantic.as_ref().map(|s| &s.fields),
        );
        run.monitor.end_stage(Some(json!({
            "populated_fields": analysis.populated_field_count(),
        })));
        if let Some(dump) = &run.dump {
            dump.write_json("merged.json", &analysis);
        }

        // Step 4: critical fields
        let critical_fields = self.check_critical_fields(
            &mut analysis,
            options.doc_type.as_deref(),
            &extraction.context_text,
            run,
        );

        // Step 5: confidence heuristic
        run.monitor.start_stage("confidence_analysis", json!({}));
        let field_count = analysis.populated_field_count();
        let overall_confidence = heuristic_confidence(field_count);
        run.monitor
            .end_stage(Some(json!({ "overall_confidence": overall_confidence })));

        // Step 6: report
        let performance = run.monitor.report();
        let duration_ms = started.elapsed().as_millis() as u64;
        let provider_used = extraction.provider_used;

        tracing::info!(
            provider = %provider_used,
            duration_ms,
            field_count,
            critical_completeness = critical_fields.latest().completeness,
            overall_confidence,
            "Analysis finished"
        );
        run.progress.emit("complete", "Analysis complete", 100);

        let extraction_summary = ExtractionSummary {
            provider: extraction.source,
            text_chars: extraction.context_text.chars().count(),
            table_count: extraction
                .provider_result
                .as_ref()
                .map_or(0, |r| r.tables.len()),
            paragraph_count: extraction
                .provider_result
                .as_ref()
                .map_or(0, |r| r.paragraphs.len()),
            dropped_fields: extraction.dropped,
            semantic_degraded: extraction.semantic.as_ref().is_some_and(|s| s.degraded),
        };

        Ok(AnalysisSuccess {
            success: true,
            extraction: extraction_summary,
            quality: Quality {
                field_count,
                overall_confidence,
                provider_confidence: extraction
                    .provider_result
                    .as_ref()
                    .and_then(|r| r.confidence),
                provider: provider_used,
            },
            meta: Meta {
                run_id: run.monitor.run_id().to_string(),
                pipeline_version: PIPELINE_VERSION,
                provider_used,
                duration_ms,
                file_info: FileInfo {
                    name: document.display_name.clone(),
                    size_kb: document.size_kb(),
                    extension: document.extension.clone(),
                },
                completeness: Completeness {
                    overall: analysis.weighted_completeness(),
                    critical_fields: critical_fields.latest().completeness,
                },
                performance,
            },
            critical_fields,
            analysis,
        })
    }

    // ───────────────────────────────────────────────────────────────────────
    // Non-OCR branch
    // ───────────────────────────────────────────────────────────────────────

    /// Local extraction then a mandatory semantic pass. Too little text, or an
    /// unreadable format, falls through to the full-document pass.
    fn run_local_branch(
        &self,
        document: &DocumentRef,
        run: &mut Run,
    ) -> Result<Extraction, PipelineError> {
        run.progress.emit("extract", "Reading document text", 15);
        run.monitor
            .start_stage("local_extraction", json!({ "extension": document.extension }));

        let text = match self.local.extract(&document.path) {
            Ok(extracted) => {
                let cleaned = clean_ocr_text(&extracted.text);
                let chars = cleaned.chars().count();
                run.monitor
                    .end_stage(Some(json!({ "success": true, "chars": chars, "kind": extracted.kind })));
                if chars >= MIN_LOCAL_TEXT_CHARS {
                    Some(cleaned)
                } else {
                    tracing::warn!(chars, min = MIN_LOCAL_TEXT_CHARS, "Local extraction too short, using full-document pass");
                    None
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Local extraction failed, using full-document pass");
                run.monitor.record_error("local_extraction", &e);
                run.monitor
                    .end_stage(Some(json!({ "success": false, "error": e.to_string() })));
                None
            }
        };

        let Some(text) = text else {
            return self.run_full_document(document, run);
        };

        run.progress.emit("semantic", "Semantic analysis", 50);
        run.monitor.start_stage("semantic_analysis", json!({ "mode": "cold" }));
        let outcome = self
            .semantic_call(run, |adapter| adapter.cold(&text))?;

        Ok(Extraction {
            provider_result: None,
            source: Some(ProviderName::Local),
            semantic: Some(outcome),
            provider_used: ProviderUsed::LocalSemantic,
            context_text: text,
            dropped: Vec::new(),
        })
    }

    /// Semantic provider reads the raw file itself.
    fn run_full_document(
        &self,
        document: &DocumentRef,
        run: &mut Run,
    ) -> Result<Extraction, PipelineError> {
        run.progress
            .emit("fallback", "Semantic provider reading the document", 60);
        run.monitor.start_stage(
            "semantic_fallback",
            json!({ "media_type": document.media_type(), "size_kb": document.size_kb() }),
        );

        let bytes = document.read_bytes()?;
        let outcome = self
            .semantic_call(run, |adapter| adapter.full_document(document, &bytes))?;

        Ok(Extraction {
            provider_result: None,
            source: None,
            semantic: Some(outcome),
            provider_used: ProviderUsed::SemanticFallback,
            context_text: String::new(),
            dropped: Vec::new(),
        })
    }

    // ───────────────────────────────────────────────────────────────────────
    // OCR branch
    // ───────────────────────────────────────────────────────────────────────

    fn run_ocr_branch(
        &self,
        document: &DocumentRef,
        filter: ProviderFilter,
        run: &mut Run,
    ) -> Result<Extraction, PipelineError> {
        let config = &self.context.config;
        let mut input = TransitionInput {
            custom_allowed: filter.allows_custom()
                && config.is_custom_model_enabled()
                && self.custom.is_some(),
            layout_allowed: filter.allows_layout()
                && config.is_layout_configured()
                && self.layout.is_some(),
            succeeded: false,
        };

        let bytes = document.read_bytes()?;
        let mut succeeded: Option<ProviderResult> = None;
        let mut state = OcrState::Start;

        while state != OcrState::EnhanceOrFallback {
            state = transition(state, &input);
            let attempt = match state {
                OcrState::TryCustom => {
                    run.progress.emit("custom_model", "Custom model extraction", 20);
                    self.try_custom(&bytes, run)
                }
                OcrState::TryLayout => {
                    run.progress.emit("layout", "Layout extraction", 35);
                    self.try_layout(&bytes, run)
                }
                _ => None,
            };
            if let Some(result) = attempt {
                input.succeeded = true;
                succeeded = Some(result);
            }
        }

        let action = resolve_final_action(input.succeeded, filter);
        tracing::debug!(?state, ?action, "OCR branch resolved");

        let extraction = match (action, succeeded) {
            (FinalAction::Enhance, Some(result)) => self.enhance(result, run),
            (FinalAction::Cold, _) => self.run_full_document(document, run),
            _ => {
                run.monitor.start_stage("semantic_analysis", json!({}));
                run.monitor
                    .end_stage(Some(json!({ "success": false, "reason": "no_provider_available" })));
                Err(PipelineError::NoResult(format!(
                    "no OCR provider succeeded and provider '{filter}' allows no fallback"
                )))
            }
        };

        let state = transition(state, &input);
        tracing::debug!(?state, "OCR branch finished");
        extraction
    }

    fn try_custom(&self, bytes: &[u8], run: &mut Run) -> Option<ProviderResult> {
        let adapter = self.custom.as_ref()?;
        run.monitor
            .start_stage("custom_model", json!({ "model_id": adapter.model_id() }));
        let outcome = self.document_call(run, "custom_model", || adapter.run(bytes));
        if outcome.is_none() {
            tracing::warn!("Custom model unavailable, trying layout");
        }
        outcome
    }

    fn try_layout(&self, bytes: &[u8], run: &mut Run) -> Option<ProviderResult> {
        let adapter = self.layout.as_ref()?;
        run.monitor.start_stage("layout", json!({}));
        self.document_call(run, "layout", || adapter.run(bytes))
    }

    /// Gate, call and account one document-service step, retry included.
    /// Closes the stage.
    fn document_call<F>(&self, run: &mut Run, stage: &str, call: F) -> Option<ProviderResult>
    where
        F: FnOnce() -> Attempted<ProviderResult>,
    {
        let decision = self.context.external.check();
        if !decision.allowed {
            skip_stage(run, stage, decision);
            return None;
        }

        let attempted = call();
        for _ in 0..attempted.calls {
            run.monitor.record_api_call(ApiCallKind::Document, None);
        }
        match attempted.result {
            Ok(result) => {
                run.monitor.end_stage(Some(json!({
                    "success": true,
                    "fields": result.fields.len(),
                    "tables": result.tables.len(),
                })));
                Some(result)
            }
            Err(e) => {
                let fatal = self.context.external.report(&e);
                tracing::warn!(stage, error = %e, fatal, "Document provider failed");
                run.monitor.record_error(stage, &e);
                run.monitor
                    .end_stage(Some(json!({ "success": false, "error": e.to_string() })));
                None
            }
        }
    }

    /// Semantic pass over a successful provider result. Without it the
    /// provider result stands alone.
    fn enhance(&self, result: ProviderResult, run: &mut Run) -> Result<Extraction, PipelineError> {
        run.progress.emit("semantic", "Semantic analysis", 50);
        run.monitor.start_stage(
            "semantic_analysis",
            json!({ "mode": "enhance", "provider": result.provider.as_str() }),
        );

        let prepared = prepare(&result);
        let semantic = match self.semantic_call(run, |adapter| adapter.enhance(&prepared)) {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!(error = %e, provider = result.provider.as_str(), "Semantic enhancement unavailable, keeping provider result");
                None
            }
        };

        let mut context_text = prepared.cleaned_text.clone();
        if !prepared.cleaned_table_text.is_empty() {
            context_text.push_str("\n\n");
            context_text.push_str(&prepared.cleaned_table_text);
        }

        Ok(Extraction {
            provider_used: ProviderUsed::for_provider(result.provider, semantic.is_some()),
            source: Some(result.provider),
            provider_result: Some(result),
            semantic,
            context_text,
            dropped: prepared.dropped,
        })
    }

    /// Gate, call and account one semantic analysis. Closes the stage.
    fn semantic_call<F>(&self, run: &mut Run, call: F) -> Result<SemanticOutcome, PipelineError>
    where
        F: FnOnce(&SemanticAnalysisAdapter) -> Result<SemanticOutcome, ProviderError>,
    {
        let decision = self.context.external.check();
        if !decision.allowed {
            let reason = decision.reason.clone().unwrap_or_default();
            skip_stage(run, "semantic", decision);
            return Err(PipelineError::ExternalGated(reason));
        }

        let adapter = self.semantic_adapter(run);
        match call(&adapter) {
            Ok(outcome) => {
                for i in 0..outcome.calls {
                    run.monitor
                        .record_api_call(ApiCallKind::Semantic, (i == 0).then_some(outcome.usage));
                }
                run.monitor.end_stage(Some(json!({
                    "success": true,
                    "calls": outcome.calls,
                    "degraded": outcome.degraded,
                })));
                Ok(outcome)
            }
            Err(e) => {
                for _ in 0..adapter.requests_sent() {
                    run.monitor.record_api_call(ApiCallKind::Semantic, None);
                }
                run.monitor.record_error("semantic", &e);
                let fatal = self.context.external.report(&e);
                tracing::warn!(error = %e, fatal, "Semantic analysis failed");
                run.monitor
                    .end_stage(Some(json!({ "success": false, "error": e.to_string() })));
                Err(PipelineError::NoResult(format!("semantic analysis failed: {e}")))
            }
        }
    }

    fn semantic_adapter(&self, run: &Run) -> SemanticAnalysisAdapter {
        SemanticAnalysisAdapter::new(
            Box::new(self.semantic.clone()),
            self.context.config.retry_delay,
        )
        .with_dump(run.dump.clone())
    }

    // ───────────────────────────────────────────────────────────────────────
    // Critical fields
    // ───────────────────────────────────────────────────────────────────────

    fn check_critical_fields(
        &self,
        analysis: &mut MergedAnalysis,
        doc_type: Option<&str>,
        context_text: &str,
        run: &mut Run,
    ) -> CriticalFieldsReport {
        run.progress
            .emit("critical_fields", "Checking critical fields", 92);
        run.monitor
            .start_stage("critical_fields", json!({ "doc_type": doc_type }));

        let before = validate(analysis, doc_type);
        if before.valid || before.skipped {
            run.monitor
                .end_stage(Some(json!({ "missing": 0, "skipped": before.skipped })));
            return CriticalFieldsReport::Complete {
                validation: before,
                all_filled: true,
            };
        }

        run.progress.emit(
            "fill_missing",
            &format!("Filling missing fields ({})", before.missing.len()),
            94,
        );

        let source = if context_text.trim().is_empty() {
            serde_json::to_string_pretty(&analysis.to_canonical()).unwrap_or_default()
        } else {
            context_text.to_string()
        };
        let context = truncate_head_tail(&source, BACKFILL_CONTEXT_LIMIT);

        let adapter = self.semantic_adapter(run);
        let backfill = backfill_missing(
            analysis,
            &before.missing,
            &context,
            &adapter,
            &self.context.external,
            &mut run.monitor,
        );

        let after = validate(analysis, doc_type);
        let filled_count = before.missing.len().saturating_sub(after.missing.len());
        run.monitor.end_stage(Some(json!({
            "missing_before": before.missing.len(),
            "missing_after": after.missing.len(),
            "aborted": backfill.aborted,
        })));

        CriticalFieldsReport::Backfilled {
            before,
            after,
            filled_count,
            backfill,
        }
    }

    // ───────────────────────────────────────────────────────────────────────
    // Health
    // ───────────────────────────────────────────────────────────────────────

    /// Configuration, document-service health and breaker states. The health
    /// check is skipped while the external breaker is open.
    pub fn check_pipeline_health(&self) -> PipelineHealth {
        let config = &self.context.config;
        let mut document_service = None;
        let mut document_service_error = None;

        if let Some(health) = &self.health {
            let decision = self.context.external.check();
            if decision.allowed {
                match health.check_health() {
                    Ok(status) => document_service = Some(status),
                    Err(e) => {
                        self.context.external.report(&e);
                        document_service_error = Some(e.to_string());
                    }
                }
            } else {
                document_service_error = decision.reason;
            }
        }

        let breakers = self.context.breaker_status();
        let healthy = config.is_semantic_configured()
            && !breakers.external.tripped
            && document_service_error.is_none()
            && document_service.as_ref().map_or(true, |s| s.healthy);

        PipelineHealth {
            healthy,
            layout_configured: config.is_layout_configured(),
            custom_model_enabled: config.is_custom_model_enabled(),
            semantic_configured: config.is_semantic_configured(),
            document_service,
            document_service_error,
            breakers,
        }
    }
}

fn skip_stage(run: &mut Run, stage: &str, decision: BreakerDecision) {
    let reason = decision.reason.unwrap_or_default();
    tracing::warn!(stage, %reason, "Call skipped: external breaker open");
    run.monitor
        .end_stage(Some(json!({ "skipped": true, "reason": reason })));
}

/// `min(0.95, 0.5 + 0.03 × populated fields)`.
pub fn heuristic_confidence(field_count: usize) -> f64 {
    (0.5 + 0.03 * field_count as f64).min(MAX_HEURISTIC_CONFIDENCE)
}
