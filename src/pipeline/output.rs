//! Result object of one `analyze_document` call.
//!
//! Every run yields one of these; failures are values, never panics or `Err`.

use serde::Serialize;

use super::analysis::MergedAnalysis;
use super::critical::{BackfillReport, CriticalFieldValidation};
use super::merge::DroppedField;
use super::monitor::MonitorReport;
use super::providers::ProviderName;
use super::state::ProviderUsed;

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AnalysisOutput {
    Success(Box<AnalysisSuccess>),
    Failure(AnalysisFailure),
}

impl AnalysisOutput {
    pub fn failure(run_id: &str, error: impl Into<String>) -> Self {
        Self::Failure(AnalysisFailure {
            success: false,
            run_id: run_id.to_string(),
            error: error.into(),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn run_id(&self) -> &str {
        match self {
            Self::Success(s) => &s.meta.run_id,
            Self::Failure(f) => &f.run_id,
        }
    }

    pub fn analysis(&self) -> Option<&MergedAnalysis> {
        match self {
            Self::Success(s) => Some(&s.analysis),
            Self::Failure(_) => None,
        }
    }

    pub fn provider_used(&self) -> Option<ProviderUsed> {
        match self {
            Self::Success(s) => Some(s.meta.provider_used),
            Self::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::Failure(f) => Some(&f.error),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisFailure {
    pub success: bool,
    #[serde(rename = "runId")]
    pub run_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSuccess {
    pub success: bool,
    pub analysis: MergedAnalysis,
    pub extraction: ExtractionSummary,
    pub quality: Quality,
    pub critical_fields: CriticalFieldsReport,
    pub meta: Meta,
}

/// What the extraction stage handed to the semantic pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionSummary {
    /// OCR or local provider whose result was used, if any.
    pub provider: Option<ProviderName>,
    pub text_chars: usize,
    pub table_count: usize,
    pub paragraph_count: usize,
    /// Provider fields withheld from the semantic pass for low confidence.
    pub dropped_fields: Vec<DroppedField>,
    /// The semantic answer could not be parsed even after the retry.
    pub semantic_degraded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Quality {
    pub field_count: usize,
    pub overall_confidence: f64,
    pub provider_confidence: Option<f32>,
    pub provider: ProviderUsed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum CriticalFieldsReport {
    /// Some critical fields were missing: snapshots around the backfill loop.
    Backfilled {
        before: CriticalFieldValidation,
        after: CriticalFieldValidation,
        filled_count: usize,
        backfill: BackfillReport,
    },
    /// Nothing to backfill (all present, or the document type has none).
    Complete {
        validation: CriticalFieldValidation,
        all_filled: bool,
    },
}

impl CriticalFieldsReport {
    /// Snapshot after any backfill.
    pub fn latest(&self) -> &CriticalFieldValidation {
        match self {
            Self::Backfilled { after, .. } => after,
            Self::Complete { validation, .. } => validation,
        }
    }

    pub fn filled_count(&self) -> usize {
        match self {
            Self::Backfilled { filled_count, .. } => *filled_count,
            Self::Complete { .. } => 0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    pub name: String,
    pub size_kb: u64,
    #[serde(rename = "type")]
    pub extension: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Completeness {
    /// Weighted headline-field completeness.
    pub overall: f64,
    /// Share of relevant critical fields present after backfill.
    pub critical_fields: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Meta {
    pub run_id: String,
    pub pipeline_version: &'static str,
    pub provider_used: ProviderUsed,
    pub duration_ms: u64,
    pub file_info: FileInfo,
    pub completeness: Completeness,
    pub performance: MonitorReport,
}
