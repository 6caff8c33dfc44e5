use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which metered service an API call went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiCallKind {
    /// OCR/layout/custom-model service.
    Document,
    /// Language-model completion service.
    Semantic,
}

/// Token usage reported by the semantic provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// A closed pipeline stage. Never mutated after `end_stage`.
#[derive(Debug, Clone, Serialize)]
pub struct StageRecord {
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub metadata: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

#[derive(Debug)]
struct OpenStage {
    name: String,
    started_at: DateTime<Utc>,
    started: Instant,
    metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageError {
    pub stage: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ApiCallCounts {
    pub document: u32,
    pub semantic: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TokenTotals {
    pub input: u64,
    pub output: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunMetrics {
    pub api_calls: ApiCallCounts,
    pub token_usage: TokenTotals,
    pub errors: Vec<StageError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub name: String,
    pub duration_ms: u64,
    /// Share of the total run time, one decimal.
    pub percentage: f64,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct SlowestStage {
    pub name: String,
    pub duration_ms: u64,
}

/// Performance report attached to every successful run.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorReport {
    pub run_id: String,
    pub total_duration_ms: u64,
    pub total_duration_readable: String,
    pub stages: Vec<StageSummary>,
    pub slowest_stage: Option<SlowestStage>,
    pub metrics: RunMetrics,
    pub api_efficiency: String,
    pub generated_at: DateTime<Utc>,
}

/// Per-run stage timer and metrics accumulator.
///
/// Owned by a single run; not shared across threads.
#[derive(Debug)]
pub struct RunMonitor {
    run_id: String,
    started: Instant,
    current: Option<OpenStage>,
    stages: Vec<StageRecord>,
    metrics: RunMetrics,
}

impl RunMonitor {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            started: Instant::now(),
            current: None,
            stages: Vec::new(),
            metrics: RunMetrics::default(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Open a stage. A stage still open is closed first, without a result.
    pub fn start_stage(&mut self, name: &str, metadata: serde_json::Value) {
        if self.current.is_some() {
            self.end_stage(None);
        }
        tracing::debug!(run_id = %self.run_id, stage = name, "Stage started");
        self.current = Some(OpenStage {
            name: name.to_string(),
            started_at: Utc::now(),
            started: Instant::now(),
            metadata,
        });
    }

    /// Close the open stage, if any.
    pub fn end_stage(&mut self, result: Option<serde_json::Value>) {
        let Some(open) = self.current.take() else {
            return;
        };
        let duration_ms = open.started.elapsed().as_millis() as u64;
        tracing::debug!(
            run_id = %self.run_id,
            stage = %open.name,
            duration_ms,
            "Stage finished"
        );
        self.stages.push(StageRecord {
            name: open.name,
            started_at: open.started_at,
            ended_at: Utc::now(),
            duration_ms,
            metadata: open.metadata,
            result,
        });
    }

    pub fn record_api_call(&mut self, kind: ApiCallKind, usage: Option<TokenUsage>) {
        match kind {
            ApiCallKind::Document => self.metrics.api_calls.document += 1,
            ApiCallKind::Semantic => self.metrics.api_calls.semantic += 1,
        }
        if let Some(usage) = usage {
            self.metrics.token_usage.input += usage.input_tokens;
            self.metrics.token_usage.output += usage.output_tokens;
        }
    }

    pub fn record_error(&mut self, stage: &str, error: &dyn std::fmt::Display) {
        self.metrics.errors.push(StageError {
            stage: stage.to_string(),
            error: error.to_string(),
            at: Utc::now(),
        });
    }

    pub fn stages(&self) -> &[StageRecord] {
        &self.stages
    }

    pub fn metrics(&self) -> &RunMetrics {
        &self.metrics
    }

    /// Close any open stage and build the report.
    pub fn report(&mut self) -> MonitorReport {
        self.end_stage(None);

        let total_duration_ms = self.started.elapsed().as_millis() as u64;
        let stages = self
            .stages
            .iter()
            .map(|s| StageSummary {
                name: s.name.clone(),
                duration_ms: s.duration_ms,
                percentage: percentage(s.duration_ms, total_duration_ms),
                metadata: s.metadata.clone(),
            })
            .collect();

        let slowest_stage = self
            .stages
            .iter()
            .max_by_key(|s| s.duration_ms)
            .map(|s| SlowestStage {
                name: s.name.clone(),
                duration_ms: s.duration_ms,
            });

        MonitorReport {
            run_id: self.run_id.clone(),
            total_duration_ms,
            total_duration_readable: format_duration(total_duration_ms),
            stages,
            slowest_stage,
            metrics: self.metrics.clone(),
            api_efficiency: api_efficiency(&self.metrics.api_calls).to_string(),
            generated_at: Utc::now(),
        }
    }
}

fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64 * 1000.0).round() / 10.0
}

/// Rates how much of the work was done by the document service rather than
/// the language model.
pub fn api_efficiency(calls: &ApiCallCounts) -> &'static str {
    let total = calls.document + calls.semantic;
    if total == 0 {
        return "n/a";
    }
    let share = calls.document as f64 / total as f64;
    if share >= 0.7 {
        "excellent"
    } else if share >= 0.5 {
        "good"
    } else if share >= 0.3 {
        "moderate"
    } else {
        "needs_optimization"
    }
}

pub fn format_duration(ms: u64) -> String {
    if ms < 1000 {
        format!("{ms}ms")
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}m {}s", ms / 60_000, (ms % 60_000) / 1000)
    }
}
