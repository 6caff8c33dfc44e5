use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Application-level constants
pub const APP_NAME: &str = "Tender Analyzer";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default custom extraction model trained on catering tender documents.
pub const DEFAULT_CUSTOM_MODEL_ID: &str = "catering-tender-v1";

/// Default language model used for semantic analysis and backfill.
pub const DEFAULT_SEMANTIC_MODEL: &str = "claude-sonnet-4-20250514";

/// Default messages endpoint of the semantic provider.
pub const DEFAULT_SEMANTIC_BASE_URL: &str = "https://api.anthropic.com";

/// Fields below this provider confidence never reach the semantic provider (inclusive).
pub const CONFIDENCE_THRESHOLD: f32 = 0.30;

/// Hard cap on the context sent with a single backfill prompt (characters).
pub const BACKFILL_CONTEXT_LIMIT: usize = 150_000;

/// Share of a truncated context kept from the start of the document.
pub const TRUNCATION_HEAD_SHARE: f64 = 0.65;

/// Local extraction yielding fewer characters is treated as failed.
pub const MIN_LOCAL_TEXT_CHARS: usize = 50;

/// Consecutive transient store faults that open the store breaker.
pub const STORE_FAILURE_THRESHOLD: u32 = 3;

/// Delay before retrying a non-fatal provider failure.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Upper bound of the field-count confidence heuristic.
pub const MAX_HEURISTIC_CONFIDENCE: f64 = 0.95;

/// Default log filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "tender_analyzer=info,warn"
}

/// Optional diagnostic dump directory (`TENDER_DUMP_DIR`).
pub fn dump_dir() -> Option<PathBuf> {
    std::env::var("TENDER_DUMP_DIR")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

/// Deployment configuration for one pipeline context.
///
/// Built from the environment once at startup and shared by every run.
/// Secrets are skipped when serialized (health reports embed this struct).
#[derive(Debug, Clone, Serialize)]
pub struct PipelineConfig {
    /// Document-intelligence endpoint (layout + custom model).
    pub docai_endpoint: Option<String>,
    #[serde(skip_serializing)]
    pub docai_key: Option<String>,
    /// Custom model identifier.
    pub custom_model_id: String,
    /// Operator switch for the custom model; only honoured when the endpoint is configured.
    pub custom_model_enabled: bool,
    #[serde(skip_serializing)]
    pub semantic_api_key: Option<String>,
    pub semantic_model: String,
    pub semantic_base_url: String,
    /// HTTP timeout handed to provider clients. The orchestrator itself imposes none.
    pub request_timeout: Duration,
    /// Fixed delay before the single retry of a failed provider or semantic call.
    pub retry_delay: Duration,
    /// How long the store breaker stays open once tripped.
    pub store_pause: Duration,
}

impl PipelineConfig {
    /// Read configuration from `TENDER_*` environment variables.
    pub fn from_env() -> Self {
        let docai_endpoint = env_string("TENDER_DOCAI_ENDPOINT");
        let docai_key = env_string("TENDER_DOCAI_KEY");
        let custom_model_enabled = env_string("TENDER_CUSTOM_MODEL_ENABLED")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self {
            docai_endpoint,
            docai_key,
            custom_model_id: env_string("TENDER_CUSTOM_MODEL_ID")
                .unwrap_or_else(|| DEFAULT_CUSTOM_MODEL_ID.to_string()),
            custom_model_enabled,
            semantic_api_key: env_string("TENDER_SEMANTIC_API_KEY"),
            semantic_model: env_string("TENDER_SEMANTIC_MODEL")
                .unwrap_or_else(|| DEFAULT_SEMANTIC_MODEL.to_string()),
            semantic_base_url: env_string("TENDER_SEMANTIC_BASE_URL")
                .unwrap_or_else(|| DEFAULT_SEMANTIC_BASE_URL.to_string()),
            request_timeout: Duration::from_secs(env_u64("TENDER_REQUEST_TIMEOUT_SECS", 600)),
            retry_delay: env_string("TENDER_RETRY_DELAY_MS")
                .and_then(|v| v.parse().ok())
                .map_or(DEFAULT_RETRY_DELAY, Duration::from_millis),
            store_pause: Duration::from_secs(env_u64("TENDER_STORE_PAUSE_SECS", 30)),
        }
    }

    /// Everything configured and enabled, no delays. Used by tests.
    pub fn for_tests() -> Self {
        Self {
            docai_endpoint: Some("https://docai.test".into()),
            docai_key: Some("test-key".into()),
            custom_model_id: DEFAULT_CUSTOM_MODEL_ID.into(),
            custom_model_enabled: true,
            semantic_api_key: Some("test-key".into()),
            semantic_model: DEFAULT_SEMANTIC_MODEL.into(),
            semantic_base_url: DEFAULT_SEMANTIC_BASE_URL.into(),
            request_timeout: Duration::from_secs(5),
            retry_delay: Duration::ZERO,
            store_pause: Duration::from_millis(40),
        }
    }

    /// Layout extraction needs both endpoint and key.
    pub fn is_layout_configured(&self) -> bool {
        self.docai_endpoint.is_some() && self.docai_key.is_some()
    }

    /// Custom model requires the layout credentials plus the operator switch.
    pub fn is_custom_model_enabled(&self) -> bool {
        self.custom_model_enabled && self.is_layout_configured()
    }

    pub fn is_semantic_configured(&self) -> bool {
        self.semantic_api_key.is_some()
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_u64(name: &str, default: u64) -> u64 {
    env_string(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_name_is_tender_analyzer() {
        assert_eq!(APP_NAME, "Tender Analyzer");
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn custom_model_requires_endpoint() {
        let mut config = PipelineConfig::for_tests();
        assert!(config.is_custom_model_enabled());

        config.docai_key = None;
        assert!(!config.is_layout_configured());
        assert!(!config.is_custom_model_enabled());
    }

    #[test]
    fn custom_model_requires_switch() {
        let mut config = PipelineConfig::for_tests();
        config.custom_model_enabled = false;
        assert!(config.is_layout_configured());
        assert!(!config.is_custom_model_enabled());
    }

    #[test]
    fn secrets_are_not_serialized() {
        let config = PipelineConfig::for_tests();
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("test-key"));
        assert!(json.contains("catering-tender-v1"));
    }

    #[test]
    fn fixed_thresholds() {
        assert!((CONFIDENCE_THRESHOLD - 0.30).abs() < f32::EPSILON);
        assert_eq!(BACKFILL_CONTEXT_LIMIT, 150_000);
        assert_eq!(STORE_FAILURE_THRESHOLD, 3);
    }
}
