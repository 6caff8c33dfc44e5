use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ProviderError;
use crate::pipeline::monitor::TokenUsage;

/// Which provider produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderName {
    Custom,
    Layout,
    Local,
    Semantic,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Custom => "custom",
            Self::Layout => "layout",
            Self::Local => "local",
            Self::Semantic => "semantic",
        }
    }
}

/// A provider field value with its confidence.
///
/// Providers report either a bare scalar or `{value|content, confidence}`.
/// A missing confidence means the provider is not probabilistic: 1.0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderField {
    pub value: Value,
    pub confidence: f32,
}

impl ProviderField {
    pub fn new(value: Value, confidence: f32) -> Self {
        Self {
            value,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    pub fn from_raw(raw: Value) -> Self {
        let Value::Object(map) = &raw else {
            return Self::new(raw, 1.0);
        };
        if !map.contains_key("value") && !map.contains_key("content") {
            return Self::new(raw, 1.0);
        }

        let confidence = map
            .get("confidence")
            .and_then(Value::as_f64)
            .map(|c| c as f32)
            .unwrap_or(1.0);
        let value = map
            .get("value")
            .filter(|v| !v.is_null())
            .or_else(|| map.get("content"))
            .cloned()
            .unwrap_or(Value::Null);
        Self::new(value, confidence)
    }
}

impl<'de> Deserialize<'de> for ProviderField {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_raw)
    }
}

/// One cell of a cell-addressed table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCell {
    pub row_index: usize,
    pub column_index: usize,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub row_count: usize,
    pub column_count: usize,
    pub cells: Vec<TableCell>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paragraph {
    pub content: String,
    /// Layout role such as `title` or `sectionHeading`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// Output of one provider attempt. Never shared across providers.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderResult {
    pub provider: ProviderName,
    pub success: bool,
    /// Full recognized text, when the provider returns it.
    pub text: String,
    pub fields: BTreeMap<String, ProviderField>,
    pub tables: Vec<Table>,
    pub paragraphs: Vec<Paragraph>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip)]
    pub raw: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProviderResult {
    pub fn empty(provider: ProviderName) -> Self {
        Self {
            provider,
            success: false,
            text: String::new(),
            fields: BTreeMap::new(),
            tables: Vec::new(),
            paragraphs: Vec::new(),
            confidence: None,
            raw: None,
            error: None,
        }
    }

    pub fn failed(provider: ProviderName, error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::empty(provider)
        }
    }
}

/// Output of the local office/text extractor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocalExtraction {
    pub text: String,
    /// Detected format, e.g. `text`, `html`.
    pub kind: String,
    pub needs_ocr: bool,
}

/// Binary attachment sent with a completion request.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub media_type: String,
    pub data: Vec<u8>,
}

/// Media type under which a file of `media_type` can be attached to a
/// completion request, if at all. Text-like files travel as plain text.
pub fn attachment_media_type(media_type: &str) -> Option<&'static str> {
    match media_type {
        "application/pdf" => Some("application/pdf"),
        "image/jpeg" => Some("image/jpeg"),
        "image/png" => Some("image/png"),
        "image/gif" => Some("image/gif"),
        "image/webp" => Some("image/webp"),
        "application/json" | "application/xml" | "application/rtf" => Some("text/plain"),
        m if m.starts_with("text/") => Some("text/plain"),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    pub attachment: Option<Attachment>,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub custom_model_exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════
// Collaborator interfaces
// ═══════════════════════════════════════════════════════════════════════════

/// Reads text from office and text formats on disk.
pub trait LocalExtractor {
    fn extract(&self, path: &Path) -> Result<LocalExtraction, ProviderError>;
}

/// Custom-trained extraction model.
pub trait CustomModelService {
    fn analyze(&self, document: &[u8], model_id: &str) -> Result<ProviderResult, ProviderError>;
}

/// General OCR/layout extraction.
pub trait LayoutService {
    fn analyze(&self, document: &[u8]) -> Result<ProviderResult, ProviderError>;
}

/// Language-model completion. The caller parses the structured text.
pub trait SemanticProvider {
    fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError>;
}

impl<P: SemanticProvider + ?Sized> SemanticProvider for std::sync::Arc<P> {
    fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        (**self).complete(request)
    }
}

pub trait HealthService {
    fn check_health(&self) -> Result<HealthStatus, ProviderError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn bare_scalar_defaults_to_full_confidence() {
        let field = ProviderField::from_raw(json!("Ankara Üniversitesi"));
        assert_eq!(field.value, json!("Ankara Üniversitesi"));
        assert_eq!(field.confidence, 1.0);
    }

    #[test]
    fn object_with_confidence() {
        let field = ProviderField::from_raw(json!({"value": "%3", "confidence": 0.42}));
        assert_eq!(field.value, json!("%3"));
        assert!((field.confidence - 0.42).abs() < 1e-6);
    }

    #[test]
    fn content_used_when_value_absent() {
        let field = ProviderField::from_raw(json!({"content": "12:00", "confidence": 0.9}));
        assert_eq!(field.value, json!("12:00"));
    }

    #[test]
    fn attachments_limited_to_readable_types() {
        assert_eq!(attachment_media_type("application/pdf"), Some("application/pdf"));
        assert_eq!(attachment_media_type("image/webp"), Some("image/webp"));
        assert_eq!(attachment_media_type("text/csv"), Some("text/plain"));
        assert_eq!(attachment_media_type("image/tiff"), None);
        assert_eq!(attachment_media_type("image/bmp"), None);
        assert_eq!(
            attachment_media_type(
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            ),
            None
        );
    }

    #[test]
    fn explicit_zero_confidence_is_kept() {
        let field = ProviderField::from_raw(json!({"value": "??", "confidence": 0.0}));
        assert_eq!(field.confidence, 0.0);
    }

    #[test]
    fn object_without_value_key_is_a_scalar_object() {
        let raw = json!({"kahvalti": "07:00"});
        let field = ProviderField::from_raw(raw.clone());
        assert_eq!(field.value, raw);
        assert_eq!(field.confidence, 1.0);
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(ProviderField::new(json!(1), 1.7).confidence, 1.0);
        assert_eq!(ProviderField::new(json!(1), -0.2).confidence, 0.0);
    }

    #[test]
    fn failed_result_carries_error() {
        let result = ProviderResult::failed(ProviderName::Layout, "HTTP 500");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("HTTP 500"));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["provider"], "layout");
    }
}
