//! Scripted collaborators for tests and offline runs.
//!
//! Every mock is `Clone` and shares its script and call log, so a test can keep
//! a handle after boxing one into the orchestrator.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;

use super::types::*;
use super::ProviderError;
use crate::pipeline::monitor::TokenUsage;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

#[derive(Debug, Clone)]
enum MockReply {
    Text { text: String, usage: Option<TokenUsage> },
    Error { status: u16, body: String },
}

impl MockReply {
    fn into_result(self) -> Result<Completion, ProviderError> {
        match self {
            Self::Text { text, usage } => Ok(Completion { text, usage }),
            Self::Error { status, body } => Err(ProviderError::Http { status, body }),
        }
    }
}

/// A completion request as the mock saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub prompt: String,
    pub attachment_media_type: Option<String>,
    pub max_tokens: u32,
}

#[derive(Debug, Default)]
struct SemanticScript {
    replies: VecDeque<MockReply>,
    fallback: Option<MockReply>,
    requests: Vec<RecordedRequest>,
}

/// Semantic provider answering from a queue of scripted replies.
#[derive(Debug, Clone, Default)]
pub struct MockSemanticProvider {
    script: Arc<Mutex<SemanticScript>>,
}

impl MockSemanticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, text: &str) -> Self {
        self.push(MockReply::Text {
            text: text.to_string(),
            usage: None,
        })
    }

    pub fn reply_with_usage(self, text: &str, input_tokens: u64, output_tokens: u64) -> Self {
        self.push(MockReply::Text {
            text: text.to_string(),
            usage: Some(TokenUsage {
                input_tokens,
                output_tokens,
            }),
        })
    }

    pub fn fail(self, status: u16, body: &str) -> Self {
        self.push(MockReply::Error {
            status,
            body: body.to_string(),
        })
    }

    /// Answer used once the queue is empty.
    pub fn otherwise(self, text: &str) -> Self {
        lock(&self.script).fallback = Some(MockReply::Text {
            text: text.to_string(),
            usage: None,
        });
        self
    }

    pub fn calls(&self) -> usize {
        lock(&self.script).requests.len()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.script).requests.clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.prompt).collect()
    }

    fn push(self, reply: MockReply) -> Self {
        lock(&self.script).replies.push_back(reply);
        self
    }
}

impl SemanticProvider for MockSemanticProvider {
    fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let mut script = lock(&self.script);
        script.requests.push(RecordedRequest {
            prompt: request.prompt.clone(),
            attachment_media_type: request.attachment.as_ref().map(|a| a.media_type.clone()),
            max_tokens: request.max_tokens,
        });
        let reply = script
            .replies
            .pop_front()
            .or_else(|| script.fallback.clone());
        match reply {
            Some(reply) => reply.into_result(),
            None => Err(ProviderError::Unsuccessful("mock script exhausted".into())),
        }
    }
}

#[derive(Debug)]
enum DocumentScript {
    Succeed(ProviderResult),
    Fail(String),
}

/// Custom-model or layout service returning one scripted outcome.
#[derive(Debug, Clone)]
pub struct MockDocumentService {
    script: Arc<DocumentScript>,
    /// Failures served before the script applies.
    leading_failures: Arc<Mutex<VecDeque<String>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockDocumentService {
    pub fn succeeding(result: ProviderResult) -> Self {
        Self {
            script: Arc::new(DocumentScript::Succeed(result)),
            leading_failures: Arc::default(),
            calls: Arc::default(),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            script: Arc::new(DocumentScript::Fail(message.to_string())),
            leading_failures: Arc::default(),
            calls: Arc::default(),
        }
    }

    /// Fails once with `message`, then returns `result`.
    pub fn flaky(message: &str, result: ProviderResult) -> Self {
        let mock = Self::succeeding(result);
        lock(&mock.leading_failures).push_back(message.to_string());
        mock
    }

    pub fn calls(&self) -> usize {
        lock(&self.calls).len()
    }

    /// Model ids passed to custom-model calls (`-` for layout calls).
    pub fn model_ids(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    fn respond(&self, model_id: &str) -> Result<ProviderResult, ProviderError> {
        lock(&self.calls).push(model_id.to_string());
        if let Some(message) = lock(&self.leading_failures).pop_front() {
            return Err(ProviderError::Http {
                status: 503,
                body: message,
            });
        }
        match self.script.as_ref() {
            DocumentScript::Succeed(result) => Ok(result.clone()),
            DocumentScript::Fail(message) => Err(ProviderError::Http {
                status: 500,
                body: message.clone(),
            }),
        }
    }
}

impl CustomModelService for MockDocumentService {
    fn analyze(&self, _document: &[u8], model_id: &str) -> Result<ProviderResult, ProviderError> {
        self.respond(model_id)
    }
}

impl LayoutService for MockDocumentService {
    fn analyze(&self, _document: &[u8]) -> Result<ProviderResult, ProviderError> {
        self.respond("-")
    }
}

impl HealthService for MockDocumentService {
    fn check_health(&self) -> Result<HealthStatus, ProviderError> {
        Ok(HealthStatus {
            healthy: matches!(self.script.as_ref(), DocumentScript::Succeed(_)),
            custom_model_exists: true,
            detail: None,
        })
    }
}

/// Local extractor returning scripted text.
#[derive(Debug, Clone)]
pub struct MockLocalExtractor {
    outcome: Result<LocalExtraction, String>,
    calls: Arc<Mutex<Vec<PathBuf>>>,
}

impl MockLocalExtractor {
    pub fn with_text(text: &str) -> Self {
        Self {
            outcome: Ok(LocalExtraction {
                text: text.to_string(),
                kind: "text".into(),
                needs_ocr: false,
            }),
            calls: Arc::default(),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            outcome: Err(message.to_string()),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> usize {
        lock(&self.calls).len()
    }
}

impl LocalExtractor for MockLocalExtractor {
    fn extract(&self, path: &Path) -> Result<LocalExtraction, ProviderError> {
        lock(&self.calls).push(path.to_path_buf());
        self.outcome
            .clone()
            .map_err(ProviderError::Unsuccessful)
    }
}

/// Successful layout result with the given recognized text.
pub fn layout_result(text: &str) -> ProviderResult {
    let mut result = ProviderResult::empty(ProviderName::Layout);
    result.success = true;
    result.text = text.to_string();
    result
}

/// Successful custom-model result with `(name, value, confidence)` fields.
pub fn custom_result(fields: &[(&str, Value, f32)]) -> ProviderResult {
    let mut result = ProviderResult::empty(ProviderName::Custom);
    result.success = true;
    for (name, value, confidence) in fields {
        result
            .fields
            .insert(name.to_string(), ProviderField::new(value.clone(), *confidence));
    }
    result
}
