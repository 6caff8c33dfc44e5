use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::Value;

use super::parser::parse_json_object;
use super::prompt::{
    build_cold_prompt, build_enhance_prompt, build_field_prompt, build_full_document_prompt,
};
use super::types::{
    attachment_media_type, Attachment, Completion, CompletionRequest, SemanticProvider,
};
use super::ProviderError;
use crate::pipeline::critical::CriticalField;
use crate::pipeline::diagnostic::DiagnosticDump;
use crate::pipeline::document::DocumentRef;
use crate::pipeline::merge::{canonicalize_semantic, PreparedInput};
use crate::pipeline::monitor::TokenUsage;

/// Output token budgets.
const ANALYSIS_MAX_TOKENS: u32 = 4096;
const FIELD_MAX_TOKENS: u32 = 1024;

/// Result of one semantic analysis, after at most one retry.
#[derive(Debug, Clone, Default)]
pub struct SemanticOutcome {
    /// Parsed answer, a JSON object (empty when `degraded`).
    pub fields: Value,
    /// Structured output could not be parsed even after the retry.
    pub degraded: bool,
    /// Completion calls made, including the retry.
    pub calls: u32,
    pub usage: TokenUsage,
}

/// Answer of a single-field backfill call.
#[derive(Debug, Clone)]
pub struct FieldAnswer {
    /// Canonical value of the field's group, `Null` when the answer lacked it.
    pub value: Value,
    pub usage: TokenUsage,
}

/// Normalizes calls to the language-model provider.
///
/// Non-fatal failures and unparseable answers are retried once after a fixed
/// delay. Fatal (billing/quota) errors return immediately so the caller can
/// report them to the external breaker.
pub struct SemanticAnalysisAdapter {
    provider: Box<dyn SemanticProvider + Send + Sync>,
    retry_delay: Duration,
    dump: Option<DiagnosticDump>,
    requests: AtomicU32,
}

impl SemanticAnalysisAdapter {
    pub fn new(provider: Box<dyn SemanticProvider + Send + Sync>, retry_delay: Duration) -> Self {
        Self {
            provider,
            retry_delay,
            dump: None,
            requests: AtomicU32::new(0),
        }
    }

    /// Completion requests sent through this adapter so far, failed ones included.
    pub fn requests_sent(&self) -> u32 {
        self.requests.load(Ordering::Relaxed)
    }

    fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.provider.complete(request)
    }

    /// Write prompts and raw answers of this adapter's calls to a dump directory.
    pub fn with_dump(mut self, dump: Option<DiagnosticDump>) -> Self {
        self.dump = dump;
        self
    }

    /// Complete a provider result that already succeeded.
    pub fn enhance(&self, prepared: &PreparedInput) -> Result<SemanticOutcome, ProviderError> {
        let request = CompletionRequest {
            prompt: build_enhance_prompt(prepared),
            attachment: None,
            max_tokens: ANALYSIS_MAX_TOKENS,
        };
        self.analyze_with_retry("enhance", &request)
    }

    /// Analyze extracted text with no provider context.
    pub fn cold(&self, text: &str) -> Result<SemanticOutcome, ProviderError> {
        let request = CompletionRequest {
            prompt: build_cold_prompt(text, ""),
            attachment: None,
            max_tokens: ANALYSIS_MAX_TOKENS,
        };
        self.analyze_with_retry("cold", &request)
    }

    /// Let the provider read the raw file itself.
    pub fn full_document(
        &self,
        document: &DocumentRef,
        bytes: &[u8],
    ) -> Result<SemanticOutcome, ProviderError> {
        let media_type = document.media_type();
        let Some(accepted) = attachment_media_type(&media_type) else {
            return Err(ProviderError::UnsupportedAttachment(media_type));
        };
        let request = CompletionRequest {
            prompt: build_full_document_prompt(&document.display_name),
            attachment: Some(Attachment {
                media_type: accepted.to_string(),
                data: bytes.to_vec(),
            }),
            max_tokens: ANALYSIS_MAX_TOKENS,
        };
        self.analyze_with_retry("full_document", &request)
    }

    /// One focused call for a single critical field. Never retried: the
    /// backfill loop queries each field at most once.
    pub fn extract_field(
        &self,
        field: CriticalField,
        context: &str,
    ) -> Result<FieldAnswer, ProviderError> {
        let request = CompletionRequest {
            prompt: build_field_prompt(field, context),
            attachment: None,
            max_tokens: FIELD_MAX_TOKENS,
        };
        let label = format!("backfill_{}", field.key());
        self.dump_text(&format!("{label}_prompt.txt"), &request.prompt);

        let completion = self.complete(&request)?;
        self.dump_text(&format!("{label}_response.txt"), &completion.text);

        let canonical = canonicalize_semantic(&parse_json_object(&completion.text)?);
        let value = canonical
            .get("critical")
            .and_then(|c| c.get(field.key()))
            .cloned()
            .unwrap_or(Value::Null);

        Ok(FieldAnswer {
            value,
            usage: completion.usage.unwrap_or_default(),
        })
    }

    fn analyze_with_retry(
        &self,
        mode: &str,
        request: &CompletionRequest,
    ) -> Result<SemanticOutcome, ProviderError> {
        let mut outcome = SemanticOutcome::default();
        self.dump_text(&format!("semantic_{mode}_prompt.txt"), &request.prompt);

        for attempt in 0..=1u32 {
            let is_last = attempt == 1;
            if attempt > 0 && !self.retry_delay.is_zero() {
                std::thread::sleep(self.retry_delay);
            }

            outcome.calls += 1;
            let completion = match self.complete(request) {
                Ok(c) => c,
                Err(e) if e.is_fatal() => {
                    tracing::error!(mode, error = %e, "Semantic call hit a fatal service fault");
                    return Err(e);
                }
                Err(e) if !is_last => {
                    tracing::warn!(mode, attempt = attempt + 1, error = %e, "Semantic call failed, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            };

            if let Some(usage) = completion.usage {
                outcome.usage.input_tokens += usage.input_tokens;
                outcome.usage.output_tokens += usage.output_tokens;
            }
            self.dump_text(&format!("semantic_{mode}_response_{attempt}.txt"), &completion.text);

            match parse_json_object(&completion.text) {
                Ok(fields) => {
                    outcome.fields = fields;
                    return Ok(outcome);
                }
                Err(e) if !is_last => {
                    tracing::warn!(mode, attempt = attempt + 1, error = %e, "Semantic answer unparseable, retrying");
                }
                Err(e) => {
                    tracing::warn!(mode, error = %e, "Semantic answer unparseable after retry, continuing without fields");
                    outcome.fields = Value::Object(Default::default());
                    outcome.degraded = true;
                    return Ok(outcome);
                }
            }
        }

        // The loop always returns on its last attempt
        outcome.fields = Value::Object(Default::default());
        outcome.degraded = true;
        Ok(outcome)
    }

    fn dump_text(&self, name: &str, content: &str) {
        if let Some(dump) = &self.dump {
            dump.write_text(name, content);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::pipeline::providers::mock::MockSemanticProvider;

    const FATAL: &str = "Your credit balance is too low to access the API";

    fn adapter(mock: &MockSemanticProvider) -> SemanticAnalysisAdapter {
        SemanticAnalysisAdapter::new(Box::new(mock.clone()), Duration::ZERO)
    }

    #[test]
    fn first_answer_is_used() {
        let mock = MockSemanticProvider::new().reply(r#"{"summary": {"title": "Yemek"}}"#);
        let outcome = adapter(&mock).cold("metin").unwrap();
        assert_eq!(outcome.fields["summary"]["title"], "Yemek");
        assert_eq!(outcome.calls, 1);
        assert!(!outcome.degraded);
        assert_eq!(mock.calls(), 1);
    }

    #[test]
    fn transient_failure_is_retried_once() {
        let mock = MockSemanticProvider::new()
            .fail(529, "overloaded")
            .reply(r#"{"dates": {"end_date": "31.12.2025"}}"#);
        let outcome = adapter(&mock).cold("metin").unwrap();
        assert_eq!(outcome.calls, 2);
        assert_eq!(outcome.fields["dates"]["end_date"], "31.12.2025");
    }

    #[test]
    fn two_transient_failures_surface_the_error() {
        let mock = MockSemanticProvider::new().fail(500, "boom").fail(500, "boom again");
        let adapter = adapter(&mock);
        let err = adapter.cold("metin").unwrap_err();
        assert!(err.to_string().contains("boom again"));
        assert_eq!(mock.calls(), 2);
        assert_eq!(adapter.requests_sent(), 2);
    }

    #[test]
    fn fatal_error_is_not_retried() {
        let mock = MockSemanticProvider::new().fail(400, FATAL).reply("{}");
        let adapter = adapter(&mock);
        let err = adapter.cold("metin").unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(mock.calls(), 1);
        assert_eq!(adapter.requests_sent(), 1);
    }

    #[test]
    fn unparseable_twice_degrades_to_empty() {
        let mock = MockSemanticProvider::new().reply("no json here").reply("still none");
        let outcome = adapter(&mock).cold("metin").unwrap();
        assert!(outcome.degraded);
        assert_eq!(outcome.fields, json!({}));
        assert_eq!(outcome.calls, 2);
    }

    #[test]
    fn unparseable_then_valid_recovers() {
        let mock = MockSemanticProvider::new().reply("oops").reply(r#"{"personnel": {"total_count": 12}}"#);
        let outcome = adapter(&mock).cold("metin").unwrap();
        assert!(!outcome.degraded);
        assert_eq!(outcome.fields["personnel"]["total_count"], 12);
    }

    #[test]
    fn full_document_attaches_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();
        let doc = DocumentRef::open(&path).unwrap();

        let mock = MockSemanticProvider::new().reply("{}");
        adapter(&mock).full_document(&doc, b"%PDF-1.4").unwrap();

        let requests = mock.requests();
        assert_eq!(requests[0].attachment_media_type.as_deref(), Some("application/pdf"));
        assert!(requests[0].prompt.contains("scan.pdf"));
    }

    #[test]
    fn unreadable_attachment_is_refused_without_a_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sartname.docx");
        std::fs::write(&path, b"PK").unwrap();
        let doc = DocumentRef::open(&path).unwrap();

        let mock = MockSemanticProvider::new().otherwise("{}");
        let adapter = adapter(&mock);
        let err = adapter.full_document(&doc, b"PK").unwrap_err();
        assert!(matches!(err, ProviderError::UnsupportedAttachment(_)));
        assert_eq!(mock.calls(), 0);
        assert_eq!(adapter.requests_sent(), 0);
    }

    #[test]
    fn text_files_travel_as_plain_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ilan.csv");
        std::fs::write(&path, b"kalem;miktar").unwrap();
        let doc = DocumentRef::open(&path).unwrap();

        let mock = MockSemanticProvider::new().reply("{}");
        adapter(&mock).full_document(&doc, b"kalem;miktar").unwrap();
        assert_eq!(mock.requests()[0].attachment_media_type.as_deref(), Some("text/plain"));
    }

    #[test]
    fn field_answer_extracts_group() {
        let mock = MockSemanticProvider::new()
            .reply(r#"{"teminat_oranlari": {"gecici": "%3", "kesin": "%6"}}"#);
        let answer = adapter(&mock)
            .extract_field(CriticalField::GuaranteeRatios, "Geçici teminat %3")
            .unwrap();
        assert_eq!(answer.value, json!({"provisional": "%3", "final": "%6"}));
    }

    #[test]
    fn field_call_is_never_retried() {
        let mock = MockSemanticProvider::new().fail(500, "boom").reply("{}");
        assert!(adapter(&mock)
            .extract_field(CriticalField::Contact, "text")
            .is_err());
        assert_eq!(mock.calls(), 1);
    }

    #[test]
    fn usage_is_accumulated_across_retry() {
        let mock = MockSemanticProvider::new()
            .reply_with_usage("bad", 100, 10)
            .reply_with_usage("{}", 120, 20);
        let outcome = adapter(&mock).cold("metin").unwrap();
        assert_eq!(outcome.usage.input_tokens, 220);
        assert_eq!(outcome.usage.output_tokens, 30);
    }
}
