//! Blocking client for the language-model messages API.

use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};

use super::types::{Attachment, Completion, CompletionRequest, SemanticProvider};
use super::{transport_error, ProviderError};
use crate::config::PipelineConfig;
use crate::pipeline::monitor::TokenUsage;

const API_VERSION: &str = "2023-06-01";

pub struct MessagesClient {
    base_url: String,
    api_key: String,
    model: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl MessagesClient {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            client,
            timeout_secs: timeout.as_secs(),
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, ProviderError> {
        let key = config
            .semantic_api_key
            .as_deref()
            .ok_or(ProviderError::NotConfigured("Semantic provider"))?;
        Self::new(
            &config.semantic_base_url,
            key,
            &config.semantic_model,
            config.request_timeout,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }
}

impl SemanticProvider for MessagesClient {
    fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError> {
        let body = build_body(&self.model, request);

        tracing::debug!(
            model = %self.model,
            prompt_chars = request.prompt.len(),
            attachment = request.attachment.is_some(),
            "Sending completion request"
        );

        let response = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .map_err(|e| transport_error(e, &self.base_url, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: MessagesResponse = response
            .json()
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        into_completion(parsed)
    }
}

// ──────────────────────────────────────────────
// Wire format
// ──────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ContentBlock<'a> {
    Text { text: &'a str },
    Document { source: Base64Source },
    Image { source: Base64Source },
}

#[derive(Debug, Serialize)]
struct Base64Source {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseBlock>,
    usage: Option<ResponseUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ResponseUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

fn attachment_block(attachment: &Attachment) -> ContentBlock<'_> {
    let source = Base64Source {
        kind: "base64",
        media_type: attachment.media_type.clone(),
        data: base64::engine::general_purpose::STANDARD.encode(&attachment.data),
    };
    if attachment.media_type.starts_with("image/") {
        ContentBlock::Image { source }
    } else {
        ContentBlock::Document { source }
    }
}

fn build_body<'a>(model: &'a str, request: &'a CompletionRequest) -> MessagesRequest<'a> {
    let mut content = Vec::with_capacity(2);
    if let Some(attachment) = &request.attachment {
        content.push(attachment_block(attachment));
    }
    content.push(ContentBlock::Text {
        text: &request.prompt,
    });

    MessagesRequest {
        model,
        max_tokens: request.max_tokens,
        messages: vec![Message {
            role: "user",
            content,
        }],
    }
}

fn into_completion(response: MessagesResponse) -> Result<Completion, ProviderError> {
    let text: String = response
        .content
        .iter()
        .filter(|b| b.kind == "text")
        .map(|b| b.text.as_str())
        .collect();

    if text.is_empty() {
        return Err(ProviderError::MalformedResponse(
            "no text block in response".into(),
        ));
    }

    Ok(Completion {
        text,
        usage: response.usage.map(|u| TokenUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        }),
    })
}
