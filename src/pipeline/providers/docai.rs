//! Blocking REST client for the document-intelligence service (layout and
//! custom-model analysis plus model health).

use std::collections::BTreeMap;
use std::time::Duration;

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{
    CustomModelService, HealthService, HealthStatus, LayoutService, Paragraph, ProviderField,
    ProviderName, ProviderResult, Table, TableCell,
};
use super::{transport_error, ProviderError};
use crate::config::PipelineConfig;

const API_VERSION: &str = "2024-11-30";
const LAYOUT_MODEL_ID: &str = "prebuilt-layout";
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

pub struct DocumentAiClient {
    endpoint: String,
    key: String,
    custom_model_id: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl DocumentAiClient {
    pub fn new(
        endpoint: &str,
        key: &str,
        custom_model_id: &str,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::HttpClient(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            key: key.to_string(),
            custom_model_id: custom_model_id.to_string(),
            client,
            timeout_secs: timeout.as_secs(),
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, ProviderError> {
        match (&config.docai_endpoint, &config.docai_key) {
            (Some(endpoint), Some(key)) => Self::new(
                endpoint,
                key,
                &config.custom_model_id,
                config.request_timeout,
            ),
            _ => Err(ProviderError::NotConfigured("Document intelligence service")),
        }
    }

    fn model_url(&self, model_id: &str) -> String {
        format!(
            "{}/documentintelligence/documentModels/{model_id}?api-version={API_VERSION}",
            self.endpoint
        )
    }

    fn analyze_url(&self, model_id: &str) -> String {
        format!(
            "{}/documentintelligence/documentModels/{model_id}:analyze?api-version={API_VERSION}",
            self.endpoint
        )
    }

    /// Submit the document, then poll the operation until it settles.
    fn analyze_with_model(
        &self,
        document: &[u8],
        model_id: &str,
        provider: ProviderName,
    ) -> Result<ProviderResult, ProviderError> {
        let body = AnalyzeRequest {
            base64_source: base64::engine::general_purpose::STANDARD.encode(document),
        };

        let response = self
            .client
            .post(self.analyze_url(model_id))
            .header(KEY_HEADER, &self.key)
            .json(&body)
            .send()
            .map_err(|e| transport_error(e, &self.endpoint, self.timeout_secs))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let operation_url = response
            .headers()
            .get("Operation-Location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                ProviderError::MalformedResponse("No Operation-Location header".into())
            })?;

        tracing::debug!(model_id, "Document analysis submitted, polling");
        let result = self.poll(&operation_url)?;
        Ok(into_provider_result(result, provider))
    }

    fn poll(&self, operation_url: &str) -> Result<AnalyzeResult, ProviderError> {
        let max_polls = self.timeout_secs / POLL_INTERVAL.as_secs() + 1;

        for _ in 0..max_polls {
            let response = self
                .client
                .get(operation_url)
                .header(KEY_HEADER, &self.key)
                .send()
                .map_err(|e| transport_error(e, &self.endpoint, self.timeout_secs))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().unwrap_or_default();
                return Err(ProviderError::Http {
                    status: status.as_u16(),
                    body,
                });
            }

            let operation: OperationResponse = response
                .json()
                .map_err(|e| ProviderError::Parse(e.to_string()))?;

            match operation.status.as_str() {
                "succeeded" => return Ok(operation.analyze_result.unwrap_or_default()),
                "failed" | "canceled" => {
                    let reason = operation
                        .error
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| format!("analysis {}", operation.status));
                    return Err(ProviderError::Unsuccessful(reason));
                }
                _ => std::thread::sleep(POLL_INTERVAL),
            }
        }

        Err(ProviderError::Timeout(self.timeout_secs))
    }
}

impl CustomModelService for DocumentAiClient {
    fn analyze(&self, document: &[u8], model_id: &str) -> Result<ProviderResult, ProviderError> {
        self.analyze_with_model(document, model_id, ProviderName::Custom)
    }
}

impl LayoutService for DocumentAiClient {
    fn analyze(&self, document: &[u8]) -> Result<ProviderResult, ProviderError> {
        self.analyze_with_model(document, LAYOUT_MODEL_ID, ProviderName::Layout)
    }
}

impl HealthService for DocumentAiClient {
    fn check_health(&self) -> Result<HealthStatus, ProviderError> {
        let response = self
            .client
            .get(self.model_url(&self.custom_model_id))
            .header(KEY_HEADER, &self.key)
            .send()
            .map_err(|e| transport_error(e, &self.endpoint, self.timeout_secs))?;

        match response.status().as_u16() {
            200 => Ok(HealthStatus {
                healthy: true,
                custom_model_exists: true,
                detail: None,
            }),
            404 => Ok(HealthStatus {
                healthy: true,
                custom_model_exists: false,
                detail: Some(format!("model {} not found", self.custom_model_id)),
            }),
            status => Err(ProviderError::Http {
                status,
                body: response.text().unwrap_or_default(),
            }),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Wire format
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeRequest {
    base64_source: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResponse {
    status: String,
    analyze_result: Option<AnalyzeResult>,
    error: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct AnalyzeResult {
    content: String,
    paragraphs: Vec<RawParagraph>,
    tables: Vec<RawTable>,
    documents: Vec<RawDocument>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawParagraph {
    content: String,
    role: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawTable {
    row_count: usize,
    column_count: usize,
    cells: Vec<RawCell>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawCell {
    row_index: usize,
    column_index: usize,
    content: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDocument {
    fields: BTreeMap<String, Value>,
    confidence: Option<f32>,
}

fn into_provider_result(result: AnalyzeResult, provider: ProviderName) -> ProviderResult {
    let mut out = ProviderResult::empty(provider);
    out.success = true;
    out.text = result.content;
    out.paragraphs = result
        .paragraphs
        .into_iter()
        .map(|p| Paragraph {
            content: p.content,
            role: p.role,
        })
        .collect();
    out.tables = result
        .tables
        .into_iter()
        .map(|t| Table {
            row_count: t.row_count,
            column_count: t.column_count,
            cells: t
                .cells
                .into_iter()
                .map(|c| TableCell {
                    row_index: c.row_index,
                    column_index: c.column_index,
                    content: c.content,
                })
                .collect(),
        })
        .collect();

    if let Some(document) = result.documents.into_iter().next() {
        out.confidence = document.confidence;
        out.fields = document
            .fields
            .into_iter()
            .map(|(name, raw)| {
                let confidence = raw
                    .get("confidence")
                    .and_then(Value::as_f64)
                    .map(|c| c as f32)
                    .unwrap_or(1.0);
                (name, ProviderField::new(field_value(&raw), confidence))
            })
            .collect();
    }
    out
}

/// Typed value of a document field (`valueString`, `valueNumber`, ...),
/// falling back to its raw `content`.
fn field_value(raw: &Value) -> Value {
    let Value::Object(map) = raw else {
        return raw.clone();
    };

    if let Some(items) = map.get("valueArray").and_then(Value::as_array) {
        return Value::Array(items.iter().map(field_value).collect());
    }
    if let Some(fields) = map.get("valueObject").and_then(Value::as_object) {
        return Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), field_value(v)))
                .collect(),
        );
    }
    if let Some(currency) = map.get("valueCurrency") {
        if let Some(amount) = currency.get("amount") {
            return amount.clone();
        }
    }

    map.iter()
        .find(|(k, v)| k.starts_with("value") && !v.is_null())
        .map(|(_, v)| v.clone())
        .or_else(|| map.get("content").cloned())
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn sample_result() -> AnalyzeResult {
        serde_json::from_value(json!({
            "content": "İDARİ ŞARTNAME\nGeçici teminat %3",
            "paragraphs": [
                {"content": "İDARİ ŞARTNAME", "role": "title"},
                {"content": "Geçici teminat %3"}
            ],
            "tables": [{
                "rowCount": 2,
                "columnCount": 2,
                "cells": [
                    {"rowIndex": 0, "columnIndex": 0, "content": "Öğün"},
                    {"rowIndex": 1, "columnIndex": 1, "content": "850"}
                ]
            }],
            "documents": [{
                "confidence": 0.88,
                "fields": {
                    "ikn": {"type": "string", "valueString": "2025/123456", "content": "2025/123456", "confidence": 0.97},
                    "kisi_sayisi": {"type": "number", "valueNumber": 850, "confidence": 0.41},
                    "yetkili": {"type": "string", "content": "Ahmet Y."},
                    "tahmini_bedel": {"type": "currency", "valueCurrency": {"amount": 4500000.0, "currencyCode": "TRY"}, "confidence": 0.8},
                    "ogun_turleri": {"type": "array", "valueArray": [
                        {"type": "string", "valueString": "kahvaltı"},
                        {"type": "string", "valueString": "öğle"}
                    ]}
                }
            }]
        }))
        .unwrap()
    }

    #[test]
    fn converts_text_paragraphs_and_tables() {
        let result = into_provider_result(sample_result(), ProviderName::Layout);
        assert!(result.success);
        assert!(result.text.starts_with("İDARİ ŞARTNAME"));
        assert_eq!(result.paragraphs[0].role.as_deref(), Some("title"));
        assert_eq!(result.tables[0].cells.len(), 2);
        assert_eq!(result.tables[0].cells[1].column_index, 1);
    }

    #[test]
    fn converts_typed_fields_with_confidence() {
        let result = into_provider_result(sample_result(), ProviderName::Custom);
        assert_eq!(result.confidence, Some(0.88));
        assert_eq!(result.fields["ikn"].value, json!("2025/123456"));
        assert!((result.fields["kisi_sayisi"].confidence - 0.41).abs() < 1e-6);
        assert_eq!(result.fields["kisi_sayisi"].value, json!(850));
        assert_eq!(result.fields["yetkili"].value, json!("Ahmet Y."));
        assert_eq!(result.fields["yetkili"].confidence, 1.0);
        assert_eq!(result.fields["tahmini_bedel"].value, json!(4500000.0));
        assert_eq!(result.fields["ogun_turleri"].value, json!(["kahvaltı", "öğle"]));
    }

    #[test]
    fn empty_analyze_result_is_tolerated() {
        let parsed: AnalyzeResult = serde_json::from_value(json!({})).unwrap();
        let result = into_provider_result(parsed, ProviderName::Layout);
        assert!(result.success);
        assert!(result.fields.is_empty());
    }

    #[test]
    fn urls_use_api_version() {
        let client =
            DocumentAiClient::new("https://x.cognitiveservices.azure.com/", "k", "m1", Duration::from_secs(10))
                .unwrap();
        assert_eq!(
            client.analyze_url("prebuilt-layout"),
            "https://x.cognitiveservices.azure.com/documentintelligence/documentModels/prebuilt-layout:analyze?api-version=2024-11-30"
        );
        assert!(client.model_url("m1").ends_with("/documentModels/m1?api-version=2024-11-30"));
    }

    #[test]
    fn unconfigured_config_is_rejected() {
        let mut config = PipelineConfig::for_tests();
        config.docai_key = None;
        assert!(matches!(
            DocumentAiClient::from_config(&config),
            Err(ProviderError::NotConfigured(_))
        ));
    }
}
