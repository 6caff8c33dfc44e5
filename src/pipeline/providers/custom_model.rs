use std::time::Duration;

use super::types::{CustomModelService, ProviderName, ProviderResult};
use super::{retry_once, Attempted, ProviderError};
use crate::config::DEFAULT_RETRY_DELAY;

/// Calls the custom-trained tender model and normalizes its result.
pub struct CustomModelAdapter {
    service: Box<dyn CustomModelService + Send + Sync>,
    model_id: String,
    retry_delay: Duration,
}

impl CustomModelAdapter {
    pub fn new(service: Box<dyn CustomModelService + Send + Sync>, model_id: &str) -> Self {
        Self {
            service,
            model_id: model_id.to_string(),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Analyze with one retry on a non-fatal failure.
    pub fn run(&self, document: &[u8]) -> Attempted<ProviderResult> {
        retry_once("custom_model", self.retry_delay, || self.attempt(document))
    }

    /// `Ok` only for an explicitly successful result. Field or table counts
    /// never decide success.
    fn attempt(&self, document: &[u8]) -> Result<ProviderResult, ProviderError> {
        let mut result = self.service.analyze(document, &self.model_id)?;
        result.provider = ProviderName::Custom;

        if !result.success {
            let reason = result
                .error
                .clone()
                .unwrap_or_else(|| "custom model returned no result".to_string());
            return Err(ProviderError::Unsuccessful(reason));
        }

        // Document-level confidence defaults to the mean field confidence
        if result.confidence.is_none() && !result.fields.is_empty() {
            let sum: f32 = result.fields.values().map(|f| f.confidence).sum();
            result.confidence = Some(sum / result.fields.len() as f32);
        }

        tracing::info!(
            model_id = %self.model_id,
            fields = result.fields.len(),
            tables = result.tables.len(),
            "Custom model extraction succeeded"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::pipeline::providers::mock::{custom_result, MockDocumentService};
    use crate::pipeline::providers::Table;

    #[test]
    fn passes_model_id() {
        let mock = MockDocumentService::succeeding(custom_result(&[]));
        let adapter = CustomModelAdapter::new(Box::new(mock.clone()), "catering-tender-v2");
        adapter.run(b"%PDF").result.unwrap();
        assert_eq!(mock.model_ids(), ["catering-tender-v2"]);
    }

    #[test]
    fn unsuccessful_flag_is_a_failure_even_with_tables() {
        let mut result = custom_result(&[("ikn", json!("2025/1"), 0.9)]);
        result.success = false;
        result.tables.push(Table::default());
        let adapter =
            CustomModelAdapter::new(Box::new(MockDocumentService::succeeding(result)), "m")
                .with_retry_delay(Duration::ZERO);
        let err = adapter.run(b"%PDF").result.unwrap_err();
        assert!(matches!(err, ProviderError::Unsuccessful(_)));
    }

    #[test]
    fn service_error_propagates_after_retry() {
        let mock = MockDocumentService::failing("HTTP 500");
        let adapter = CustomModelAdapter::new(Box::new(mock.clone()), "m")
            .with_retry_delay(Duration::ZERO);
        let attempted = adapter.run(b"%PDF");
        assert!(attempted.result.is_err());
        assert_eq!(attempted.calls, 2);
        assert_eq!(mock.calls(), 2);
    }

    #[test]
    fn transient_failure_then_success() {
        let mock = MockDocumentService::flaky("Service unavailable", custom_result(&[]));
        let adapter = CustomModelAdapter::new(Box::new(mock.clone()), "m")
            .with_retry_delay(Duration::ZERO);
        let attempted = adapter.run(b"%PDF");
        assert!(attempted.result.is_ok());
        assert_eq!(attempted.calls, 2);
    }

    #[test]
    fn fatal_failure_is_not_retried() {
        let mock = MockDocumentService::failing("Your credit balance is too low");
        let adapter = CustomModelAdapter::new(Box::new(mock.clone()), "m");
        assert_eq!(adapter.run(b"%PDF").calls, 1);
        assert_eq!(mock.calls(), 1);
    }

    #[test]
    fn mean_confidence_is_filled_in() {
        let result = custom_result(&[
            ("ikn", json!("2025/1"), 0.9),
            ("idare", json!("Belediye"), 0.5),
        ]);
        let adapter =
            CustomModelAdapter::new(Box::new(MockDocumentService::succeeding(result)), "m");
        let out = adapter.run(b"%PDF").result.unwrap();
        assert!((out.confidence.unwrap() - 0.7).abs() < 1e-6);
    }
}
