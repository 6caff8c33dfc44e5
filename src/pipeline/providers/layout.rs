use std::time::Duration;

use super::types::{LayoutService, ProviderName, ProviderResult};
use super::{retry_once, Attempted, ProviderError};
use crate::config::DEFAULT_RETRY_DELAY;
use crate::pipeline::merge::paragraphs_text;

/// Calls the general OCR/layout service and normalizes its result.
pub struct LayoutAdapter {
    service: Box<dyn LayoutService + Send + Sync>,
    retry_delay: Duration,
}

impl LayoutAdapter {
    pub fn new(service: Box<dyn LayoutService + Send + Sync>) -> Self {
        Self {
            service,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn run(&self, document: &[u8]) -> Attempted<ProviderResult> {
        retry_once("layout", self.retry_delay, || self.attempt(document))
    }

    fn attempt(&self, document: &[u8]) -> Result<ProviderResult, ProviderError> {
        let mut result = self.service.analyze(document)?;
        result.provider = ProviderName::Layout;

        if !result.success {
            let reason = result
                .error
                .clone()
                .unwrap_or_else(|| "layout analysis returned no result".to_string());
            return Err(ProviderError::Unsuccessful(reason));
        }

        if result.text.trim().is_empty() && !result.paragraphs.is_empty() {
            result.text = paragraphs_text(&result.paragraphs);
        }

        tracing::info!(
            chars = result.text.chars().count(),
            paragraphs = result.paragraphs.len(),
            tables = result.tables.len(),
            "Layout extraction succeeded"
        );
        Ok(result)
    }
}
