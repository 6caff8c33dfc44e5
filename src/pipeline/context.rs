use std::sync::Arc;

use serde::Serialize;

use super::breaker::{ExternalBreaker, ExternalBreakerState, StoreBreaker, StoreBreakerState};
use crate::config::PipelineConfig;

/// Process-wide state shared by every run: configuration and both breakers.
///
/// Cheap to clone. Clones share the same breakers, so a fault observed by one
/// run gates the next check of every other run.
#[derive(Clone)]
pub struct PipelineContext {
    pub config: PipelineConfig,
    pub external: Arc<ExternalBreaker>,
    pub store: Arc<StoreBreaker>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub external: ExternalBreakerState,
    pub store: StoreBreakerState,
}

impl PipelineContext {
    pub fn new(config: PipelineConfig) -> Self {
        let store = Arc::new(StoreBreaker::new(config.store_pause));
        Self {
            config,
            external: Arc::new(ExternalBreaker::new()),
            store,
        }
    }

    pub fn from_env() -> Self {
        Self::new(PipelineConfig::from_env())
    }

    pub fn breaker_status(&self) -> BreakerStatus {
        BreakerStatus {
            external: self.external.snapshot(),
            store: self.store.snapshot(),
        }
    }

    /// Operator action after a billing/quota fault has been resolved.
    pub fn reset_external(&self) {
        self.external.reset();
    }
}
