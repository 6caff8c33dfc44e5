use std::fmt;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{is_fatal_service_fault, BreakerDecision};

/// Observable state of the external-service breaker.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExternalBreakerState {
    pub tripped: bool,
    pub reason: Option<String>,
    pub tripped_at: Option<DateTime<Utc>>,
    /// Calls refused since the last trip. Observability only.
    pub skipped_calls: u64,
}

/// Gate in front of every metered external call.
///
/// Once a billing/quota/suspension fault is reported, every later `check()`
/// refuses until `reset()`. Elapsed time never clears it.
pub struct ExternalBreaker {
    state: Mutex<ExternalBreakerState>,
}

impl ExternalBreaker {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ExternalBreakerState::default()),
        }
    }

    /// May an external call be made right now?
    pub fn check(&self) -> BreakerDecision {
        let mut state = self.lock();
        if !state.tripped {
            return BreakerDecision::allow();
        }
        state.skipped_calls += 1;
        let reason = state
            .reason
            .clone()
            .unwrap_or_else(|| "external services disabled".to_string());
        BreakerDecision::deny(format!("external breaker open: {reason}"))
    }

    /// Classify a failed call. Returns `true` when the error is fatal.
    ///
    /// The first fatal error trips the breaker; repeats keep the original
    /// reason and timestamp.
    pub fn report(&self, error: &dyn fmt::Display) -> bool {
        let message = error.to_string();
        if !is_fatal_service_fault(&message) {
            return false;
        }

        let mut state = self.lock();
        if !state.tripped {
            state.tripped = true;
            state.reason = Some(truncate_reason(&message));
            state.tripped_at = Some(Utc::now());
            state.skipped_calls = 0;
            tracing::error!(
                reason = %message,
                "External breaker tripped: billing/quota fault, external calls disabled until reset"
            );
        }
        true
    }

    /// Clear the trip. The only way back to normal operation.
    pub fn reset(&self) {
        let mut state = self.lock();
        let was_tripped = state.tripped;
        let skipped = state.skipped_calls;
        *state = ExternalBreakerState::default();
        tracing::info!(was_tripped, skipped_calls = skipped, "External breaker reset");
    }

    pub fn is_tripped(&self) -> bool {
        self.lock().tripped
    }

    pub fn snapshot(&self) -> ExternalBreakerState {
        self.lock().clone()
    }

    // State is plain data; a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, ExternalBreakerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ExternalBreaker {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate_reason(message: &str) -> String {
    message.chars().take(300).collect()
}
