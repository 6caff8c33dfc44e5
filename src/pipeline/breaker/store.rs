use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{is_transient_store_fault, BreakerDecision};
use crate::config::STORE_FAILURE_THRESHOLD;

/// Observable state of the store breaker.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreBreakerState {
    pub consecutive_timeouts: u32,
    /// Wall-clock end of the active pause, if any.
    pub paused_until: Option<DateTime<Utc>>,
    pub total_pauses: u64,
    pub skipped_queries: u64,
}

#[derive(Debug, Default)]
struct Inner {
    consecutive_timeouts: u32,
    paused_until: Option<Instant>,
    total_pauses: u64,
    skipped_queries: u64,
}

/// Short, self-healing pause for a flapping store.
///
/// Three consecutive transient faults open it for `pause`; the next `check()`
/// after the window elapses closes it again. There is no background timer.
pub struct StoreBreaker {
    pause: Duration,
    inner: Mutex<Inner>,
}

impl StoreBreaker {
    pub fn new(pause: Duration) -> Self {
        Self {
            pause,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn check(&self) -> BreakerDecision {
        let mut inner = self.lock();
        let Some(until) = inner.paused_until else {
            return BreakerDecision::allow();
        };

        let now = Instant::now();
        if now >= until {
            inner.paused_until = None;
            inner.consecutive_timeouts = 0;
            tracing::info!("Store breaker closed: pause window elapsed");
            return BreakerDecision::allow();
        }

        inner.skipped_queries += 1;
        let remaining = until - now;
        BreakerDecision::deny(format!(
            "store paused after repeated timeouts, {}ms remaining",
            remaining.as_millis()
        ))
    }

    /// Report a failed store operation. Returns `true` if this report opened the breaker.
    ///
    /// Faults of another class break the streak instead of extending it.
    pub fn report(&self, error: &dyn fmt::Display) -> bool {
        let message = error.to_string();
        let mut inner = self.lock();

        if !is_transient_store_fault(&message) {
            inner.consecutive_timeouts = 0;
            return false;
        }

        inner.consecutive_timeouts += 1;
        if inner.consecutive_timeouts >= STORE_FAILURE_THRESHOLD && inner.paused_until.is_none() {
            inner.paused_until = Some(Instant::now() + self.pause);
            inner.total_pauses += 1;
            tracing::warn!(
                consecutive = inner.consecutive_timeouts,
                pause_ms = self.pause.as_millis() as u64,
                error = %message,
                "Store breaker opened"
            );
            return true;
        }
        false
    }

    /// Any clean operation resets the streak.
    pub fn report_success(&self) {
        self.lock().consecutive_timeouts = 0;
    }

    pub fn snapshot(&self) -> StoreBreakerState {
        let inner = self.lock();
        let paused_until = inner.paused_until.map(|until| {
            let remaining = until.saturating_duration_since(Instant::now());
            Utc::now() + chrono::Duration::from_std(remaining).unwrap_or_default()
        });
        StoreBreakerState {
            consecutive_timeouts: inner.consecutive_timeouts,
            paused_until,
            total_pauses: inner.total_pauses,
            skipped_queries: inner.skipped_queries,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    const TIMEOUT: &str = "Query read timeout";

    #[test]
    fn new_breaker_allows() {
        let breaker = StoreBreaker::new(Duration::from_secs(30));
        assert!(breaker.check().allowed);
    }

    #[test]
    fn opens_after_exactly_three_timeouts() {
        let breaker = StoreBreaker::new(Duration::from_secs(30));
        assert!(!breaker.report(&TIMEOUT));
        assert!(!breaker.report(&TIMEOUT));
        assert!(breaker.check().allowed);
        assert!(breaker.report(&TIMEOUT));

        let decision = breaker.check();
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("remaining"));

        let state = breaker.snapshot();
        assert_eq!(state.total_pauses, 1);
        assert_eq!(state.skipped_queries, 1);
        assert!(state.paused_until.is_some());
    }

    #[test]
    fn heals_lazily_after_pause() {
        let breaker = StoreBreaker::new(Duration::from_millis(20));
        for _ in 0..3 {
            breaker.report(&TIMEOUT);
        }
        assert!(!breaker.check().allowed);

        thread::sleep(Duration::from_millis(40));

        assert!(breaker.check().allowed);
        let state = breaker.snapshot();
        assert_eq!(state.consecutive_timeouts, 0);
        assert!(state.paused_until.is_none());
        assert_eq!(state.total_pauses, 1);
    }

    #[test]
    fn different_fault_resets_streak() {
        let breaker = StoreBreaker::new(Duration::from_secs(30));
        breaker.report(&TIMEOUT);
        breaker.report(&TIMEOUT);
        assert!(!breaker.report(&"duplicate key value violates unique constraint"));
        assert_eq!(breaker.snapshot().consecutive_timeouts, 0);
        assert!(!breaker.report(&TIMEOUT));
        assert!(breaker.check().allowed);
    }

    #[test]
    fn success_resets_streak() {
        let breaker = StoreBreaker::new(Duration::from_secs(30));
        breaker.report(&TIMEOUT);
        breaker.report(&TIMEOUT);
        breaker.report_success();
        assert!(!breaker.report(&TIMEOUT));
        assert!(breaker.check().allowed);
    }

    #[test]
    fn reports_while_paused_do_not_extend_pause() {
        let breaker = StoreBreaker::new(Duration::from_secs(30));
        for _ in 0..3 {
            breaker.report(&TIMEOUT);
        }
        assert!(!breaker.report(&TIMEOUT));
        assert_eq!(breaker.snapshot().total_pauses, 1);
    }
}
