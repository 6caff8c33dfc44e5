//! Process-wide fault gates for the two dependency classes the pipeline talks to.
//!
//! - [`ExternalBreaker`]: metered extraction/completion services. A billing,
//!   quota or suspension fault trips it until an operator calls `reset()`.
//! - [`StoreBreaker`]: the persistence layer. Three consecutive transient
//!   timeouts pause it for a short window; it heals itself lazily.
//!
//! Both live in [`crate::pipeline::context::PipelineContext`] behind `Arc` and
//! are shared by every concurrent run.

pub mod external;
pub mod store;

pub use external::*;
pub use store::*;

use serde::Serialize;

/// Answer of a breaker `check()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl BreakerDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }
}

/// Error text fragments of terminal billing/quota/suspension faults.
const FATAL_SERVICE_SIGNATURES: &[&str] = &[
    "credit balance",
    "billing",
    "insufficient_quota",
    "quota",
    "payment required",
    "account suspended",
    "account has been suspended",
    "subscription has expired",
    "access denied due to invalid subscription",
];

/// Error text fragments of transient store timeouts/connection drops.
const TRANSIENT_STORE_SIGNATURES: &[&str] = &[
    "timeout",
    "timed out",
    "connection terminated",
    "connection reset",
    "connection refused",
    "econnreset",
    "etimedout",
    "too many clients",
    "database is locked",
];

/// Whether an error message carries a terminal billing/quota signature.
pub fn is_fatal_service_fault(message: &str) -> bool {
    matches_any(message, FATAL_SERVICE_SIGNATURES)
}

/// Whether an error message carries a transient store signature.
pub fn is_transient_store_fault(message: &str) -> bool {
    matches_any(message, TRANSIENT_STORE_SIGNATURES)
}

fn matches_any(message: &str, signatures: &[&str]) -> bool {
    let lower = message.to_lowercase();
    signatures.iter().any(|s| lower.contains(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_signatures_match_case_insensitively() {
        assert!(is_fatal_service_fault(
            "Your credit balance is too low to access the API"
        ));
        assert!(is_fatal_service_fault("Error 429: insufficient_quota"));
        assert!(is_fatal_service_fault("BILLING HARD LIMIT REACHED"));
        assert!(is_fatal_service_fault("Account has been suspended"));
    }

    #[test]
    fn ordinary_errors_are_not_fatal() {
        assert!(!is_fatal_service_fault("connection refused"));
        assert!(!is_fatal_service_fault("HTTP 500: internal server error"));
        assert!(!is_fatal_service_fault("Malformed response"));
    }

    #[test]
    fn store_signatures() {
        assert!(is_transient_store_fault("Query read timeout"));
        assert!(is_transient_store_fault("Connection terminated unexpectedly"));
        assert!(is_transient_store_fault("ETIMEDOUT 10.0.0.3:5432"));
        assert!(!is_transient_store_fault("duplicate key value violates unique constraint"));
    }

    #[test]
    fn decision_serializes_without_empty_reason() {
        let json = serde_json::to_string(&BreakerDecision::allow()).unwrap();
        assert_eq!(json, r#"{"allowed":true}"#);
        let json = serde_json::to_string(&BreakerDecision::deny("paused")).unwrap();
        assert!(json.contains("\"reason\":\"paused\""));
    }
}
