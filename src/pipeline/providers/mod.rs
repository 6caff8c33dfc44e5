pub mod types;
pub mod parser;
pub mod prompt;
pub mod custom_model;
pub mod layout;
pub mod semantic;
pub mod docai;
pub mod messages;
pub mod local;
pub mod office;
pub mod mock;

pub use types::*;
pub use parser::*;
pub use custom_model::*;
pub use layout::*;
pub use semantic::*;
pub use docai::*;
pub use messages::*;
pub use local::*;

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("Cannot connect to {0}")]
    Connection(String),

    #[error("Request timed out after {0}s")]
    Timeout(u64),

    #[error("Service returned error (status {status}): {body}")]
    Http { status: u16, body: String },

    #[error("Provider reported failure: {0}")]
    Unsuccessful(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Response parsing error: {0}")]
    Parse(String),

    #[error("Local extraction does not support .{0}")]
    UnsupportedLocalFormat(String),

    #[error("Cannot read document: {0}")]
    DocumentRead(String),

    #[error("Semantic provider does not accept {0} attachments")]
    UnsupportedAttachment(String),

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    /// Structured-output failures, worth one fresh call.
    pub fn is_parse_failure(&self) -> bool {
        matches!(self, Self::MalformedResponse(_) | Self::Parse(_))
    }

    /// Billing/quota/suspension signature in the error text.
    pub fn is_fatal(&self) -> bool {
        crate::pipeline::breaker::is_fatal_service_fault(&self.to_string())
    }
}

/// A provider call that may have been sent twice.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, ProviderError>,
    /// Requests sent, the retry included.
    pub calls: u32,
}

/// Run `call`; a non-fatal failure gets one more try after `delay`.
pub fn retry_once<T>(
    provider: &str,
    delay: Duration,
    mut call: impl FnMut() -> Result<T, ProviderError>,
) -> Attempted<T> {
    match call() {
        Err(e) if !e.is_fatal() => {
            tracing::warn!(provider, error = %e, "Provider call failed, retrying once");
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            Attempted {
                result: call(),
                calls: 2,
            }
        }
        result => Attempted { result, calls: 1 },
    }
}

/// Map a reqwest transport error the same way for every client.
pub(crate) fn transport_error(e: reqwest::Error, target: &str, timeout_secs: u64) -> ProviderError {
    if e.is_connect() {
        ProviderError::Connection(target.to_string())
    } else if e.is_timeout() {
        ProviderError::Timeout(timeout_secs)
    } else {
        ProviderError::HttpClient(e.to_string())
    }
}
