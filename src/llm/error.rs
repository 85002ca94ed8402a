// src/llm/error.rs
//! Error types crossing the LLM core boundary.
//!
//! `ProviderError` stays inside the core: it is converted into key-health state
//! and never surfaced to callers. `EnrichmentFailure` is the only failure type
//! `enrich` returns.

use serde::Serialize;
use thiserror::Error;

/// A single failed provider call. The `Display` text is what the health
/// tracker inspects for permanent-disable patterns, so it keeps the provider's
/// own error body where one exists.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("timeout after {0}s")]
    Timeout(u64),
    #[error("empty response from provider")]
    EmptyResponse,
    #[error("undecodable provider envelope: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Rate limits and 5xx are worth trying again on another key.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Transport(_) | ProviderError::Timeout(_) => true,
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            ProviderError::EmptyResponse | ProviderError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ProviderError::Decode(e.to_string())
        } else {
            ProviderError::Transport(e.to_string())
        }
    }
}

/// Terminal outcome of one `enrich` call.
#[derive(Debug, Clone, Error, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum EnrichmentFailure {
    /// No family had a serviceable credential; not a single call was made.
    #[error("no credentials available in any provider family")]
    NoCredentialsAvailable,
    /// Calls were attempted and every one of them failed.
    #[error("all providers exhausted after {attempts} attempts")]
    AllProvidersExhausted {
        attempts: u32,
        last_error: Option<String>,
    },
    /// A provider answered, but the answer did not pass validation.
    #[error("response from {family} failed validation: {}", issues.join(", "))]
    ValidationFailed { family: String, issues: Vec<String> },
}

impl EnrichmentFailure {
    pub fn reason_code(&self) -> &'static str {
        match self {
            EnrichmentFailure::NoCredentialsAvailable => "no_credentials_available",
            EnrichmentFailure::AllProvidersExhausted { .. } => "all_providers_exhausted",
            EnrichmentFailure::ValidationFailed { .. } => "validation_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_codes_are_stable() {
        assert_eq!(
            EnrichmentFailure::NoCredentialsAvailable.reason_code(),
            "no_credentials_available"
        );
        let exhausted = EnrichmentFailure::AllProvidersExhausted {
            attempts: 3,
            last_error: None,
        };
        assert_eq!(exhausted.reason_code(), "all_providers_exhausted");
        let invalid = EnrichmentFailure::ValidationFailed {
            family: "groq".into(),
            issues: vec!["summary empty".into()],
        };
        assert_eq!(invalid.reason_code(), "validation_failed");
        assert!(invalid.to_string().contains("summary empty"));
    }

    #[test]
    fn failure_serializes_with_reason_tag() {
        let v = serde_json::to_value(EnrichmentFailure::NoCredentialsAvailable).unwrap();
        assert_eq!(v["reason"], "no_credentials_available");
    }

    #[test]
    fn status_errors_keep_provider_body() {
        let e = ProviderError::Status {
            status: 402,
            body: "payment required: account delinquent".into(),
        };
        assert_eq!(e.to_string(), "HTTP 402: payment required: account delinquent");
        assert!(!e.is_transient());
        assert!(ProviderError::Status {
            status: 429,
            body: String::new()
        }
        .is_transient());
    }
}
