//! # Lookup Error Types Module
//!
//! This module defines the error type shared by every stage of the nutrition
//! lookup pipeline: configuration, data sources, the model dispatcher and the
//! serving conversion engine.

use thiserror::Error;

/// Errors raised while resolving foods or converting servings
#[derive(Debug, Clone, Error)]
pub enum LookupError {
    /// Provider credentials or settings are missing or invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Caller supplied an unusable value
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A data source could not be reached or returned an unreadable payload
    #[error("{service} unavailable: {detail}")]
    UpstreamUnavailable { service: String, detail: String },

    /// A data source answered with a non-success HTTP status
    #[error("{service} returned HTTP {status}: {detail}")]
    UpstreamStatus {
        service: String,
        status: u16,
        detail: String,
    },

    /// An outbound call exceeded its time bound
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Network level failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// The provider rejected the model identifier itself
    #[error("Model {model} unavailable: {detail}")]
    ModelUnavailable { model: String, detail: String },

    /// The provider rejected the request for a reason unrelated to the model
    #[error("Provider request failed ({status}) at {url}: {detail}")]
    ProviderRequest {
        status: u16,
        url: String,
        detail: String,
    },

    /// Model output could not be parsed into the required structure
    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    /// Units cannot be reconciled, deterministically or with model help
    #[error("Conversion impossible: {0}")]
    ConversionImpossible(String),

    /// No candidate model produced a response and none reported a failure
    #[error("Model request failed: no candidate models available")]
    DispatchFailed,
}

impl LookupError {
    /// Whether retrying the same call later could plausibly succeed
    ///
    /// Network failures, timeouts, throttling (429) and server errors (5xx)
    /// are transient. Configuration problems, bad input, malformed payloads
    /// and client errors are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            LookupError::Timeout(_)
            | LookupError::Transport(_)
            | LookupError::UpstreamUnavailable { .. } => true,
            LookupError::UpstreamStatus { status, .. }
            | LookupError::ProviderRequest { status, .. } => {
                *status == 429 || *status >= 500
            }
            _ => false,
        }
    }

    pub(crate) fn upstream(service: &str, detail: impl Into<String>) -> Self {
        LookupError::UpstreamUnavailable {
            service: service.to_string(),
            detail: detail.into(),
        }
    }
}

impl From<reqwest::Error> for LookupError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LookupError::Timeout(err.to_string())
        } else {
            LookupError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for LookupError {
    fn from(err: serde_json::Error) -> Self {
        LookupError::MalformedResponse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(LookupError::Timeout("slow".into()).is_transient());
        assert!(LookupError::Transport("reset".into()).is_transient());
        assert!(LookupError::UpstreamStatus {
            service: "Open Food Facts".into(),
            status: 503,
            detail: String::new(),
        }
        .is_transient());
        assert!(LookupError::UpstreamStatus {
            service: "Open Food Facts".into(),
            status: 429,
            detail: String::new(),
        }
        .is_transient());

        assert!(!LookupError::UpstreamStatus {
            service: "Open Food Facts".into(),
            status: 400,
            detail: String::new(),
        }
        .is_transient());
        assert!(!LookupError::Configuration("no key".into()).is_transient());
        assert!(!LookupError::MalformedResponse("bad".into()).is_transient());
    }

    #[test]
    fn test_display_messages() {
        let err = LookupError::ModelUnavailable {
            model: "gpt-5-mini".into(),
            detail: "model_not_found".into(),
        };
        assert_eq!(err.to_string(), "Model gpt-5-mini unavailable: model_not_found");

        let err = LookupError::ConversionImpossible("use the serving unit".into());
        assert!(err.to_string().contains("use the serving unit"));
    }
}
