use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::result::ProviderAttempt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InputDecodeError,
    ProviderUnavailable,
    ProviderTimeout,
    ProviderResponseMalformed,
    InferenceFailure,
    AllProvidersExhausted,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InputDecodeError => "input_decode_error",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::ProviderTimeout => "provider_timeout",
            Self::ProviderResponseMalformed => "provider_response_malformed",
            Self::InferenceFailure => "inference_failure",
            Self::AllProvidersExhausted => "all_providers_exhausted",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single provider attempt. Always recovered by the fallback controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("provider timed out: {0}")]
    Timeout(String),

    #[error("provider response malformed: {0}")]
    ResponseMalformed(String),

    #[error("inference failed: {0}")]
    InferenceFailure(String),
}

impl ProviderError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable(_) => ErrorKind::ProviderUnavailable,
            Self::Timeout(_) => ErrorKind::ProviderTimeout,
            Self::ResponseMalformed(_) => ErrorKind::ProviderResponseMalformed,
            Self::InferenceFailure(_) => ErrorKind::InferenceFailure,
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Unavailable(reason)
            | Self::Timeout(reason)
            | Self::ResponseMalformed(reason)
            | Self::InferenceFailure(reason) => reason.as_str(),
        }
    }
}

/// Every provider the controller considered, with the reason each one did not succeed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExhaustionReport {
    pub attempts: Vec<ProviderAttempt>,
}

impl fmt::Display for ExhaustionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.attempts.is_empty() {
            return f.write_str("all providers exhausted: no providers configured");
        }
        let parts = self
            .attempts
            .iter()
            .map(|attempt| {
                let kind = attempt
                    .error_kind
                    .map(|kind| kind.as_str())
                    .unwrap_or("unknown");
                let reason = attempt.reason.as_deref().unwrap_or("no reason recorded");
                format!("{} ({kind}): {reason}", attempt.provider)
            })
            .collect::<Vec<String>>();
        write!(f, "all providers exhausted: {}", parts.join("; "))
    }
}

#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("input image could not be decoded: {0}")]
    InputDecode(String),

    #[error("{0}")]
    AllProvidersExhausted(ExhaustionReport),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InputDecode(_) => ErrorKind::InputDecodeError,
            Self::AllProvidersExhausted(_) => ErrorKind::AllProvidersExhausted,
        }
    }
}
