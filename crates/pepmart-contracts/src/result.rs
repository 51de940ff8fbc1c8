use serde::Serialize;

use crate::errors::{ErrorKind, ProviderError};
use crate::features::FeatureProfile;
use crate::prompts::PromptSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderAttempt {
    pub provider: String,
    pub outcome: AttemptOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub elapsed_ms: u64,
}

impl ProviderAttempt {
    pub fn succeeded(provider: &str, elapsed_ms: u64) -> Self {
        Self {
            provider: provider.to_string(),
            outcome: AttemptOutcome::Succeeded,
            error_kind: None,
            reason: None,
            elapsed_ms,
        }
    }

    pub fn skipped(provider: &str, reason: &str) -> Self {
        Self {
            provider: provider.to_string(),
            outcome: AttemptOutcome::Skipped,
            error_kind: Some(ErrorKind::ProviderUnavailable),
            reason: Some(reason.to_string()),
            elapsed_ms: 0,
        }
    }

    pub fn failed(provider: &str, error: &ProviderError, elapsed_ms: u64) -> Self {
        Self {
            provider: provider.to_string(),
            outcome: AttemptOutcome::Failed,
            error_kind: Some(error.kind()),
            reason: Some(error.to_string()),
            elapsed_ms,
        }
    }
}

/// Final record for one request. `image_url` and `original_image` are PNG data URIs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub success: bool,
    #[serde(skip)]
    pub image: Option<Vec<u8>>,
    pub image_url: Option<String>,
    pub original_image: Option<String>,
    pub provider_used: Option<String>,
    pub prompt_used: String,
    pub negative_prompt_used: String,
    pub prompt_source: PromptSource,
    pub elapsed_ms: u64,
    pub analysis: String,
    pub features: Option<FeatureProfile>,
    pub attempts: Vec<ProviderAttempt>,
    pub seed_used: Option<u64>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
}

impl GenerationResult {
    /// Elapsed wall time in seconds, rounded to two decimals.
    pub fn generation_time_secs(&self) -> f64 {
        round_secs(self.elapsed_ms)
    }
}

pub fn round_secs(elapsed_ms: u64) -> f64 {
    (elapsed_ms as f64 / 10.0).round() / 100.0
}
