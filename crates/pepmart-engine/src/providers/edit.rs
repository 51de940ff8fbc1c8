use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use pepmart_contracts::errors::ProviderError;
use serde_json::{json, Value};

use super::{
    api_base_from_env, non_empty_env, Availability, ImageProvider, InvocationRequest, LazyHttp,
    RawProviderResult,
};
use crate::truncate_text;

const DEFAULT_EDIT_API_BASE: &str =
    "https://api-inference.huggingface.co/models/black-forest-labs/FLUX.1-Kontext-dev";
const DEFAULT_GUIDANCE_SCALE: f64 = 3.5;
const DEFAULT_STEPS: u32 = 28;
const DEFAULT_STRENGTH: f64 = 0.8;

/// Hosted instruction-guided image edit model. Responds with raw image bytes.
pub struct EditProvider {
    api_base: String,
    http: LazyHttp,
}

impl EditProvider {
    pub fn new() -> Self {
        Self {
            api_base: api_base_from_env("PEPMART_EDIT_API_BASE", DEFAULT_EDIT_API_BASE),
            http: LazyHttp::default(),
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("HF_TOKEN").or_else(|| non_empty_env("HUGGING_FACE_TOKEN"))
    }

    fn payload(request: &InvocationRequest) -> Value {
        let mut parameters = json!({
            "image": BASE64.encode(request.source_png.as_slice()),
            "guidance_scale": request.guidance_scale.unwrap_or(DEFAULT_GUIDANCE_SCALE),
            "num_inference_steps": request.steps.unwrap_or(DEFAULT_STEPS),
            "strength": request.strength.unwrap_or(DEFAULT_STRENGTH),
            "negative_prompt": request.negative_prompt,
        });
        if let (Some(seed), Some(map)) = (request.seed, parameters.as_object_mut()) {
            map.insert("seed".to_string(), Value::Number(seed.into()));
        }
        json!({
            "inputs": request.positive_prompt,
            "parameters": parameters,
        })
    }
}

impl Default for EditProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageProvider for EditProvider {
    fn name(&self) -> &str {
        "edit"
    }

    fn probe(&self) -> Availability {
        match Self::api_key() {
            Some(_) => Availability::Available,
            None => Availability::Unavailable("HF_TOKEN not set".to_string()),
        }
    }

    fn invoke(&self, request: &InvocationRequest) -> Result<RawProviderResult> {
        let Some(api_key) = Self::api_key() else {
            return Err(ProviderError::Unavailable("HF_TOKEN not set".to_string()).into());
        };
        let response = self
            .http
            .get()?
            .post(&self.api_base)
            .bearer_auth(&api_key)
            .header("Accept", "image/png")
            .timeout(request.timeout)
            .json(&Self::payload(request))
            .send()
            .with_context(|| format!("edit request failed ({})", self.api_base))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_ascii_lowercase())
            .unwrap_or_default();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ProviderError::InferenceFailure(format!(
                "edit request failed ({}): {}",
                status.as_u16(),
                truncate_text(&body, 512)
            ))
            .into());
        }
        if !content_type.starts_with("image/") {
            let body = response.text().unwrap_or_default();
            return Err(ProviderError::ResponseMalformed(format!(
                "edit returned '{content_type}' instead of an image: {}",
                truncate_text(&body, 256)
            ))
            .into());
        }
        let bytes = response
            .bytes()
            .context("failed reading edit image bytes")?
            .to_vec();
        if bytes.is_empty() {
            return Err(
                ProviderError::ResponseMalformed("edit returned an empty image".to_string()).into(),
            );
        }
        Ok(RawProviderResult::Binary(bytes))
    }
}
