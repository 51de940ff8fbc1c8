use std::time::Duration;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use pepmart_contracts::errors::ProviderError;
use serde_json::{json, Value};

use super::{
    api_base_from_env, response_json_or_error, Availability, ImageProvider, InvocationRequest,
    LazyHttp, RawProviderResult,
};

const DEFAULT_LOCAL_API_BASE: &str = "http://127.0.0.1:7860";
const DEFAULT_STRENGTH: f64 = 0.45;
const DEFAULT_STEPS: u32 = 30;
const DEFAULT_GUIDANCE_SCALE: f64 = 7.5;
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Diffusion img2img pipeline hosted on the same machine behind a small HTTP server.
pub struct LocalProvider {
    api_base: String,
    http: LazyHttp,
}

impl LocalProvider {
    pub fn new() -> Self {
        Self::with_api_base(api_base_from_env(
            "PEPMART_LOCAL_API_BASE",
            DEFAULT_LOCAL_API_BASE,
        ))
    }

    pub fn with_api_base(api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            http: LazyHttp::default(),
        }
    }

    fn payload(request: &InvocationRequest) -> Value {
        let mut payload = json!({
            "prompt": request.positive_prompt,
            "negative_prompt": request.negative_prompt,
            "image": BASE64.encode(request.source_png.as_slice()),
            "width": request.width,
            "height": request.height,
            "strength": request.strength.unwrap_or(DEFAULT_STRENGTH),
            "num_inference_steps": request.steps.unwrap_or(DEFAULT_STEPS),
            "guidance_scale": request.guidance_scale.unwrap_or(DEFAULT_GUIDANCE_SCALE),
        });
        if let (Some(seed), Some(map)) = (request.seed, payload.as_object_mut()) {
            map.insert("seed".to_string(), Value::Number(seed.into()));
        }
        payload
    }
}

impl Default for LocalProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageProvider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn probe(&self) -> Availability {
        let client = match self.http.get() {
            Ok(client) => client,
            Err(err) => return Availability::Unavailable(format!("{err:#}")),
        };
        let endpoint = format!("{}/health", self.api_base);
        match client.get(&endpoint).timeout(PROBE_TIMEOUT).send() {
            Ok(response) if response.status().is_success() => Availability::Available,
            Ok(response) => Availability::Unavailable(format!(
                "local diffusion server not ready ({})",
                response.status().as_u16()
            )),
            Err(err) => Availability::Unavailable(format!(
                "local diffusion server unreachable at {endpoint}: {err}"
            )),
        }
    }

    fn invoke(&self, request: &InvocationRequest) -> Result<RawProviderResult> {
        let endpoint = format!("{}/v1/images/generations", self.api_base);
        let response = self
            .http
            .get()?
            .post(&endpoint)
            .timeout(request.timeout)
            .json(&Self::payload(request))
            .send()
            .with_context(|| format!("local request failed ({endpoint})"))?;
        let payload = response_json_or_error("local", response)?;
        let image = payload
            .get("image")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                ProviderError::ResponseMalformed("local response missing image field".to_string())
            })?;
        Ok(RawProviderResult::Base64(image.to_string()))
    }
}
