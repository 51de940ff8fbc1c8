use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use pepmart_contracts::errors::ProviderError;
use serde_json::{json, Value};

use super::{
    api_base_from_env, non_empty_env, response_json_or_error, Availability, ImageProvider,
    InvocationRequest, LazyHttp, RawProviderResult,
};

const DEFAULT_VISION_API_BASE: &str = "https://ark.cn-beijing.volces.com/api/v3";
const DEFAULT_GUIDANCE_SCALE: f64 = 5.5;

/// Hosted multimodal image-to-image model behind an OpenAI-compatible images endpoint.
/// It takes no negative prompt.
pub struct VisionProvider {
    api_base: String,
    http: LazyHttp,
}

impl VisionProvider {
    pub fn new() -> Self {
        Self {
            api_base: api_base_from_env("PEPMART_VISION_API_BASE", DEFAULT_VISION_API_BASE),
            http: LazyHttp::default(),
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("VOLCENGINE_API_KEY")
    }

    fn endpoint_id() -> Option<String> {
        non_empty_env("DOUBAO_ENDPOINT_ID")
    }

    fn payload(model: &str, request: &InvocationRequest) -> Value {
        let image = BASE64.encode(request.source_png.as_slice());
        let mut payload = json!({
            "model": model,
            "prompt": request.positive_prompt,
            "image": format!("data:image/png;base64,{image}"),
            "response_format": "b64_json",
            "size": "adaptive",
            "guidance_scale": request.guidance_scale.unwrap_or(DEFAULT_GUIDANCE_SCALE),
            "watermark": false,
        });
        if let (Some(seed), Some(map)) = (request.seed, payload.as_object_mut()) {
            map.insert("seed".to_string(), Value::Number(seed.into()));
        }
        payload
    }
}

impl Default for VisionProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Accepts `data[0].b64_json` or `data[0].url`; an `error` object is a provider failure.
fn extract_image_item(payload: &Value) -> Result<RawProviderResult> {
    if let Some(message) = payload
        .get("error")
        .and_then(|error| error.get("message").or(Some(error)))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        return Err(ProviderError::InferenceFailure(format!("vision error: {message}")).into());
    }
    let item = payload
        .get("data")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
        .and_then(Value::as_object);
    let Some(item) = item else {
        return Err(ProviderError::ResponseMalformed(
            "vision response missing data[0]".to_string(),
        )
        .into());
    };
    let field = |key: &str| {
        item.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    if let Some(b64) = field("b64_json") {
        return Ok(RawProviderResult::Base64(b64));
    }
    if let Some(url) = field("url") {
        return Ok(RawProviderResult::Url(url));
    }
    Err(ProviderError::ResponseMalformed(
        "vision response missing data[0].b64_json or data[0].url".to_string(),
    )
    .into())
}

impl ImageProvider for VisionProvider {
    fn name(&self) -> &str {
        "vision"
    }

    fn probe(&self) -> Availability {
        if Self::api_key().is_none() {
            return Availability::Unavailable("VOLCENGINE_API_KEY not set".to_string());
        }
        if Self::endpoint_id().is_none() {
            return Availability::Unavailable("DOUBAO_ENDPOINT_ID not set".to_string());
        }
        Availability::Available
    }

    fn invoke(&self, request: &InvocationRequest) -> Result<RawProviderResult> {
        let (Some(api_key), Some(model)) = (Self::api_key(), Self::endpoint_id()) else {
            return Err(ProviderError::Unavailable(
                "VOLCENGINE_API_KEY or DOUBAO_ENDPOINT_ID not set".to_string(),
            )
            .into());
        };
        let endpoint = format!("{}/images/generations", self.api_base);
        let response = self
            .http
            .get()?
            .post(&endpoint)
            .bearer_auth(&api_key)
            .timeout(request.timeout)
            .json(&Self::payload(&model, request))
            .send()
            .with_context(|| format!("vision request failed ({endpoint})"))?;
        let payload = response_json_or_error("vision", response)?;
        extract_image_item(&payload)
    }
}

#[cfg(test)]
mod tests {
    use pepmart_contracts::errors::ProviderError;
    use serde_json::json;

    use super::extract_image_item;
    use crate::providers::RawProviderResult;

    fn provider_error(err: anyhow::Error) -> Option<ProviderError> {
        err.downcast_ref::<ProviderError>().cloned()
    }

    #[test]
    fn extracts_inline_payload_before_url() -> anyhow::Result<()> {
        let payload = json!({"data": [{"b64_json": "aGk=", "url": "https://cdn/x.png"}]});
        assert_eq!(
            extract_image_item(&payload)?,
            RawProviderResult::Base64("aGk=".to_string())
        );
        let payload = json!({"data": [{"url": " https://cdn/x.png "}]});
        assert_eq!(
            extract_image_item(&payload)?,
            RawProviderResult::Url("https://cdn/x.png".to_string())
        );
        Ok(())
    }

    #[test]
    fn missing_payload_is_malformed_and_error_object_is_failure() {
        let err = extract_image_item(&json!({"data": []})).err().and_then(provider_error);
        assert!(matches!(err, Some(ProviderError::ResponseMalformed(_))));

        let err = extract_image_item(&json!({"data": [{"revised_prompt": "x"}]}))
            .err()
            .and_then(provider_error);
        assert!(matches!(err, Some(ProviderError::ResponseMalformed(_))));

        let err = extract_image_item(&json!({"error": {"message": "quota exceeded"}}))
            .err()
            .and_then(provider_error);
        assert_eq!(
            err,
            Some(ProviderError::InferenceFailure(
                "vision error: quota exceeded".to_string()
            ))
        );
    }
}
