use std::str::FromStr;

use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use pepmart_contracts::prompts::PromptSource;
use pepmart_contracts::request::{
    GenerationRequest, SeedSpec, Tuning, DEFAULT_ART_STYLE, DEFAULT_COLOR_PALETTE,
    DEFAULT_CUTENESS_LEVEL,
};
use pepmart_contracts::result::{GenerationResult, ProviderAttempt};
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub success: bool,
    pub image_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_image: Option<String>,
    pub generation_time: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_used: Option<String>,
    pub analysis: String,
    pub prompt_used: String,
    pub negative_prompt_used: String,
    pub prompt_source: PromptSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed_used: Option<u64>,
    pub attempts: Vec<ProviderAttempt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<GenerationResult> for GenerateResponse {
    fn from(result: GenerationResult) -> Self {
        let generation_time = result.generation_time_secs();
        Self {
            success: result.success,
            image_url: result.image_url.unwrap_or_default(),
            original_image: result.original_image,
            generation_time,
            provider_used: result.provider_used,
            analysis: result.analysis,
            prompt_used: result.prompt_used,
            negative_prompt_used: result.negative_prompt_used,
            prompt_source: result.prompt_source,
            seed_used: result.seed_used,
            attempts: result.attempts,
            error: result.error,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub models_loaded: bool,
    pub provider: String,
}

#[derive(Debug, Serialize)]
pub struct StyleDefaults {
    pub art_style: String,
    pub cuteness_level: String,
    pub color_palette: String,
}

#[derive(Debug, Serialize)]
pub struct StylesResponse {
    pub styles: Vec<String>,
    pub cuteness_levels: Vec<String>,
    pub color_palettes: Vec<String>,
    pub defaults: StyleDefaults,
}

pub async fn generate(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Json<GenerateResponse>> {
    if !state.is_ready() {
        return Err(AppError::NotReady);
    }
    let request = parse_generate_form(multipart, state.max_upload_bytes()).await?;
    tracing::info!(
        bytes = request.image.len(),
        art_style = %request.art_style,
        cuteness_level = %request.cuteness_level,
        color_palette = %request.color_palette,
        custom_prompt = request.custom_prompt_text().is_some(),
        "generate request accepted"
    );
    let result = state.pipeline().generate(&request).await?;
    Ok(Json(GenerateResponse::from(result)))
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    if !state.is_ready() {
        let body = HealthResponse {
            status: "loading",
            models_loaded: false,
            provider: "none".to_string(),
        };
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body));
    }
    let active = state.pipeline().active_provider().await;
    let body = HealthResponse {
        status: "healthy",
        models_loaded: active.is_some(),
        provider: active.unwrap_or_else(|| "none".to_string()),
    };
    (StatusCode::OK, Json(body))
}

pub async fn styles(State(state): State<AppState>) -> Json<StylesResponse> {
    let catalog = state.pipeline().catalog();
    Json(StylesResponse {
        styles: catalog.style_keys(),
        cuteness_levels: catalog.cuteness_keys(),
        color_palettes: catalog.palette_keys(),
        defaults: StyleDefaults {
            art_style: catalog.default_style.clone(),
            cuteness_level: catalog.default_cuteness.clone(),
            color_palette: catalog.default_palette.clone(),
        },
    })
}

/// Reads the upload form. Unknown fields are ignored; selection keys are trimmed and
/// lowercased, blank ones fall back to the defaults.
pub async fn parse_generate_form(
    mut multipart: Multipart,
    max_upload_bytes: usize,
) -> AppResult<GenerationRequest> {
    let mut image: Option<Vec<u8>> = None;
    let mut art_style: Option<String> = None;
    let mut cuteness_level: Option<String> = None;
    let mut color_palette: Option<String> = None;
    let mut prompt: Option<String> = None;
    let mut negative_prompt: Option<String> = None;
    let mut tuning = Tuning::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| form_error(err, max_upload_bytes))?
    {
        let name = field.name().unwrap_or("").trim().to_ascii_lowercase();
        if name == "image" {
            let data = field
                .bytes()
                .await
                .map_err(|err| form_error(err, max_upload_bytes))?;
            if data.len() > max_upload_bytes {
                return Err(AppError::PayloadTooLarge {
                    limit: max_upload_bytes,
                });
            }
            image = Some(data.to_vec());
            continue;
        }

        let text = field
            .text()
            .await
            .map_err(|err| form_error(err, max_upload_bytes))?;
        match name.as_str() {
            "art_style" => art_style = selection_key(&text),
            "cuteness_level" => cuteness_level = selection_key(&text),
            "color_palette" => color_palette = selection_key(&text),
            "prompt" => prompt = Some(text),
            "negative_prompt" => negative_prompt = Some(text),
            "strength" => tuning.strength = parse_number("strength", &text)?,
            "steps" => tuning.steps = parse_number("steps", &text)?,
            "guidance_scale" => tuning.guidance_scale = parse_number("guidance_scale", &text)?,
            "seed" => tuning.seed = parse_seed(&text)?,
            _ => {}
        }
    }

    let image = image
        .filter(|bytes| !bytes.is_empty())
        .ok_or_else(|| AppError::BadRequest("missing required 'image' field".to_string()))?;
    tuning
        .validate()
        .map_err(|err| AppError::BadRequest(err.to_string()))?;

    let mut request = GenerationRequest::new(image);
    request.art_style = art_style.unwrap_or_else(|| DEFAULT_ART_STYLE.to_string());
    request.cuteness_level = cuteness_level.unwrap_or_else(|| DEFAULT_CUTENESS_LEVEL.to_string());
    request.color_palette = color_palette.unwrap_or_else(|| DEFAULT_COLOR_PALETTE.to_string());
    request.custom_prompt = prompt;
    request.custom_negative_prompt = negative_prompt;
    request.tuning = tuning;
    Ok(request)
}

fn form_error(err: MultipartError, max_upload_bytes: usize) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return AppError::PayloadTooLarge {
            limit: max_upload_bytes,
        };
    }
    AppError::BadRequest(err.body_text())
}

fn selection_key(raw: &str) -> Option<String> {
    let key = raw.trim().to_ascii_lowercase();
    (!key.is_empty()).then_some(key)
}

fn parse_number<T: FromStr>(field: &str, raw: &str) -> AppResult<Option<T>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse::<T>()
        .map(Some)
        .map_err(|_| AppError::BadRequest(format!("invalid {field}: {trimmed:?}")))
}

fn parse_seed(raw: &str) -> AppResult<Option<SeedSpec>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    SeedSpec::parse(trimmed)
        .map(Some)
        .ok_or_else(|| AppError::BadRequest(format!("invalid seed: {trimmed:?}")))
}
