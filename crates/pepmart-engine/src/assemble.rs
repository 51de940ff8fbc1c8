use std::io::Cursor;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use pepmart_contracts::errors::{ErrorKind, PipelineError};
use pepmart_contracts::features::FeatureProfile;
use pepmart_contracts::prompts::{PromptBundle, PromptSource};
use pepmart_contracts::result::GenerationResult;

use crate::fallback::FallbackOutcome;

pub struct AssemblyContext<'a> {
    pub art_style: &'a str,
    pub cuteness_level: &'a str,
    pub color_palette: &'a str,
    pub prompts: &'a PromptBundle,
    pub features: Option<&'a FeatureProfile>,
    pub preview_edge: u32,
}

/// Packages the outcome for the caller. Never fails: encoding problems become a
/// `success = false` record.
pub fn assemble(
    outcome: FallbackOutcome,
    context: &AssemblyContext<'_>,
    original: &DynamicImage,
    elapsed_ms: u64,
) -> GenerationResult {
    let original_image = match preview_data_uri(original, context.preview_edge) {
        Ok(uri) => Some(uri),
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "original preview encode failed");
            None
        }
    };
    let mut result = GenerationResult {
        success: false,
        image: None,
        image_url: None,
        original_image,
        provider_used: None,
        prompt_used: context.prompts.positive_prompt.clone(),
        negative_prompt_used: context.prompts.negative_prompt.clone(),
        prompt_source: context.prompts.source,
        elapsed_ms,
        analysis: analysis_text(context),
        features: context.features.cloned(),
        attempts: Vec::new(),
        seed_used: None,
        error: None,
        error_kind: None,
    };

    match outcome {
        FallbackOutcome::Succeeded(success) => {
            result.attempts = success.attempts;
            result.seed_used = success.seed;
            match encode_png(&success.image) {
                Ok(bytes) => {
                    result.image_url = Some(png_data_uri(&bytes));
                    result.image = Some(bytes);
                    result.provider_used = Some(success.provider);
                    result.success = true;
                }
                Err(err) => {
                    result.error = Some(format!("result image could not be encoded: {err:#}"));
                    result.error_kind = Some(ErrorKind::InferenceFailure);
                }
            }
        }
        FallbackOutcome::Exhausted(report) => {
            result.error = Some(report.to_string());
            result.error_kind = Some(ErrorKind::AllProvidersExhausted);
            result.attempts = report.attempts;
        }
    }
    result
}

/// Record for a request that failed before any provider was tried.
pub fn assemble_rejection(error: &PipelineError, elapsed_ms: u64) -> GenerationResult {
    GenerationResult {
        success: false,
        image: None,
        image_url: None,
        original_image: None,
        provider_used: None,
        prompt_used: String::new(),
        negative_prompt_used: String::new(),
        prompt_source: PromptSource::Synthesized,
        elapsed_ms,
        analysis: String::new(),
        features: None,
        attempts: Vec::new(),
        seed_used: None,
        error: Some(error.to_string()),
        error_kind: Some(error.kind()),
    }
}

fn analysis_text(context: &AssemblyContext<'_>) -> String {
    if context.prompts.source == PromptSource::Custom {
        return format!("Used custom prompt with {} style.", context.art_style);
    }
    let detected = match context.features {
        Some(profile) => match profile.lighting.as_deref() {
            Some(lighting) => format!(
                "Detected {} pet with {}, {}. ",
                profile.coat_color, profile.texture, lighting
            ),
            None => format!("Detected {} pet with {}. ", profile.coat_color, profile.texture),
        },
        None => String::new(),
    };
    format!(
        "{detected}Applied {} style with {} cuteness and {} palette.",
        context.art_style, context.cuteness_level, context.color_palette
    )
}

/// Aspect-preserving copy whose longest edge is at most `edge`. Smaller images are kept as is.
pub fn preview(image: &DynamicImage, edge: u32) -> DynamicImage {
    let edge = edge.max(1);
    if image.width().max(image.height()) <= edge {
        return image.clone();
    }
    image.resize(edge, edge, FilterType::Lanczos3)
}

pub fn preview_data_uri(image: &DynamicImage, edge: u32) -> Result<String> {
    let bytes = encode_png(&preview(image, edge))?;
    Ok(png_data_uri(&bytes))
}

pub fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("PNG encode failed")?;
    Ok(bytes)
}

fn png_data_uri(bytes: &[u8]) -> String {
    format!("data:image/png;base64,{}", BASE64.encode(bytes))
}
