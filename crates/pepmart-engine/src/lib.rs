pub mod assemble;
pub mod enhance;
pub mod fallback;
pub mod features;
pub mod inference;
pub mod prompt;
pub mod providers;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use image::DynamicImage;
use indexmap::IndexMap;
use pepmart_contracts::catalog::StyleCatalog;
use pepmart_contracts::errors::{ErrorKind, ExhaustionReport, PipelineError};
use pepmart_contracts::features::{FeatureProfile, FeatureThresholds};
use pepmart_contracts::prompts::PromptBundle;
use pepmart_contracts::providers::{NamedProvider, ProviderRegistry};
use pepmart_contracts::request::GenerationRequest;
use pepmart_contracts::result::GenerationResult;
use tracing::Instrument;

use crate::assemble::{assemble, assemble_rejection, encode_png, AssemblyContext};
use crate::fallback::{FallbackController, FallbackOutcome};
use crate::inference::{InferenceBoundary, InferenceJob};
use crate::providers::{Availability, ProviderDescriptor};

pub const DEFAULT_PREVIEW_EDGE: u32 = 512;

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub workers: usize,
    pub preview_edge: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            preview_edge: DEFAULT_PREVIEW_EDGE,
        }
    }
}

/// Service-lifetime state: catalog, thresholds, the provider chain and the worker pool.
/// Built once at startup and shared by every request.
pub struct Pipeline {
    catalog: Arc<StyleCatalog>,
    thresholds: FeatureThresholds,
    providers: ProviderRegistry<ProviderDescriptor>,
    boundary: InferenceBoundary,
    preview_edge: u32,
}

struct Prepared {
    original: DynamicImage,
    features: Option<FeatureProfile>,
    prompts: PromptBundle,
    job: InferenceJob,
}

impl Pipeline {
    pub fn new(
        catalog: StyleCatalog,
        thresholds: FeatureThresholds,
        providers: ProviderRegistry<ProviderDescriptor>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            catalog: Arc::new(catalog),
            thresholds,
            providers,
            boundary: InferenceBoundary::new(config.workers),
            preview_edge: config.preview_edge,
        }
    }

    pub fn catalog(&self) -> &StyleCatalog {
        &self.catalog
    }

    pub fn providers(&self) -> &ProviderRegistry<ProviderDescriptor> {
        &self.providers
    }

    /// Probes every provider once so the first request does not pay for it.
    pub async fn warm_up(&self) -> Vec<(String, Availability)> {
        let mut report = Vec::with_capacity(self.providers.len());
        for descriptor in self.providers.providers() {
            let availability = descriptor.availability().await.clone();
            report.push((descriptor.name().to_string(), availability));
        }
        let available = report
            .iter()
            .filter(|(_, availability)| availability.is_available())
            .count();
        tracing::info!(providers = report.len(), available, "provider warm-up finished");
        report
    }

    /// Highest-priority provider whose probe succeeded.
    pub async fn active_provider(&self) -> Option<String> {
        for descriptor in self.providers.providers() {
            if descriptor.availability().await.is_available() {
                return Some(descriptor.name().to_string());
            }
        }
        None
    }

    /// Only input decoding and provider exhaustion surface as errors.
    pub async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationResult, PipelineError> {
        let result = self.generate_result(request).await;
        if result.success {
            return Ok(result);
        }
        match result.error_kind {
            Some(ErrorKind::InputDecodeError) => {
                Err(PipelineError::InputDecode(result.error.unwrap_or_default()))
            }
            _ => Err(PipelineError::AllProvidersExhausted(ExhaustionReport {
                attempts: result.attempts,
            })),
        }
    }

    /// Same as [`Pipeline::generate`] but always returns a record, with `success = false`
    /// on failure.
    pub async fn generate_result(&self, request: &GenerationRequest) -> GenerationResult {
        let request_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("generate", %request_id, art_style = %request.art_style);
        self.run_request(request).instrument(span).await
    }

    async fn run_request(&self, request: &GenerationRequest) -> GenerationResult {
        let started = Instant::now();
        let prepared = match self.prepare(request).await {
            Ok(prepared) => prepared,
            Err(err) => {
                tracing::warn!(error = %err, "rejecting request");
                return assemble_rejection(&err, elapsed_ms(started));
            }
        };
        tracing::debug!(
            source = %prepared.job.source_id(),
            width = prepared.job.width,
            height = prepared.job.height,
            "request prepared"
        );
        if let Some(profile) = prepared.features.as_ref() {
            tracing::info!(
                coat_color = %profile.coat_color,
                texture = %profile.texture,
                "feature profile computed"
            );
        }

        let mut controller = FallbackController::new(&self.providers, &self.boundary);
        let outcome = controller.run(&prepared.job).await;
        let outcome = match outcome {
            FallbackOutcome::Succeeded(mut success) => {
                success.image = self.enhance_off_thread(success.image, &request.art_style).await;
                FallbackOutcome::Succeeded(success)
            }
            exhausted => exhausted,
        };

        let art_style = self
            .catalog
            .resolve_style(&request.art_style)
            .map(|(key, _)| key)
            .unwrap_or(request.art_style.as_str());
        let context = AssemblyContext {
            art_style,
            cuteness_level: resolved_key(
                &self.catalog.cuteness,
                &request.cuteness_level,
                &self.catalog.default_cuteness,
            ),
            color_palette: resolved_key(
                &self.catalog.palettes,
                &request.color_palette,
                &self.catalog.default_palette,
            ),
            prompts: &prepared.prompts,
            features: prepared.features.as_ref(),
            preview_edge: self.preview_edge,
        };
        let result = assemble(outcome, &context, &prepared.original, elapsed_ms(started));
        tracing::info!(
            success = result.success,
            provider = result.provider_used.as_deref().unwrap_or("none"),
            elapsed_ms = result.elapsed_ms,
            "generation finished"
        );
        result
    }

    /// Decode, analyse and build prompts. CPU-bound, so it runs on the blocking pool.
    async fn prepare(&self, request: &GenerationRequest) -> Result<Prepared, PipelineError> {
        let bytes = request.image.clone();
        let use_features = request.custom_prompt_text().is_none();
        let thresholds = self.thresholds.clone();
        let decoded = tokio::task::spawn_blocking(move || -> Result<_> {
            let original = image::load_from_memory(&bytes).context("unsupported or corrupt image")?;
            let features = use_features.then(|| features::extract(&original, &thresholds));
            let source_png = encode_png(&original)?;
            Ok((original, features, source_png))
        })
        .await
        .map_err(|err| PipelineError::InputDecode(format!("decode worker crashed: {err}")))?
        .map_err(|err| PipelineError::InputDecode(error_chain_text(&err, 512)))?;

        let (original, features, source_png) = decoded;
        let prompts = prompt::synthesize(&self.catalog, request, features.as_ref());
        let job = InferenceJob::new(
            source_png,
            original.width(),
            original.height(),
            prompts.clone(),
            request.tuning.clone(),
        );
        Ok(Prepared {
            original,
            features,
            prompts,
            job,
        })
    }

    async fn enhance_off_thread(&self, image: DynamicImage, art_style: &str) -> DynamicImage {
        let catalog = Arc::clone(&self.catalog);
        let art_style = art_style.to_string();
        let fallback = image.clone();
        match tokio::task::spawn_blocking(move || enhance::enhance(&image, &art_style, &catalog))
            .await
        {
            Ok(enhanced) => enhanced,
            Err(err) => {
                tracing::warn!(error = %err, "enhancement worker crashed; returning provider output");
                fallback
            }
        }
    }
}

fn resolved_key<'a>(
    table: &IndexMap<String, String>,
    key: &'a str,
    default_key: &'a str,
) -> &'a str {
    if table.contains_key(key) {
        key
    } else {
        default_key
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Distinct, non-empty messages of the chain, outermost first.
pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut causes = err
        .chain()
        .map(|cause| cause.to_string().trim().to_string())
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>();
    causes.dedup();
    let text = if causes.is_empty() {
        err.to_string()
    } else {
        causes.join(" | caused by: ")
    };
    truncate_text(&text, max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &value[..cut]),
        None => value.to_string(),
    }
}
