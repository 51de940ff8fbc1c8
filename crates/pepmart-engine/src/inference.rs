use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::DynamicImage;
use pepmart_contracts::errors::ProviderError;
use pepmart_contracts::prompts::PromptBundle;
use pepmart_contracts::request::{SeedSpec, Tuning};
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;

use crate::error_chain_text;
use crate::providers::{
    ImageProvider, InvocationRequest, LazyHttp, ProviderDescriptor, RawProviderResult,
};

const SEED_MASK: u64 = 0x7fff_ffff;

/// Request-scoped inputs shared by every attempt of one request.
#[derive(Debug, Clone)]
pub struct InferenceJob {
    pub source_png: Arc<Vec<u8>>,
    pub source_digest: [u8; 32],
    pub width: u32,
    pub height: u32,
    pub prompts: PromptBundle,
    pub tuning: Tuning,
}

impl InferenceJob {
    pub fn new(
        source_png: Vec<u8>,
        width: u32,
        height: u32,
        prompts: PromptBundle,
        tuning: Tuning,
    ) -> Self {
        let source_digest: [u8; 32] = Sha256::digest(&source_png).into();
        Self {
            source_png: Arc::new(source_png),
            source_digest,
            width,
            height,
            prompts,
            tuning,
        }
    }

    /// Short hex fingerprint of the source image, for logs.
    pub fn source_id(&self) -> String {
        hex::encode(&self.source_digest[..8])
    }
}

#[derive(Debug, Clone)]
pub struct Invocation {
    pub image: DynamicImage,
    pub seed: Option<u64>,
    pub elapsed: Duration,
}

/// Bounded worker pool for blocking provider calls. With one permit, calls run strictly one
/// at a time and everything else waits in the semaphore queue.
pub struct InferenceBoundary {
    permits: Arc<Semaphore>,
    downloads: Arc<LazyHttp>,
}

impl InferenceBoundary {
    /// `workers` is clamped to `1..=Semaphore::MAX_PERMITS`.
    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.clamp(1, Semaphore::MAX_PERMITS))),
            downloads: Arc::new(LazyHttp::default()),
        }
    }

    pub fn available_workers(&self) -> usize {
        self.permits.available_permits()
    }

    /// The timeout clock starts once a worker is acquired. On timeout the worker stays
    /// occupied until the provider call returns on its own.
    pub async fn invoke(
        &self,
        descriptor: &ProviderDescriptor,
        job: &InferenceJob,
    ) -> Result<Invocation, ProviderError> {
        let provider = descriptor.provider();
        let timeout = descriptor.timeout();
        let seed = resolve_seed(job, provider.name(), provider.supports_seed());
        let request = InvocationRequest {
            source_png: Arc::clone(&job.source_png),
            width: job.width,
            height: job.height,
            positive_prompt: job.prompts.positive_prompt.clone(),
            negative_prompt: job.prompts.negative_prompt.clone(),
            strength: job.tuning.strength,
            steps: job.tuning.steps,
            guidance_scale: job.tuning.guidance_scale,
            seed,
            timeout,
        };

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| {
                ProviderError::InferenceFailure("inference worker pool closed".to_string())
            })?;
        let started = Instant::now();
        let downloads = Arc::clone(&self.downloads);
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            run_blocking(provider.as_ref(), &request, &downloads)
        });

        match tokio::time::timeout(timeout, task).await {
            Err(_) => Err(ProviderError::Timeout(format!(
                "no result within {:.1}s",
                timeout.as_secs_f64()
            ))),
            Ok(Err(join_err)) => Err(ProviderError::InferenceFailure(format!(
                "provider worker crashed: {join_err}"
            ))),
            Ok(Ok(Err(err))) => Err(classify_error(&err)),
            Ok(Ok(Ok(image))) => Ok(Invocation {
                image,
                seed,
                elapsed: started.elapsed(),
            }),
        }
    }
}

fn run_blocking(
    provider: &dyn ImageProvider,
    request: &InvocationRequest,
    downloads: &LazyHttp,
) -> Result<DynamicImage> {
    let raw = provider.invoke(request)?;
    decode_raw_result(raw, downloads, request.timeout)
}

/// Collapses binary, base64 and URL payloads into one decoded image.
pub(crate) fn decode_raw_result(
    raw: RawProviderResult,
    downloads: &LazyHttp,
    timeout: Duration,
) -> Result<DynamicImage> {
    let bytes = match raw {
        RawProviderResult::Binary(bytes) => bytes,
        RawProviderResult::Base64(text) => BASE64
            .decode(strip_data_uri_prefix(&text).as_bytes())
            .context("provider image base64 decode failed")?,
        RawProviderResult::Url(url) => fetch_image_bytes(downloads, &url, timeout)?,
    };
    if bytes.is_empty() {
        let err = ProviderError::ResponseMalformed("provider returned an empty image".to_string());
        return Err(err.into());
    }
    image::load_from_memory(&bytes).context("provider image decode failed")
}

fn fetch_image_bytes(downloads: &LazyHttp, url: &str, timeout: Duration) -> Result<Vec<u8>> {
    let response = downloads
        .get()?
        .get(url)
        .timeout(timeout)
        .send()
        .with_context(|| format!("image download failed ({url})"))?;
    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::ResponseMalformed(format!(
            "image download failed ({}) for {url}",
            status.as_u16()
        ))
        .into());
    }
    Ok(response
        .bytes()
        .with_context(|| format!("image download body read failed ({url})"))?
        .to_vec())
}

fn strip_data_uri_prefix(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.starts_with("data:") {
        if let Some((_, payload)) = trimmed.split_once(";base64,") {
            return payload;
        }
    }
    trimmed
}

/// Callers' seeds win. Without one, seeded providers get a seed derived from the request
/// content, so identical requests reproduce.
pub fn resolve_seed(job: &InferenceJob, provider_name: &str, supports_seed: bool) -> Option<u64> {
    if !supports_seed {
        return None;
    }
    match job.tuning.seed {
        Some(SeedSpec::Fixed(seed)) => Some(seed),
        Some(SeedSpec::Random) => Some(random_seed()),
        None => Some(derived_seed(job, provider_name)),
    }
}

fn derived_seed(job: &InferenceJob, provider_name: &str) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(job.prompts.positive_prompt.as_bytes());
    hasher.update([0u8]);
    hasher.update(job.prompts.negative_prompt.as_bytes());
    hasher.update([0u8]);
    hasher.update(job.source_digest);
    hasher.update(provider_name.as_bytes());
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head) & SEED_MASK
}

fn random_seed() -> u64 {
    (uuid::Uuid::new_v4().as_u128() as u64) & SEED_MASK
}

/// Maps an error chain onto the provider taxonomy. Nothing leaves uncategorised.
pub fn classify_error(err: &anyhow::Error) -> ProviderError {
    if let Some(explicit) = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<ProviderError>())
    {
        return explicit.clone();
    }
    let reason = error_chain_text(err, 512);
    let timed_out = err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|reqwest_err| reqwest_err.is_timeout())
            .unwrap_or(false)
    });
    if timed_out {
        return ProviderError::Timeout(reason);
    }
    let malformed = err.chain().any(|cause| {
        cause.is::<serde_json::Error>()
            || cause.is::<base64::DecodeError>()
            || cause.is::<image::ImageError>()
    });
    if malformed {
        return ProviderError::ResponseMalformed(reason);
    }
    ProviderError::InferenceFailure(reason)
}
