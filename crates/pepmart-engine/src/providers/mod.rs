mod dryrun;
mod edit;
mod local;
mod vision;

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use pepmart_contracts::errors::ProviderError;
use pepmart_contracts::providers::{NamedProvider, ProviderRegistry};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::truncate_text;

pub use dryrun::DryrunProvider;
pub use edit::EditProvider;
pub use local::LocalProvider;
pub use vision::VisionProvider;

/// Everything a provider needs for one call. The source image is PNG-encoded once per request.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub source_png: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub positive_prompt: String,
    pub negative_prompt: String,
    pub strength: Option<f64>,
    pub steps: Option<u32>,
    pub guidance_scale: Option<f64>,
    pub seed: Option<u64>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawProviderResult {
    Binary(Vec<u8>),
    Base64(String),
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable(String),
}

impl Availability {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

/// Blocking provider contract. Both methods run on worker threads, never on the async runtime.
pub trait ImageProvider: Send + Sync {
    fn name(&self) -> &str;

    fn supports_seed(&self) -> bool {
        true
    }

    fn probe(&self) -> Availability;

    fn invoke(&self, request: &InvocationRequest) -> Result<RawProviderResult>;
}

pub struct ProviderDescriptor {
    provider: Arc<dyn ImageProvider>,
    priority: i32,
    timeout: Duration,
    availability: OnceCell<Availability>,
}

impl ProviderDescriptor {
    pub fn new(provider: Arc<dyn ImageProvider>, priority: i32, timeout: Duration) -> Self {
        Self {
            provider,
            priority,
            timeout,
            availability: OnceCell::new(),
        }
    }

    pub fn provider(&self) -> Arc<dyn ImageProvider> {
        Arc::clone(&self.provider)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probes once, then serves the cached answer for the life of the process.
    pub async fn availability(&self) -> &Availability {
        self.availability
            .get_or_init(|| async {
                let provider = self.provider();
                let name = provider.name().to_string();
                let availability = tokio::task::spawn_blocking(move || provider.probe())
                    .await
                    .unwrap_or_else(|err| {
                        Availability::Unavailable(format!("probe crashed: {err}"))
                    });
                match &availability {
                    Availability::Available => {
                        tracing::info!(provider = %name, "provider available")
                    }
                    Availability::Unavailable(reason) => {
                        tracing::warn!(provider = %name, %reason, "provider unavailable")
                    }
                }
                availability
            })
            .await
    }

    pub fn cached_availability(&self) -> Option<&Availability> {
        self.availability.get()
    }
}

impl NamedProvider for ProviderDescriptor {
    fn name(&self) -> &str {
        self.provider.name()
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

impl std::fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("name", &self.provider.name())
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("availability", &self.availability.get())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Local,
    Edit,
    Vision,
    Dryrun,
}

impl ProviderKind {
    pub fn build(self) -> Arc<dyn ImageProvider> {
        match self {
            Self::Local => Arc::new(LocalProvider::new()),
            Self::Edit => Arc::new(EditProvider::new()),
            Self::Vision => Arc::new(VisionProvider::new()),
            Self::Dryrun => Arc::new(DryrunProvider::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProviderSpec {
    pub kind: ProviderKind,
    pub priority: i32,
    pub timeout_secs: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

pub fn default_provider_specs() -> Vec<ProviderSpec> {
    vec![
        spec(ProviderKind::Local, 1, 300.0),
        spec(ProviderKind::Edit, 2, 120.0),
        spec(ProviderKind::Vision, 3, 120.0),
        spec(ProviderKind::Dryrun, 100, 30.0),
    ]
}

fn spec(kind: ProviderKind, priority: i32, timeout_secs: f64) -> ProviderSpec {
    ProviderSpec {
        kind,
        priority,
        timeout_secs,
        enabled: true,
    }
}

impl ProviderSpec {
    /// Rejects zero, negative, non-finite, and timeouts too large for a `Duration`.
    pub fn timeout(&self) -> Result<Duration> {
        let seconds = self.timeout_secs;
        match Duration::try_from_secs_f64(seconds) {
            Ok(timeout) if !timeout.is_zero() => Ok(timeout),
            _ => anyhow::bail!(
                "provider {:?} needs a positive timeout_secs that fits a duration, got {seconds}",
                self.kind
            ),
        }
    }
}

pub fn parse_provider_specs(raw: &str) -> Result<Vec<ProviderSpec>> {
    let specs: Vec<ProviderSpec> =
        serde_json::from_str(raw).context("provider table must be a JSON array of provider specs")?;
    for spec in &specs {
        spec.timeout()?;
    }
    Ok(specs)
}

pub fn build_registry(specs: &[ProviderSpec]) -> Result<ProviderRegistry<ProviderDescriptor>> {
    let mut descriptors = Vec::with_capacity(specs.len());
    for spec in specs.iter().filter(|spec| spec.enabled) {
        descriptors.push(ProviderDescriptor::new(
            spec.kind.build(),
            spec.priority,
            spec.timeout()?,
        ));
    }
    Ok(ProviderRegistry::new(descriptors))
}

/// Blocking client built on first use, from whichever worker thread gets there first.
#[derive(Debug, Default)]
pub(crate) struct LazyHttp {
    client: OnceLock<HttpClient>,
}

impl LazyHttp {
    pub(crate) fn get(&self) -> Result<&HttpClient> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = HttpClient::builder()
            .build()
            .context("failed to build HTTP client")?;
        Ok(self.client.get_or_init(|| client))
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    let raw = std::env::var(key).ok()?;
    let value = raw.trim();
    (!value.is_empty()).then(|| value.to_string())
}

pub(crate) fn env_flag(key: &str) -> bool {
    non_empty_env(key)
        .map(|value| {
            matches!(
                value.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}

/// Non-2xx statuses are provider-side failures; a 2xx body that is not JSON is malformed.
pub(crate) fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let body = response
        .text()
        .with_context(|| format!("reading {provider} response body"))?;
    if !status.is_success() {
        let excerpt = truncate_text(&body, 512);
        return Err(
            ProviderError::InferenceFailure(format!("{provider} answered {status}: {excerpt}"))
                .into(),
        );
    }
    serde_json::from_str(&body).with_context(|| format!("{provider} response is not JSON"))
}

pub(crate) fn api_base_from_env(key: &str, default: &str) -> String {
    non_empty_env(key)
        .map(|value| value.trim_end_matches('/').to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}
