use std::time::Instant;

use image::DynamicImage;
use pepmart_contracts::errors::ExhaustionReport;
use pepmart_contracts::providers::{NamedProvider, ProviderRegistry};
use pepmart_contracts::result::ProviderAttempt;

use crate::inference::{InferenceBoundary, InferenceJob};
use crate::providers::{Availability, ProviderDescriptor};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackState {
    Pending,
    Trying(String),
    Succeeded(String),
    Exhausted,
}

impl FallbackState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded(_) | Self::Exhausted)
    }
}

#[derive(Debug, Clone)]
pub struct FallbackSuccess {
    pub provider: String,
    pub image: DynamicImage,
    pub seed: Option<u64>,
    pub attempts: Vec<ProviderAttempt>,
}

#[derive(Debug, Clone)]
pub enum FallbackOutcome {
    Succeeded(FallbackSuccess),
    Exhausted(ExhaustionReport),
}

/// Walks the provider chain for one request: each provider at most once, in priority order.
pub struct FallbackController<'a> {
    providers: &'a ProviderRegistry<ProviderDescriptor>,
    boundary: &'a InferenceBoundary,
    state: FallbackState,
    history: Vec<FallbackState>,
}

impl<'a> FallbackController<'a> {
    pub fn new(
        providers: &'a ProviderRegistry<ProviderDescriptor>,
        boundary: &'a InferenceBoundary,
    ) -> Self {
        Self {
            providers,
            boundary,
            state: FallbackState::Pending,
            history: vec![FallbackState::Pending],
        }
    }

    pub fn state(&self) -> &FallbackState {
        &self.state
    }

    /// Every state visited so far, starting with `Pending`.
    pub fn history(&self) -> &[FallbackState] {
        &self.history
    }

    pub async fn run(&mut self, job: &InferenceJob) -> FallbackOutcome {
        if self.state.is_terminal() {
            tracing::warn!(state = ?self.state, "fallback controller already finished");
            return FallbackOutcome::Exhausted(ExhaustionReport::default());
        }
        let mut attempts: Vec<ProviderAttempt> = Vec::new();
        for descriptor in self.providers.providers() {
            let name = descriptor.name().to_string();
            if let Availability::Unavailable(reason) = descriptor.availability().await {
                tracing::info!(provider = %name, %reason, "skipping unavailable provider");
                attempts.push(ProviderAttempt::skipped(&name, reason));
                continue;
            }

            self.transition(FallbackState::Trying(name.clone()));
            tracing::info!(
                provider = %name,
                timeout_s = descriptor.timeout().as_secs_f64(),
                "invoking provider"
            );
            let started = Instant::now();
            match self.boundary.invoke(descriptor, job).await {
                Ok(invocation) => {
                    let elapsed_ms = invocation.elapsed.as_millis() as u64;
                    tracing::info!(provider = %name, elapsed_ms, "provider succeeded");
                    attempts.push(ProviderAttempt::succeeded(&name, elapsed_ms));
                    self.transition(FallbackState::Succeeded(name.clone()));
                    return FallbackOutcome::Succeeded(FallbackSuccess {
                        provider: name,
                        image: invocation.image,
                        seed: invocation.seed,
                        attempts,
                    });
                }
                Err(err) => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    tracing::warn!(
                        provider = %name,
                        kind = %err.kind(),
                        error = %err,
                        "provider failed; trying next"
                    );
                    attempts.push(ProviderAttempt::failed(&name, &err, elapsed_ms));
                }
            }
        }

        self.transition(FallbackState::Exhausted);
        let report = ExhaustionReport { attempts };
        tracing::warn!(report = %report, "provider chain exhausted");
        FallbackOutcome::Exhausted(report)
    }

    fn transition(&mut self, next: FallbackState) {
        tracing::debug!(from = ?self.state, to = ?next, "fallback transition");
        self.state = next.clone();
        self.history.push(next);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use pepmart_contracts::errors::ErrorKind;
    use pepmart_contracts::prompts::{PromptBundle, PromptSource};
    use pepmart_contracts::providers::ProviderRegistry;
    use pepmart_contracts::request::Tuning;
    use pepmart_contracts::result::AttemptOutcome;

    use super::{FallbackController, FallbackOutcome, FallbackState};
    use crate::inference::{InferenceBoundary, InferenceJob};
    use crate::providers::{
        Availability, ImageProvider, InvocationRequest, ProviderDescriptor, RawProviderResult,
    };

    #[derive(Clone, Copy)]
    enum Behaviour {
        Hang,
        Malformed,
        Succeed,
        Unavailable,
    }

    struct FakeProvider {
        name: &'static str,
        behaviour: Behaviour,
        calls: Arc<AtomicUsize>,
    }

    fn png() -> Vec<u8> {
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([1, 2, 3])))
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    impl ImageProvider for FakeProvider {
        fn name(&self) -> &str {
            self.name
        }

        fn probe(&self) -> Availability {
            match self.behaviour {
                Behaviour::Unavailable => {
                    Availability::Unavailable(format!("{} key missing", self.name))
                }
                _ => Availability::Available,
            }
        }

        fn invoke(&self, _request: &InvocationRequest) -> anyhow::Result<RawProviderResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Hang => {
                    thread::sleep(Duration::from_millis(200));
                    Ok(RawProviderResult::Binary(png()))
                }
                Behaviour::Malformed => Ok(RawProviderResult::Base64("not-an-image".to_string())),
                Behaviour::Succeed => Ok(RawProviderResult::Binary(png())),
                Behaviour::Unavailable => anyhow::bail!("should never be invoked"),
            }
        }
    }

    fn registry(
        rows: &[(&'static str, i32, Behaviour)],
        calls: &Arc<AtomicUsize>,
    ) -> ProviderRegistry<ProviderDescriptor> {
        ProviderRegistry::new(
            rows.iter()
                .map(|(name, priority, behaviour)| {
                    ProviderDescriptor::new(
                        Arc::new(FakeProvider {
                            name: *name,
                            behaviour: *behaviour,
                            calls: Arc::clone(calls),
                        }),
                        *priority,
                        Duration::from_millis(50),
                    )
                })
                .collect(),
        )
    }

    fn job() -> InferenceJob {
        InferenceJob::new(
            png(),
            2,
            2,
            PromptBundle {
                positive_prompt: "keep the pet".to_string(),
                negative_prompt: "blurry".to_string(),
                source: PromptSource::Synthesized,
            },
            Tuning::default(),
        )
    }

    #[tokio::test]
    async fn falls_through_timeout_and_malformed_to_third_provider() {
        let calls = Arc::new(AtomicUsize::new(0));
        let providers = registry(
            &[
                ("p3", 3, Behaviour::Succeed),
                ("p1", 1, Behaviour::Hang),
                ("p2", 2, Behaviour::Malformed),
            ],
            &calls,
        );
        let boundary = InferenceBoundary::new(2);
        let mut controller = FallbackController::new(&providers, &boundary);
        let FallbackOutcome::Succeeded(success) = controller.run(&job()).await else {
            panic!("expected p3 to succeed");
        };
        assert_eq!(success.provider, "p3");
        let kinds = success
            .attempts
            .iter()
            .map(|attempt| (attempt.provider.as_str(), attempt.error_kind))
            .collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                ("p1", Some(ErrorKind::ProviderTimeout)),
                ("p2", Some(ErrorKind::ProviderResponseMalformed)),
                ("p3", None),
            ]
        );
        assert!(success.attempts[0].reason.is_some());
        assert!(success.attempts[1].reason.is_some());
        assert_eq!(
            controller.history(),
            &[
                FallbackState::Pending,
                FallbackState::Trying("p1".to_string()),
                FallbackState::Trying("p2".to_string()),
                FallbackState::Trying("p3".to_string()),
                FallbackState::Succeeded("p3".to_string()),
            ]
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn single_worker_fallback_waits_for_timed_out_call_to_release() {
        let calls = Arc::new(AtomicUsize::new(0));
        let providers = registry(
            &[("stuck", 1, Behaviour::Hang), ("local", 2, Behaviour::Succeed)],
            &calls,
        );
        let boundary = InferenceBoundary::new(1);
        let mut controller = FallbackController::new(&providers, &boundary);

        let started = Instant::now();
        let FallbackOutcome::Succeeded(success) = controller.run(&job()).await else {
            panic!("expected local to succeed");
        };
        let elapsed = started.elapsed();

        assert_eq!(success.provider, "local");
        assert_eq!(success.attempts[0].error_kind, Some(ErrorKind::ProviderTimeout));
        assert_eq!(success.attempts[1].outcome, AttemptOutcome::Succeeded);
        // The stuck call holds the only worker for its full 200ms, well past its 50ms timeout.
        assert!(elapsed >= Duration::from_millis(200), "finished after {elapsed:?}");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(boundary.available_workers(), 1);
    }

    #[tokio::test]
    async fn unavailable_providers_are_skipped_without_invocation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let providers = registry(
            &[("vision", 1, Behaviour::Unavailable), ("local", 2, Behaviour::Succeed)],
            &calls,
        );
        let boundary = InferenceBoundary::new(1);
        let mut controller = FallbackController::new(&providers, &boundary);
        let FallbackOutcome::Succeeded(success) = controller.run(&job()).await else {
            panic!("expected local to succeed");
        };
        assert_eq!(success.provider, "local");
        assert_eq!(success.attempts[0].outcome, AttemptOutcome::Skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_reports_each_provider_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let providers = registry(
            &[
                ("a", 1, Behaviour::Malformed),
                ("b", 2, Behaviour::Unavailable),
                ("c", 3, Behaviour::Malformed),
            ],
            &calls,
        );
        let boundary = InferenceBoundary::new(1);
        let mut controller = FallbackController::new(&providers, &boundary);
        let FallbackOutcome::Exhausted(report) = controller.run(&job()).await else {
            panic!("expected exhaustion");
        };
        assert_eq!(report.attempts.len(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(controller.state(), &FallbackState::Exhausted);
        let text = report.to_string();
        assert!(text.contains("a (provider_response_malformed)"));
        assert!(text.contains("b (provider_unavailable): b key missing"));
        assert!(text.contains("c (provider_response_malformed)"));

        let FallbackOutcome::Exhausted(again) = controller.run(&job()).await else {
            panic!("finished controller must not retry");
        };
        assert!(again.attempts.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn empty_chain_is_exhausted_immediately() {
        let providers = ProviderRegistry::new(Vec::new());
        let boundary = InferenceBoundary::new(1);
        let mut controller = FallbackController::new(&providers, &boundary);
        assert!(matches!(
            controller.run(&job()).await,
            FallbackOutcome::Exhausted(report) if report.attempts.is_empty()
        ));
        assert_eq!(
            controller.history(),
            &[FallbackState::Pending, FallbackState::Exhausted]
        );
    }
}
