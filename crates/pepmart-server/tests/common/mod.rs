#![allow(dead_code)]

use std::io::Cursor;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use pepmart_contracts::catalog::StyleCatalog;
use pepmart_contracts::features::FeatureThresholds;
use pepmart_contracts::providers::ProviderRegistry;
use pepmart_engine::providers::{
    Availability, DryrunProvider, ImageProvider, InvocationRequest, ProviderDescriptor,
    RawProviderResult,
};
use pepmart_engine::{Pipeline, PipelineConfig, DEFAULT_PREVIEW_EDGE};
use pepmart_server::{build_app, AppState};
use serde_json::Value;
use tower::ServiceExt;

pub const BOUNDARY: &str = "pepmart-test-boundary";
pub const UPLOAD_LIMIT: usize = 1024 * 1024;

/// Probe fails, so the controller must skip it.
pub struct Offline;

impl ImageProvider for Offline {
    fn name(&self) -> &str {
        "offline"
    }

    fn probe(&self) -> Availability {
        Availability::Unavailable("offline key missing".to_string())
    }

    fn invoke(&self, _request: &InvocationRequest) -> anyhow::Result<RawProviderResult> {
        anyhow::bail!("offline provider invoked")
    }
}

/// Sleeps well past any timeout the tests give it.
pub struct Stalled;

impl ImageProvider for Stalled {
    fn name(&self) -> &str {
        "stalled"
    }

    fn probe(&self) -> Availability {
        Availability::Available
    }

    fn invoke(&self, _request: &InvocationRequest) -> anyhow::Result<RawProviderResult> {
        thread::sleep(Duration::from_millis(800));
        Ok(RawProviderResult::Binary(Vec::new()))
    }
}

/// Answers with bytes that are not an image.
pub struct Garbled;

impl ImageProvider for Garbled {
    fn name(&self) -> &str {
        "garbled"
    }

    fn probe(&self) -> Availability {
        Availability::Available
    }

    fn invoke(&self, _request: &InvocationRequest) -> anyhow::Result<RawProviderResult> {
        Ok(RawProviderResult::Binary(b"<html>gateway error</html>".to_vec()))
    }
}

pub fn descriptor(
    provider: Arc<dyn ImageProvider>,
    priority: i32,
    timeout: Duration,
) -> ProviderDescriptor {
    ProviderDescriptor::new(provider, priority, timeout)
}

pub fn dryrun(priority: i32) -> ProviderDescriptor {
    descriptor(Arc::new(DryrunProvider::enabled()), priority, Duration::from_secs(5))
}

pub fn test_state(providers: Vec<ProviderDescriptor>, max_upload_bytes: usize) -> AppState {
    let catalog = StyleCatalog::embedded().unwrap();
    let pipeline = Pipeline::new(
        catalog,
        FeatureThresholds::default(),
        ProviderRegistry::new(providers),
        PipelineConfig {
            workers: 4,
            preview_edge: DEFAULT_PREVIEW_EDGE,
        },
    );
    AppState::new(Arc::new(pipeline), max_upload_bytes)
}

/// Router over a ready state.
pub fn test_app(providers: Vec<ProviderDescriptor>) -> Router {
    let state = test_state(providers, UPLOAD_LIMIT);
    state.mark_ready();
    build_app(state)
}

/// Vertical stripes of two browns: mean (210, 150, 90) with a luminance variance near 1225.
pub fn pet_photo_png() -> Vec<u8> {
    let image = RgbImage::from_fn(64, 48, |x, _| {
        if x % 2 == 0 {
            Rgb([245, 185, 125])
        } else {
            Rgb([175, 115, 55])
        }
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

pub enum Part<'a> {
    File(&'a str, &'a [u8]),
    Text(&'a str, &'a str),
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part {
            Part::File(name, data) => {
                body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{name}\"; filename=\"pet.png\"\r\n\
                         Content-Type: image/png\r\n\r\n"
                    )
                    .as_bytes(),
                );
                body.extend_from_slice(data);
            }
            Part::Text(name, value) => {
                body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}")
                        .as_bytes(),
                );
            }
        }
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_form(app: Router, parts: &[Part<'_>]) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri("/generate")
        .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(multipart_body(parts)))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
