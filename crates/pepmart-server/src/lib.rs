pub mod config;
pub mod error;
pub mod routes;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use pepmart_engine::Pipeline;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

// Room for multipart boundaries and the text fields next to the image.
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    ready: Arc<AtomicBool>,
    max_upload_bytes: usize,
}

impl AppState {
    /// Starts not ready; call [`AppState::mark_ready`] once providers are probed.
    pub fn new(pipeline: Arc<Pipeline>, max_upload_bytes: usize) -> Self {
        Self {
            pipeline,
            ready: Arc::new(AtomicBool::new(false)),
            max_upload_bytes,
        }
    }

    pub fn ready(pipeline: Arc<Pipeline>, max_upload_bytes: usize) -> Self {
        let state = Self::new(pipeline, max_upload_bytes);
        state.mark_ready();
        state
    }

    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }
}

pub fn build_app(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes.saturating_add(FORM_OVERHEAD_BYTES);
    Router::new()
        .route("/generate", post(routes::generate))
        .route("/health", get(routes::health))
        .route("/styles", get(routes::styles))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
