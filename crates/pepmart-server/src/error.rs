use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pepmart_contracts::errors::PipelineError;
use serde_json::json;

/// Handler errors. Every variant renders as `{"detail": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),

    #[error("upload exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("models are still loading")]
    NotReady,

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Pipeline(err) => {
                tracing::error!(kind = %err.kind(), error = %err, "generation failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
