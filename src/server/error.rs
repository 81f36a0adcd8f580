//! Error type returned by the HTTP handlers

use crate::error::RembgError;
use axum::extract::multipart::MultipartError;
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::any::Any;

/// Handler-level error
///
/// Every variant renders as `{"error": "<message>"}` with a matching status.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Client sent no usable upload
    #[error("{0}")]
    BadRequest(String),

    /// The upload body broke off or exceeded the size limit while streaming
    #[error("Upload failed: {}", .0.body_text())]
    Upload(#[from] MultipartError),

    /// Body rejected by the size limit before the handler ran
    #[error("Upload exceeds the {0} byte limit")]
    PayloadTooLarge(usize),

    /// Anything that went wrong after the upload was accepted
    #[error("Processing failed: {0}")]
    Processing(#[from] RembgError),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub(crate) fn missing_image() -> Self {
        Self::BadRequest("No image provided".to_string())
    }

    pub(crate) fn empty_filename() -> Self {
        Self::BadRequest("No image selected".to_string())
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Upload(err) => err.status(),
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();

        if status.is_server_error() {
            tracing::error!(error = %message, "Request failed");
        } else {
            tracing::warn!(error = %message, status = status.as_u16(), "Rejected request");
        }

        (status, axum::Json(json!({ "error": message }))).into_response()
    }
}

/// Render a handler panic caught by `CatchPanicLayer` as a processing error
pub(crate) fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");
    AppError::from(RembgError::internal(format!("handler panicked: {detail}"))).into_response()
}

/// Replace the plain-text 413 of the body limit layer with the JSON error shape
pub(crate) async fn json_payload_too_large(
    State(limit): State<usize>,
    response: Response,
) -> Response {
    let is_json = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));

    if response.status() == StatusCode::PAYLOAD_TOO_LARGE && !is_json {
        return AppError::PayloadTooLarge(limit).into_response();
    }
    response
}
