//! Route handlers

use super::error::{AppError, AppResult};
use super::state::AppState;
use crate::error::RembgError;
use axum::body::Bytes;
use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

/// Name of the multipart field carrying the upload
pub const IMAGE_FIELD: &str = "image";

const OUTPUT_DISPOSITION: &str = "inline; filename=\"processed_image.png\"";

/// GET /health
pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// POST /rembg
///
/// Reads the `image` file field, runs the pipeline on a blocking thread and
/// answers with the processed PNG.
pub async fn remove_background(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<impl IntoResponse> {
    let multipart = multipart.map_err(|rejection| {
        tracing::debug!(%rejection, "Request body is not multipart");
        AppError::missing_image()
    })?;

    let (filename, upload) = read_image_field(multipart).await?;
    if filename.is_empty() {
        return Err(AppError::empty_filename());
    }

    tracing::info!(filename = %filename, bytes = upload.len(), "Processing image");

    let pipeline = state.pipeline.clone();
    let png = tokio::task::spawn_blocking(move || pipeline.run(&upload))
        .await
        .map_err(|err| RembgError::internal(format!("processing task failed: {err}")))??;

    tracing::info!(filename = %filename, bytes = png.len(), "Image processed");

    Ok((
        [(CONTENT_TYPE, "image/png"), (CONTENT_DISPOSITION, OUTPUT_DISPOSITION)],
        png,
    ))
}

/// Find the first `image` part that is a file upload and read it fully
///
/// Parts without a `filename` parameter are plain form values, not files,
/// and are skipped. A malformed body counts as having no image. Stream
/// failures with their own status, such as the body limit tripping while
/// skipping earlier parts, keep that status.
async fn read_image_field(mut multipart: Multipart) -> AppResult<(String, Bytes)> {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return Err(AppError::missing_image()),
            Err(err) if err.status() != StatusCode::BAD_REQUEST => return Err(err.into()),
            Err(err) => {
                tracing::debug!(error = %err, "Malformed multipart body");
                return Err(AppError::missing_image());
            }
        };

        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_owned) else {
            continue;
        };

        let bytes = field.bytes().await?;
        return Ok((filename, bytes));
    }
}
