use std::time::Duration;

use axum::{
    Json,
    extract::{Multipart, State},
    response::Response,
};
use serde::Serialize;
use utoipa::ToSchema;

use crate::AppState;
use crate::api::error::AppError;
use crate::services::engine::CompressionSpec;

use super::{
    FieldParser, Payload, collect_payload, discard_files, require_single_file, stream_artifact,
};

#[derive(Serialize, ToSchema)]
pub struct CompressPreviewResponse {
    /// Encoded size at the requested quality. Nothing is written to disk.
    pub bytes: u64,
    /// Output format after the compression remap (gif→webp, heic/svg→jpeg).
    pub format: String,
}

#[utoipa::path(
    post,
    path = "/api/compress",
    request_body(content = Multipart, description = "Image file plus an optional `quality` field (10-100, default 70)"),
    responses(
        (status = 200, description = "Compressed image stream"),
        (status = 400, description = "Missing file"),
        (status = 500, description = "Decode or encode failure")
    ),
    tag = "transform"
)]
pub async fn compress_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let payload = collect_payload(&state, &mut multipart, 1).await?;
    match compress_inner(&state, &payload).await {
        Ok(response) => Ok(response),
        Err(e) => {
            discard_files(&state, &payload);
            Err(e)
        }
    }
}

async fn compress_inner(state: &AppState, payload: &Payload) -> Result<Response, AppError> {
    let asset = require_single_file(payload)?;
    let spec = CompressionSpec {
        quality: FieldParser::new(&payload.fields).quality(),
    };

    let artifact = state.engine.compress(asset, spec).await?;
    stream_artifact(state, artifact, vec![asset.stored_path.clone()]).await
}

#[utoipa::path(
    post,
    path = "/api/compress-preview",
    request_body(content = Multipart, description = "Image file plus an optional `quality` field (10-100, default 70)"),
    responses(
        (status = 200, description = "Estimated compressed size", body = CompressPreviewResponse),
        (status = 400, description = "Missing file"),
        (status = 500, description = "Decode or encode failure")
    ),
    tag = "transform"
)]
pub async fn compress_preview(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<CompressPreviewResponse>, AppError> {
    let payload = collect_payload(&state, &mut multipart, 1).await?;
    match preview_inner(&state, &payload).await {
        Ok(response) => Ok(response),
        Err(e) => {
            discard_files(&state, &payload);
            Err(e)
        }
    }
}

async fn preview_inner(
    state: &AppState,
    payload: &Payload,
) -> Result<Json<CompressPreviewResponse>, AppError> {
    let asset = require_single_file(payload)?;
    let spec = CompressionSpec {
        quality: FieldParser::new(&payload.fields).quality(),
    };

    let estimate = state.engine.compress_preview(asset, spec).await?;

    state.store.schedule_delete(
        &asset.stored_path,
        Duration::from_secs(state.config.cleanup_grace_secs),
    );

    Ok(Json(CompressPreviewResponse {
        bytes: estimate.bytes,
        format: estimate.format.as_str().to_string(),
    }))
}
