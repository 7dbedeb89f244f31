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
use crate::services::format::FormatTag;

use super::{Payload, collect_payload, discard_files, require_single_file, stream_artifact};

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversionOptionsResponse {
    /// Resolved source format, canonical token (`jpeg`, never `jpg`).
    pub input_format: String,
    /// Legal target formats for the source, per the conversion policy table.
    pub available_formats: Vec<String>,
}

#[utoipa::path(
    post,
    path = "/api/get-conversion-options",
    request_body(content = Multipart, description = "Image file upload"),
    responses(
        (status = 200, description = "Available conversion targets", body = ConversionOptionsResponse),
        (status = 400, description = "Missing or invalid file")
    ),
    tag = "transform"
)]
pub async fn get_conversion_options(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ConversionOptionsResponse>, AppError> {
    let payload = collect_payload(&state, &mut multipart, 1).await?;
    match options_inner(&state, &payload) {
        Ok(response) => Ok(response),
        Err(e) => {
            discard_files(&state, &payload);
            Err(e)
        }
    }
}

fn options_inner(
    state: &AppState,
    payload: &Payload,
) -> Result<Json<ConversionOptionsResponse>, AppError> {
    let asset = require_single_file(payload)?;
    let input_format = FormatTag::resolve(&asset.original_filename);
    let available_formats = input_format
        .legal_targets()
        .iter()
        .map(|t| t.as_str().to_string())
        .collect();

    // The upload served its purpose; let the grace window reclaim it.
    state.store.schedule_delete(
        &asset.stored_path,
        Duration::from_secs(state.config.cleanup_grace_secs),
    );

    Ok(Json(ConversionOptionsResponse {
        input_format: input_format.as_str().to_string(),
        available_formats,
    }))
}

#[utoipa::path(
    post,
    path = "/api/convert",
    request_body(content = Multipart, description = "Image file plus a `targetFormat` field"),
    responses(
        (status = 200, description = "Converted image stream"),
        (status = 400, description = "Missing file, unknown target, or conversion not offered"),
        (status = 500, description = "Decode or encode failure")
    ),
    tag = "transform"
)]
pub async fn convert_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let payload = collect_payload(&state, &mut multipart, 1).await?;
    match convert_inner(&state, &payload).await {
        Ok(response) => Ok(response),
        Err(e) => {
            discard_files(&state, &payload);
            Err(e)
        }
    }
}

async fn convert_inner(state: &AppState, payload: &Payload) -> Result<Response, AppError> {
    let asset = require_single_file(payload)?;

    let raw_target = payload
        .fields
        .get("targetFormat")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AppError::BadRequest("Target format not specified".to_string()))?;
    let target = FormatTag::parse_target(raw_target)
        .ok_or_else(|| AppError::BadRequest(format!("Unsupported target format: {raw_target}")))?;

    let source = FormatTag::resolve(&asset.original_filename);
    if !source.legal_targets().contains(&target) {
        return Err(AppError::BadRequest(format!(
            "Conversion from {source} to {target} is not supported"
        )));
    }

    let artifact = state.engine.convert(asset, target).await?;
    stream_artifact(state, artifact, vec![asset.stored_path.clone()]).await
}
