use axum::{
    extract::{Multipart, State},
    response::Response,
};

use crate::AppState;
use crate::api::error::AppError;
use crate::services::bulk::run_bulk;
use crate::services::engine::ResizeSpec;

use super::{
    FieldParser, Payload, collect_payload, discard_files, require_single_file, stream_artifact,
};

fn parse_resize_spec(payload: &Payload) -> Result<ResizeSpec, AppError> {
    let mut parser = FieldParser::new(&payload.fields);
    let target_width = parser.required_dimension("width");
    let target_height = parser.required_dimension("height");
    let maintain_aspect_ratio = parser.flag("maintainAspectRatio");
    parser.finish()?;

    Ok(ResizeSpec {
        target_width,
        target_height,
        maintain_aspect_ratio,
    })
}

#[utoipa::path(
    post,
    path = "/api/resize",
    request_body(content = Multipart, description = "Image file plus `width`, `height`, `maintainAspectRatio` fields"),
    responses(
        (status = 200, description = "Resized image stream"),
        (status = 400, description = "Missing file or invalid dimensions"),
        (status = 500, description = "Decode or encode failure")
    ),
    tag = "transform"
)]
pub async fn resize_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let payload = collect_payload(&state, &mut multipart, 1).await?;
    match resize_inner(&state, &payload).await {
        Ok(response) => Ok(response),
        Err(e) => {
            discard_files(&state, &payload);
            Err(e)
        }
    }
}

async fn resize_inner(state: &AppState, payload: &Payload) -> Result<Response, AppError> {
    let asset = require_single_file(payload)?;
    let spec = parse_resize_spec(payload)?;

    let artifact = state.engine.resize(asset, spec).await?;
    stream_artifact(state, artifact, vec![asset.stored_path.clone()]).await
}

#[utoipa::path(
    post,
    path = "/api/bulk-resize",
    request_body(content = Multipart, description = "Up to 50 image files plus shared resize fields"),
    responses(
        (status = 200, description = "Zip archive of resized images"),
        (status = 400, description = "No files or invalid dimensions"),
        (status = 500, description = "A member failed to decode or encode; the whole job is aborted")
    ),
    tag = "transform"
)]
pub async fn bulk_resize(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let max_files = state.config.max_bulk_files;
    let payload = collect_payload(&state, &mut multipart, max_files).await?;
    match bulk_inner(&state, &payload).await {
        Ok(response) => Ok(response),
        Err(e) => {
            discard_files(&state, &payload);
            Err(e)
        }
    }
}

async fn bulk_inner(state: &AppState, payload: &Payload) -> Result<Response, AppError> {
    if payload.files.is_empty() {
        return Err(AppError::BadRequest("No files uploaded".to_string()));
    }
    let spec = parse_resize_spec(payload)?;

    let job = run_bulk(&state.engine, &state.store, &payload.files, spec).await?;

    // Inputs, per-member outputs and the archive all ride the same grace
    // window once the archive starts streaming.
    let mut cleanup: Vec<_> = payload.files.iter().map(|a| a.stored_path.clone()).collect();
    let archive = job.archive.clone();
    cleanup.extend(job.results.iter().map(|r| r.path.clone()));

    stream_artifact(state, archive, cleanup).await
}
