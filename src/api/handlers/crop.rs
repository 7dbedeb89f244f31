use axum::{
    extract::{Multipart, State},
    response::Response,
};

use crate::AppState;
use crate::api::error::AppError;
use crate::services::engine::CropRect;

use super::{
    FieldParser, Payload, collect_payload, discard_files, require_single_file, stream_artifact,
};

#[utoipa::path(
    post,
    path = "/api/crop",
    request_body(content = Multipart, description = "Image file plus `x`, `y`, `width`, `height` fields"),
    responses(
        (status = 200, description = "Cropped image stream"),
        (status = 400, description = "Missing file, invalid fields, or rectangle out of bounds"),
        (status = 500, description = "Decode or encode failure")
    ),
    tag = "transform"
)]
pub async fn crop_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let payload = collect_payload(&state, &mut multipart, 1).await?;
    match crop_inner(&state, &payload).await {
        Ok(response) => Ok(response),
        Err(e) => {
            discard_files(&state, &payload);
            Err(e)
        }
    }
}

async fn crop_inner(state: &AppState, payload: &Payload) -> Result<Response, AppError> {
    let asset = require_single_file(payload)?;

    // x and y accept 0: a crop anchored at the image origin is valid.
    let mut parser = FieldParser::new(&payload.fields);
    let x = parser.required_coordinate("x");
    let y = parser.required_coordinate("y");
    let width = parser.required_dimension("width");
    let height = parser.required_dimension("height");
    parser.finish()?;

    let rect = CropRect {
        x,
        y,
        width,
        height,
    };

    let artifact = state.engine.crop(asset, rect).await?;
    stream_artifact(state, artifact, vec![asset.stored_path.clone()]).await
}
