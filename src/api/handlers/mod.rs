pub mod compress;
pub mod convert;
pub mod crop;
pub mod health;
pub mod resize;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use axum::{
    body::Body,
    extract::Multipart,
    http::{StatusCode, header},
    response::Response,
};
use futures::TryStreamExt;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use tokio_util::io::{ReaderStream, StreamReader};

use crate::AppState;
use crate::api::error::AppError;
use crate::services::engine::ResultArtifact;
use crate::services::staging::UploadedAsset;

/// Source extensions accepted at the boundary, before any component runs.
pub(crate) const ALLOWED_EXTENSIONS: &[&str] = &[
    "jpeg", "jpg", "png", "gif", "webp", "svg", "heic", "jfif",
];

/// Everything one multipart request carried: staged file parts plus the
/// raw text fields, collected in a single pass before any validation of
/// operation parameters.
pub(crate) struct Payload {
    pub files: Vec<UploadedAsset>,
    pub fields: HashMap<String, String>,
}

/// Parse the whole multipart body: stage file parts (fields named `file` or
/// `files`), gather text fields. Any rejection mid-stream removes already
/// staged files and drains the remaining body so the client sees a clean
/// HTTP error instead of a connection reset.
pub(crate) async fn collect_payload(
    state: &AppState,
    multipart: &mut Multipart,
    max_files: usize,
) -> Result<Payload, AppError> {
    let mut payload = Payload {
        files: Vec::new(),
        fields: HashMap::new(),
    };

    let result: Result<(), AppError> = async {
        while let Some(field) = multipart.next_field().await.map_err(|e| {
            let err_msg = e.to_string();
            if err_msg.contains("length limit exceeded") {
                AppError::PayloadTooLarge(
                    "Request body exceeds the maximum allowed limit".to_string(),
                )
            } else {
                AppError::BadRequest(err_msg)
            }
        })? {
            let name = field.name().unwrap_or_default().to_string();

            if name == "file" || name == "files" {
                if payload.files.len() >= max_files {
                    return Err(AppError::BadRequest(format!(
                        "Too many files in request (maximum is {max_files})"
                    )));
                }

                let original_filename = field.file_name().unwrap_or("unnamed").to_string();
                let declared_mime = field.content_type().map(|s| s.to_string());

                validate_upload_meta(&original_filename, declared_mime.as_deref())?;

                let body_with_io_error = field.map_err(std::io::Error::other);
                let reader = StreamReader::new(body_with_io_error);

                let asset = state
                    .store
                    .stage_stream(reader, &original_filename, declared_mime)
                    .await
                    .map_err(|e| AppError::Internal(format!("Failed to stage upload: {e}")))?;

                if asset.size_bytes as usize > state.config.max_upload_size {
                    state.store.delete_now(&asset.stored_path);
                    return Err(AppError::PayloadTooLarge(format!(
                        "File '{}' exceeds the {} MB upload limit",
                        asset.original_filename,
                        state.config.max_upload_size / 1024 / 1024
                    )));
                }

                if let Err(e) = verify_image_content(&asset).await {
                    state.store.delete_now(&asset.stored_path);
                    return Err(e);
                }

                payload.files.push(asset);
            } else if field.file_name().is_some() {
                // Unexpected file field; drain and ignore.
                let mut field = field;
                while let Ok(Some(_)) = field.chunk().await {}
            } else {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                payload.fields.insert(name, text);
            }
        }
        Ok(())
    }
    .await;

    match result {
        Ok(()) => Ok(payload),
        Err(e) => {
            tracing::warn!("Rejected multipart payload: {}. Consuming remaining stream...", e);
            discard_files(state, &payload);
            while let Ok(Some(mut field)) = multipart.next_field().await {
                while let Ok(Some(_)) = field.chunk().await {}
            }
            Err(e)
        }
    }
}

/// Extension allow-list plus declared content-type check, applied before
/// the body is read.
fn validate_upload_meta(filename: &str, declared_mime: Option<&str>) -> Result<(), AppError> {
    let ext = std::path::Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(AppError::BadRequest(format!(
            "Only image files are allowed ({})",
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }

    if let Some(declared) = declared_mime {
        let parsed: mime::Mime = declared
            .parse()
            .map_err(|_| AppError::BadRequest(format!("Invalid content type: {declared}")))?;
        if parsed.type_() != mime::IMAGE && parsed != mime::APPLICATION_OCTET_STREAM {
            return Err(AppError::BadRequest(format!(
                "Unsupported content type: {declared}"
            )));
        }
    }

    Ok(())
}

/// Magic-byte sniff of the staged file. SVG is text and exempt; everything
/// else must at least look like an image container.
async fn verify_image_content(asset: &UploadedAsset) -> Result<(), AppError> {
    use tokio::io::AsyncReadExt;

    let ext = std::path::Path::new(&asset.original_filename)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    if ext == "svg" {
        return Ok(());
    }

    let mut header = [0u8; 64];
    let mut file = tokio::fs::File::open(&asset.stored_path)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to reopen staged file: {e}")))?;
    let n = file
        .read(&mut header)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to read staged file: {e}")))?;

    match infer::get(&header[..n]) {
        Some(kind) if kind.matcher_type() == infer::MatcherType::Image => Ok(()),
        _ => Err(AppError::BadRequest(format!(
            "File '{}' does not contain image data",
            asset.original_filename
        ))),
    }
}

pub(crate) fn require_single_file(payload: &Payload) -> Result<&UploadedAsset, AppError> {
    match payload.files.as_slice() {
        [] => Err(AppError::BadRequest("No file uploaded".to_string())),
        [single] => Ok(single),
        _ => Err(AppError::BadRequest(
            "Expected a single file upload".to_string(),
        )),
    }
}

/// Immediate cleanup for error paths: failed requests never leak staged
/// uploads.
pub(crate) fn discard_files(state: &AppState, payload: &Payload) {
    for asset in &payload.files {
        state.store.delete_now(&asset.stored_path);
    }
}

/// One explicit coercion-with-validation pass over the request's text
/// fields. Problems accumulate so a single response enumerates every
/// offending field instead of failing one at a time.
pub(crate) struct FieldParser<'a> {
    fields: &'a HashMap<String, String>,
    problems: Vec<String>,
}

impl<'a> FieldParser<'a> {
    pub fn new(fields: &'a HashMap<String, String>) -> Self {
        Self {
            fields,
            problems: Vec::new(),
        }
    }

    /// Required strictly-positive integer (resize/crop extents).
    pub fn required_dimension(&mut self, key: &str) -> u32 {
        match self.fields.get(key).map(|s| s.trim()) {
            None | Some("") => {
                self.problems.push(format!("{key} is required"));
                0
            }
            Some(raw) => match raw.parse::<u32>() {
                Ok(0) => {
                    self.problems
                        .push(format!("{key} must be greater than zero"));
                    0
                }
                Ok(v) => v,
                Err(_) => {
                    self.problems
                        .push(format!("{key} must be a positive integer"));
                    0
                }
            },
        }
    }

    /// Required non-negative integer. Zero is a valid value here: a crop
    /// anchored at the image origin is legitimate.
    pub fn required_coordinate(&mut self, key: &str) -> u32 {
        match self.fields.get(key).map(|s| s.trim()) {
            None | Some("") => {
                self.problems.push(format!("{key} is required"));
                0
            }
            Some(raw) => match raw.parse::<u32>() {
                Ok(v) => v,
                Err(_) => {
                    self.problems
                        .push(format!("{key} must be a non-negative integer"));
                    0
                }
            },
        }
    }

    /// Lenient boolean flag: `true`/`1` means set, everything else does not.
    pub fn flag(&self, key: &str) -> bool {
        matches!(
            self.fields.get(key).map(|s| s.trim()),
            Some("true") | Some("1")
        )
    }

    /// Quality is deliberately clamp-on-invalid: absent or unparsable
    /// values fall back to 70, out-of-range values clamp into [10, 100].
    pub fn quality(&self) -> u8 {
        self.fields
            .get("quality")
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .map(|q| q.clamp(10, 100) as u8)
            .unwrap_or(70)
    }

    pub fn finish(self) -> Result<(), AppError> {
        if self.problems.is_empty() {
            Ok(())
        } else {
            Err(AppError::BadRequest(self.problems.join("; ")))
        }
    }
}

/// Stream a staged artifact back to the client with a suggested filename,
/// then queue deferred deletion for every staged path the request produced.
/// The grace window lets a slow reader finish the download before the
/// files disappear.
pub(crate) async fn stream_artifact(
    state: &AppState,
    artifact: ResultArtifact,
    cleanup_paths: Vec<PathBuf>,
) -> Result<Response, AppError> {
    let file = match tokio::fs::File::open(&artifact.path).await {
        Ok(f) => f,
        Err(e) => {
            for path in &cleanup_paths {
                state.store.delete_now(path);
            }
            state.store.delete_now(&artifact.path);
            return Err(AppError::Internal(format!(
                "Failed to open result artifact: {e}"
            )));
        }
    };

    let body = Body::from_stream(ReaderStream::new(file));
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, artifact.mime_type)
        .header(header::CONTENT_LENGTH, artifact.size_bytes)
        .header(
            header::CONTENT_DISPOSITION,
            content_disposition(&artifact.suggested_filename),
        )
        .body(body)
        .map_err(|e| AppError::Internal(format!("Failed to build response: {e}")))?;

    let grace = Duration::from_secs(state.config.cleanup_grace_secs);
    for path in &cleanup_paths {
        state.store.schedule_delete(path, grace);
    }
    state.store.schedule_delete(&artifact.path, grace);

    Ok(response)
}

fn content_disposition(filename: &str) -> String {
    let encoded = utf8_percent_encode(filename, NON_ALPHANUMERIC);
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        filename.replace('"', ""),
        encoded
    )
}
