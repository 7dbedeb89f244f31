use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::services::engine::EngineError;

#[derive(Error, Debug)]
pub enum AppError {
    /// Bad or missing parameters, unsupported conversion, absent file.
    /// Reported to the caller immediately; never a server fault.
    #[error("Bad Request: {0}")]
    BadRequest(String),

    /// Upload over the configured ceiling.
    #[error("Payload Too Large: {0}")]
    PayloadTooLarge(String),

    /// Unreadable or corrupt source image; a client-data problem surfaced
    /// at the codec boundary.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Encoder-side failure (unsupported target, codec internals). The
    /// class that should page someone in production.
    #[error("Encode error: {0}")]
    Encode(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Validation(msg) => AppError::BadRequest(msg),
            EngineError::Decode(msg) => AppError::Decode(msg),
            EngineError::Encode(msg) => AppError::Encode(msg),
            EngineError::Io(err) => AppError::Internal(format!("I/O failure: {err}")),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            AppError::Decode(msg) => {
                tracing::warn!("Decode failure: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Failed to decode image: {msg}"),
                )
            }
            AppError::Encode(msg) => {
                tracing::error!("Encode failure: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Failed to encode image: {msg}"),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Server Error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}
