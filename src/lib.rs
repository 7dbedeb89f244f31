pub mod api;
pub mod config;
pub mod services;

use crate::config::AppConfig;
use crate::services::engine::TransformEngine;
use crate::services::staging::TempStore;
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::health::health_check,
        api::handlers::convert::get_conversion_options,
        api::handlers::convert::convert_image,
        api::handlers::resize::resize_image,
        api::handlers::resize::bulk_resize,
        api::handlers::crop::crop_image,
        api::handlers::compress::compress_image,
        api::handlers::compress::compress_preview,
    ),
    components(
        schemas(
            api::handlers::health::HealthResponse,
            api::handlers::convert::ConversionOptionsResponse,
            api::handlers::compress::CompressPreviewResponse,
        )
    ),
    tags(
        (name = "system", description = "Service status endpoints"),
        (name = "transform", description = "Image transformation endpoints")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<TempStore>,
    pub engine: Arc<TransformEngine>,
    pub config: AppConfig,
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/api/health", get(api::handlers::health::health_check))
        .route(
            "/api/get-conversion-options",
            post(api::handlers::convert::get_conversion_options),
        )
        .route("/api/convert", post(api::handlers::convert::convert_image))
        .route("/api/resize", post(api::handlers::resize::resize_image))
        .route("/api/bulk-resize", post(api::handlers::resize::bulk_resize))
        .route("/api/crop", post(api::handlers::crop::crop_image))
        .route(
            "/api/compress",
            post(api::handlers::compress::compress_image),
        )
        .route(
            "/api/compress-preview",
            post(api::handlers::compress::compress_preview),
        )
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        )
        .layer(axum::extract::DefaultBodyLimit::max(
            state.config.max_upload_size + 10 * 1024 * 1024, // Add 10MB buffer for multipart overhead
        ))
        .with_state(state)
}
