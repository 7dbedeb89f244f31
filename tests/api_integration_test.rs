use std::io::Cursor;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat, RgbaImage};
use serde_json::Value;
use tower::ServiceExt;

use rust_image_backend::config::AppConfig;
use rust_image_backend::services::engine::TransformEngine;
use rust_image_backend::services::staging::TempStore;
use rust_image_backend::{AppState, create_app};

fn test_state(dir: &tempfile::TempDir) -> AppState {
    let config = AppConfig {
        inbound_dir: dir.path().join("uploads"),
        outbound_dir: dir.path().join("output"),
        ..AppConfig::development()
    };
    let store = Arc::new(TempStore::new(config.staging()).unwrap());
    let engine = Arc::new(TransformEngine::new(store.clone()));
    AppState {
        store,
        engine,
        config,
    }
}

fn gradient_image(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgba8(RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
    }))
}

fn image_bytes(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    gradient_image(width, height)
        .write_to(&mut buf, format)
        .unwrap();
    buf.into_inner()
}

/// Binary-safe multipart body builder for oneshot requests.
struct MultipartBuilder {
    boundary: String,
    body: Vec<u8>,
}

impl MultipartBuilder {
    fn new() -> Self {
        Self {
            boundary: "---------------------------123456789012345678901234567".to_string(),
            body: Vec::new(),
        }
    }

    fn text(mut self, name: &str, value: &str) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                self.boundary, name, value
            )
            .as_bytes(),
        );
        self
    }

    fn file(mut self, name: &str, filename: &str, content_type: &str, data: &[u8]) -> Self {
        self.body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n\
                 Content-Type: {}\r\n\r\n",
                self.boundary, name, filename, content_type
            )
            .as_bytes(),
        );
        self.body.extend_from_slice(data);
        self.body.extend_from_slice(b"\r\n");
        self
    }

    fn build(mut self, uri: &str) -> Request<Body> {
        self.body
            .extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={}", self.boundary),
            )
            .body(Body::from(self.body))
            .unwrap()
    }
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn outbound_entries(dir: &tempfile::TempDir) -> Vec<String> {
    std::fs::read_dir(dir.path().join("output"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect()
}

#[tokio::test]
async fn test_health_check() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_app(test_state(&dir));

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_conversion_options_for_png() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_app(test_state(&dir));

    let request = MultipartBuilder::new()
        .file(
            "file",
            "photo.png",
            "image/png",
            &image_bytes(8, 8, ImageFormat::Png),
        )
        .build("/api/get-conversion-options");

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["inputFormat"], "png");
    let targets: Vec<&str> = json["availableFormats"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    assert_eq!(targets, vec!["jpeg", "webp", "svg"]);
}

#[tokio::test]
async fn test_conversion_options_normalizes_jpg_alias() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_app(test_state(&dir));

    let request = MultipartBuilder::new()
        .file(
            "file",
            "photo.JPG",
            "image/jpeg",
            &image_bytes(8, 8, ImageFormat::Jpeg),
        )
        .build("/api/get-conversion-options");

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["inputFormat"], "jpeg");
}

#[tokio::test]
async fn test_convert_png_to_jpeg_preserves_geometry() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_app(test_state(&dir));

    let request = MultipartBuilder::new()
        .file(
            "file",
            "photo.png",
            "image/png",
            &image_bytes(40, 30, ImageFormat::Png),
        )
        .text("targetFormat", "jpeg")
        .build("/api/convert");

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "image/jpeg"
    );
    let disposition = response.headers()["content-disposition"]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains("converted-"));
    assert!(disposition.ends_with(".jpeg") || disposition.contains(".jpeg\""));

    let bytes = body_bytes(response).await;
    let decoded = image::load_from_memory(&bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (40, 30));
}

#[tokio::test]
async fn test_convert_png_to_svg_produces_wrapper() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_app(test_state(&dir));

    let request = MultipartBuilder::new()
        .file(
            "file",
            "icon.png",
            "image/png",
            &image_bytes(16, 16, ImageFormat::Png),
        )
        .text("targetFormat", "svg")
        .build("/api/convert");

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "image/svg+xml"
    );

    let text = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(text.starts_with("<svg"));
    assert!(text.contains("data:image/png;base64,"));
    assert!(text.contains("width=\"16\""));
}

#[tokio::test]
async fn test_convert_rejects_unlisted_target() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_app(test_state(&dir));

    // gif is never a conversion target
    let request = MultipartBuilder::new()
        .file(
            "file",
            "photo.png",
            "image/png",
            &image_bytes(8, 8, ImageFormat::Png),
        )
        .text("targetFormat", "gif")
        .build("/api/convert");

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(
        json["error"]
            .as_str()
            .unwrap()
            .contains("Unsupported target format")
    );
}

#[tokio::test]
async fn test_convert_rejects_illegal_pairing() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_app(test_state(&dir));

    // svg parses as a target but jpeg sources only offer png and webp
    let request = MultipartBuilder::new()
        .file(
            "file",
            "photo.jpeg",
            "image/jpeg",
            &image_bytes(8, 8, ImageFormat::Jpeg),
        )
        .text("targetFormat", "svg")
        .build("/api/convert");

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("not supported"));
}

#[tokio::test]
async fn test_jfif_uploads_convert_as_jpeg() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_app(test_state(&dir));

    // .jfif normalizes to jpeg before the policy table is consulted, so
    // jpeg's targets apply.
    let request = MultipartBuilder::new()
        .file(
            "file",
            "scan.jfif",
            "image/jpeg",
            &image_bytes(8, 8, ImageFormat::Jpeg),
        )
        .text("targetFormat", "webp")
        .build("/api/convert");

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "image/webp"
    );
}

#[tokio::test]
async fn test_convert_without_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_app(test_state(&dir));

    let request = MultipartBuilder::new()
        .text("targetFormat", "jpeg")
        .build("/api/convert");

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "No file uploaded");
}

#[tokio::test]
async fn test_upload_rejects_non_image_extension() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_app(test_state(&dir));

    let request = MultipartBuilder::new()
        .file("file", "notes.txt", "text/plain", b"hello")
        .text("targetFormat", "jpeg")
        .build("/api/convert");

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(
        json["error"]
            .as_str()
            .unwrap()
            .contains("Only image files are allowed")
    );
}

#[tokio::test]
async fn test_upload_rejects_fake_image_content() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let app = create_app(state.clone());

    let request = MultipartBuilder::new()
        .file("file", "fake.png", "image/png", b"this is not an image")
        .text("targetFormat", "jpeg")
        .build("/api/convert");

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(
        json["error"]
            .as_str()
            .unwrap()
            .contains("does not contain image data")
    );

    // The rejected upload must not linger in staging.
    let staged: Vec<_> = std::fs::read_dir(state.config.inbound_dir)
        .unwrap()
        .collect();
    assert!(staged.is_empty());
}

#[tokio::test]
async fn test_resize_with_aspect_ratio_fits_within_box() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_app(test_state(&dir));

    let request = MultipartBuilder::new()
        .file(
            "file",
            "wide.png",
            "image/png",
            &image_bytes(200, 100, ImageFormat::Png),
        )
        .text("width", "50")
        .text("height", "50")
        .text("maintainAspectRatio", "true")
        .build("/api/resize");

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let decoded = image::load_from_memory(&body_bytes(response).await).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (50, 25));
}

#[tokio::test]
async fn test_resize_without_aspect_ratio_stretches_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_app(test_state(&dir));

    let request = MultipartBuilder::new()
        .file(
            "file",
            "square.png",
            "image/png",
            &image_bytes(64, 64, ImageFormat::Png),
        )
        .text("width", "100")
        .text("height", "30")
        .build("/api/resize");

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let decoded = image::load_from_memory(&body_bytes(response).await).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (100, 30));
}

#[tokio::test]
async fn test_resize_never_upscales_when_keeping_aspect() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_app(test_state(&dir));

    let request = MultipartBuilder::new()
        .file(
            "file",
            "small.png",
            "image/png",
            &image_bytes(20, 10, ImageFormat::Png),
        )
        .text("width", "400")
        .text("height", "400")
        .text("maintainAspectRatio", "true")
        .build("/api/resize");

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let decoded = image::load_from_memory(&body_bytes(response).await).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (20, 10));
}

#[tokio::test]
async fn test_resize_reports_every_invalid_field_at_once() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_app(test_state(&dir));

    let request = MultipartBuilder::new()
        .file(
            "file",
            "photo.png",
            "image/png",
            &image_bytes(8, 8, ImageFormat::Png),
        )
        .text("width", "abc")
        .build("/api/resize");

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    let message = json["error"].as_str().unwrap();
    assert!(message.contains("width must be a positive integer"));
    assert!(message.contains("height is required"));
}

#[tokio::test]
async fn test_crop_anchored_at_origin_is_valid() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_app(test_state(&dir));

    let request = MultipartBuilder::new()
        .file(
            "file",
            "photo.png",
            "image/png",
            &image_bytes(32, 32, ImageFormat::Png),
        )
        .text("x", "0")
        .text("y", "0")
        .text("width", "10")
        .text("height", "10")
        .build("/api/crop");

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let decoded = image::load_from_memory(&body_bytes(response).await).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (10, 10));
}

#[tokio::test]
async fn test_crop_out_of_bounds_leaves_no_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_app(test_state(&dir));

    let request = MultipartBuilder::new()
        .file(
            "file",
            "photo.png",
            "image/png",
            &image_bytes(32, 32, ImageFormat::Png),
        )
        .text("x", "30")
        .text("y", "30")
        .text("width", "10")
        .text("height", "10")
        .build("/api/crop");

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("exceeds image bounds"));
    assert!(outbound_entries(&dir).is_empty());
}

#[tokio::test]
async fn test_crop_requires_coordinates() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_app(test_state(&dir));

    let request = MultipartBuilder::new()
        .file(
            "file",
            "photo.png",
            "image/png",
            &image_bytes(32, 32, ImageFormat::Png),
        )
        .text("width", "10")
        .text("height", "10")
        .build("/api/crop");

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let json = body_json(response).await;
    let message = json["error"].as_str().unwrap();
    assert!(message.contains("x is required"));
    assert!(message.contains("y is required"));
}

#[tokio::test]
async fn test_bulk_resize_preserves_member_names_and_order() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_app(test_state(&dir));

    let request = MultipartBuilder::new()
        .file(
            "files",
            "first.png",
            "image/png",
            &image_bytes(40, 20, ImageFormat::Png),
        )
        .file(
            "files",
            "second.png",
            "image/png",
            &image_bytes(60, 30, ImageFormat::Png),
        )
        .file(
            "files",
            "third.png",
            "image/png",
            &image_bytes(80, 40, ImageFormat::Png),
        )
        .text("width", "20")
        .text("height", "20")
        .text("maintainAspectRatio", "true")
        .build("/api/bulk-resize");

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "application/zip"
    );

    let bytes = body_bytes(response).await;
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    assert_eq!(archive.len(), 3);
    assert_eq!(archive.by_index(0).unwrap().name(), "first.png");
    assert_eq!(archive.by_index(1).unwrap().name(), "second.png");
    assert_eq!(archive.by_index(2).unwrap().name(), "third.png");
}

#[tokio::test]
async fn test_bulk_resize_without_files_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_app(test_state(&dir));

    let request = MultipartBuilder::new()
        .text("width", "20")
        .text("height", "20")
        .build("/api/bulk-resize");

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "No files uploaded");
}

#[tokio::test]
async fn test_compress_png_stays_png() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_app(test_state(&dir));

    let request = MultipartBuilder::new()
        .file(
            "file",
            "photo.png",
            "image/png",
            &image_bytes(64, 64, ImageFormat::Png),
        )
        .text("quality", "60")
        .build("/api/compress");

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "image/png"
    );

    let decoded = image::load_from_memory(&body_bytes(response).await).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (64, 64));
}

#[tokio::test]
async fn test_compress_remaps_gif_to_webp() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_app(test_state(&dir));

    let request = MultipartBuilder::new()
        .file(
            "file",
            "anim.gif",
            "image/gif",
            &image_bytes(32, 32, ImageFormat::Gif),
        )
        .build("/api/compress");

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "image/webp"
    );
    let disposition = response.headers()["content-disposition"]
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.contains("compressed-"));
    assert!(disposition.contains(".webp"));
}

#[tokio::test]
async fn test_compress_preview_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_app(test_state(&dir));

    let request = MultipartBuilder::new()
        .file(
            "file",
            "photo.jpeg",
            "image/jpeg",
            &image_bytes(64, 64, ImageFormat::Jpeg),
        )
        .text("quality", "40")
        .build("/api/compress-preview");

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert!(json["bytes"].as_u64().unwrap() > 0);
    assert_eq!(json["format"], "jpeg");
    assert!(outbound_entries(&dir).is_empty());
}

#[tokio::test]
async fn test_quality_out_of_range_is_clamped_not_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = create_app(test_state(&dir));

    let request = MultipartBuilder::new()
        .file(
            "file",
            "photo.jpeg",
            "image/jpeg",
            &image_bytes(32, 32, ImageFormat::Jpeg),
        )
        .text("quality", "9001")
        .build("/api/compress-preview");

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
