use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageReader};
use resvg::{tiny_skia, usvg};
use thiserror::Error;
use tracing::debug;

use crate::services::format::FormatTag;
use crate::services::staging::{TempStore, UploadedAsset};

/// Default encode quality when the client did not ask for compression.
const DEFAULT_LOSSY_QUALITY: u8 = 80;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Target geometry for a resize request. With `maintain_aspect_ratio` the
/// pair is a bounding box and the engine never upscales past the source's
/// native resolution; without it the image is stretched to the exact size.
#[derive(Debug, Clone, Copy)]
pub struct ResizeSpec {
    pub target_width: u32,
    pub target_height: u32,
    pub maintain_aspect_ratio: bool,
}

/// Crop rectangle in source-pixel coordinates. Out-of-bounds rectangles are
/// rejected, never clamped; clamping is a UI-layer convenience only.
#[derive(Debug, Clone, Copy)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct CompressionSpec {
    /// Already clamped to [10, 100] by the request parser.
    pub quality: u8,
}

/// A transform result staged in the outbound directory, consumed once for
/// streaming and then handed to deferred deletion.
#[derive(Debug, Clone)]
pub struct ResultArtifact {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub mime_type: &'static str,
    pub suggested_filename: String,
}

/// Size estimate for the compression preview path. Nothing is written to
/// disk; the client only learns `{bytes, format}`.
#[derive(Debug, Clone)]
pub struct CompressionEstimate {
    pub bytes: u64,
    pub format: FormatTag,
}

/// Wraps the pixel codec: convert, resize, crop, compress and metadata
/// probing over staged assets, with validated parameters and typed failures.
/// CPU-bound codec work runs on the blocking pool.
pub struct TransformEngine {
    store: Arc<TempStore>,
}

impl TransformEngine {
    pub fn new(store: Arc<TempStore>) -> Self {
        Self { store }
    }

    /// Natural pixel dimensions of a staged asset.
    pub async fn probe(&self, asset: &UploadedAsset) -> Result<(u32, u32), EngineError> {
        let path = asset.stored_path.clone();
        let tag = FormatTag::resolve(&asset.original_filename);
        run_blocking(move || {
            let img = decode_source(&path, &tag)?;
            Ok(img.dimensions())
        })
        .await
    }

    /// Convert a staged asset to `target`. The SVG target is a documented
    /// product approximation: the decoded pixels are re-encoded as PNG and
    /// base64-embedded in a minimal SVG wrapper sized to the image — no
    /// vectorization happens.
    pub async fn convert(
        &self,
        asset: &UploadedAsset,
        target: FormatTag,
    ) -> Result<ResultArtifact, EngineError> {
        let path = asset.stored_path.clone();
        let source = FormatTag::resolve(&asset.original_filename);
        let name = TempStore::unique_name("converted", target.extension());
        let out_path = self.store.output_path(&name);
        let out = out_path.clone();
        let mime_type = target.mime_type();

        let size_bytes = run_blocking(move || {
            let img = decode_source(&path, &source)?;
            let bytes = if target == FormatTag::Svg {
                svg_wrapper(&img)?.into_bytes()
            } else {
                encode_default(&img, &target)?
            };
            std::fs::write(&out, &bytes)?;
            Ok(bytes.len() as u64)
        })
        .await?;

        Ok(ResultArtifact {
            path: out_path,
            size_bytes,
            mime_type,
            suggested_filename: name,
        })
    }

    /// Resize a staged asset. Output format is always the source's
    /// extension-derived format.
    pub async fn resize(
        &self,
        asset: &UploadedAsset,
        spec: ResizeSpec,
    ) -> Result<ResultArtifact, EngineError> {
        if spec.target_width == 0 || spec.target_height == 0 {
            return Err(EngineError::Validation(
                "Width and height must be greater than zero".to_string(),
            ));
        }

        let path = asset.stored_path.clone();
        let source = FormatTag::resolve(&asset.original_filename);
        let name = TempStore::unique_name("resized", source.extension());
        let out_path = self.store.output_path(&name);
        let out = out_path.clone();
        let mime_type = source.mime_type();

        let size_bytes = run_blocking(move || {
            let img = decode_source(&path, &source)?;
            let (src_w, src_h) = img.dimensions();

            let resized = if spec.maintain_aspect_ratio {
                let (w, h) = fit_within(src_w, src_h, spec.target_width, spec.target_height);
                if (w, h) == (src_w, src_h) {
                    // Already inside the bounding box; never upscale.
                    img
                } else {
                    img.resize_exact(w, h, FilterType::Lanczos3)
                }
            } else {
                img.resize_exact(spec.target_width, spec.target_height, FilterType::Lanczos3)
            };

            let bytes = encode_default(&resized, &source)?;
            std::fs::write(&out, &bytes)?;
            Ok(bytes.len() as u64)
        })
        .await?;

        Ok(ResultArtifact {
            path: out_path,
            size_bytes,
            mime_type,
            suggested_filename: name,
        })
    }

    /// Extract an exact rectangle. Bounds are validated before any codec
    /// call touches pixels.
    pub async fn crop(
        &self,
        asset: &UploadedAsset,
        rect: CropRect,
    ) -> Result<ResultArtifact, EngineError> {
        let path = asset.stored_path.clone();
        let source = FormatTag::resolve(&asset.original_filename);
        let name = TempStore::unique_name("cropped", source.extension());
        let out_path = self.store.output_path(&name);
        let out = out_path.clone();
        let mime_type = source.mime_type();

        let size_bytes = run_blocking(move || {
            let img = decode_source(&path, &source)?;
            let (src_w, src_h) = img.dimensions();
            validate_crop(&rect, src_w, src_h)?;

            let cropped = img.crop_imm(rect.x, rect.y, rect.width, rect.height);
            let bytes = encode_default(&cropped, &source)?;
            std::fs::write(&out, &bytes)?;
            Ok(bytes.len() as u64)
        })
        .await?;

        Ok(ResultArtifact {
            path: out_path,
            size_bytes,
            mime_type,
            suggested_filename: name,
        })
    }

    /// Re-encode at reduced quality. Formats without a usable lossy encoder
    /// are remapped: heic/svg become jpeg, gif becomes webp.
    pub async fn compress(
        &self,
        asset: &UploadedAsset,
        spec: CompressionSpec,
    ) -> Result<ResultArtifact, EngineError> {
        let path = asset.stored_path.clone();
        let source = FormatTag::resolve(&asset.original_filename);
        let target = compress_output_format(&source);
        let name = TempStore::unique_name("compressed", target.extension());
        let out_path = self.store.output_path(&name);
        let out = out_path.clone();
        let mime_type = target.mime_type();

        let size_bytes = run_blocking(move || {
            let img = decode_source(&path, &source)?;
            let bytes = encode_compressed(&img, &target, spec.quality)?;
            std::fs::write(&out, &bytes)?;
            Ok(bytes.len() as u64)
        })
        .await?;

        Ok(ResultArtifact {
            path: out_path,
            size_bytes,
            mime_type,
            suggested_filename: name,
        })
    }

    /// Compression size estimate: identical encode path to `compress`, but
    /// the output stays in memory and only its length is reported.
    pub async fn compress_preview(
        &self,
        asset: &UploadedAsset,
        spec: CompressionSpec,
    ) -> Result<CompressionEstimate, EngineError> {
        let path = asset.stored_path.clone();
        let source = FormatTag::resolve(&asset.original_filename);
        let target = compress_output_format(&source);
        let report_format = target.clone();

        let bytes = run_blocking(move || {
            let img = decode_source(&path, &source)?;
            let encoded = encode_compressed(&img, &target, spec.quality)?;
            Ok(encoded.len() as u64)
        })
        .await?;

        Ok(CompressionEstimate {
            bytes,
            format: report_format,
        })
    }
}

async fn run_blocking<T: Send + 'static>(
    work: impl FnOnce() -> Result<T, EngineError> + Send + 'static,
) -> Result<T, EngineError> {
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| EngineError::Encode(format!("transform worker failed: {e}")))?
}

/// Fit `(src_w, src_h)` inside `(max_w, max_h)` preserving aspect ratio,
/// never enlarging past the native size.
pub(crate) fn fit_within(src_w: u32, src_h: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if src_w <= max_w && src_h <= max_h {
        return (src_w, src_h);
    }
    let ratio = f64::min(max_w as f64 / src_w as f64, max_h as f64 / src_h as f64);
    let w = ((src_w as f64 * ratio).round() as u32).clamp(1, max_w);
    let h = ((src_h as f64 * ratio).round() as u32).clamp(1, max_h);
    (w, h)
}

pub(crate) fn validate_crop(rect: &CropRect, src_w: u32, src_h: u32) -> Result<(), EngineError> {
    if rect.width == 0 || rect.height == 0 {
        return Err(EngineError::Validation(
            "Crop width and height must be greater than zero".to_string(),
        ));
    }
    let right = rect.x.checked_add(rect.width);
    let bottom = rect.y.checked_add(rect.height);
    match (right, bottom) {
        (Some(r), Some(b)) if r <= src_w && b <= src_h => Ok(()),
        _ => Err(EngineError::Validation(format!(
            "Crop rectangle (x={}, y={}, {}x{}) exceeds image bounds ({}x{})",
            rect.x, rect.y, rect.width, rect.height, src_w, src_h
        ))),
    }
}

/// Compression output policy: keep the source format when its encoder can
/// do lossy re-encoding, otherwise substitute one that can.
pub(crate) fn compress_output_format(source: &FormatTag) -> FormatTag {
    match source {
        FormatTag::Heic | FormatTag::Svg => FormatTag::Jpeg,
        FormatTag::Gif => FormatTag::Webp,
        other => other.clone(),
    }
}

fn decode_source(path: &Path, tag: &FormatTag) -> Result<DynamicImage, EngineError> {
    match tag {
        FormatTag::Heic => decode_heic(path),
        FormatTag::Svg => decode_svg(path),
        // Content-sniffed decode: handles mismatched or unknown extensions
        // and turns corrupt payloads into a codec-level DecodeError.
        _ => ImageReader::open(path)?
            .with_guessed_format()?
            .decode()
            .map_err(|e| EngineError::Decode(e.to_string())),
    }
}

fn decode_svg(path: &Path) -> Result<DynamicImage, EngineError> {
    let data = std::fs::read(path)?;
    let tree = usvg::Tree::from_data(&data, &usvg::Options::default())
        .map_err(|e| EngineError::Decode(format!("invalid SVG: {e}")))?;
    let size = tree.size().to_int_size();
    let mut pixmap = tiny_skia::Pixmap::new(size.width(), size.height())
        .ok_or_else(|| EngineError::Decode("SVG has zero pixel area".to_string()))?;
    resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());
    let png = pixmap
        .encode_png()
        .map_err(|e| EngineError::Decode(format!("SVG rasterization failed: {e}")))?;
    image::load_from_memory(&png).map_err(|e| EngineError::Decode(e.to_string()))
}

/// HEIC is decoded through an ffmpeg subprocess in a lenient mode so
/// partially non-conformant files still produce pixels.
fn decode_heic(path: &Path) -> Result<DynamicImage, EngineError> {
    let intermediate = tempfile::Builder::new()
        .prefix("heic-decode-")
        .suffix(".png")
        .tempfile()?;
    let out_path = intermediate.path().to_path_buf();

    let output = Command::new("ffmpeg")
        .arg("-y")
        .arg("-err_detect")
        .arg("ignore_err")
        .arg("-i")
        .arg(path)
        .arg("-frames:v")
        .arg("1")
        .arg(&out_path)
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        debug!("ffmpeg HEIC decode failed: {}", stderr);
        return Err(EngineError::Decode(format!(
            "HEIC decode failed: {}",
            stderr.lines().last().unwrap_or("ffmpeg error")
        )));
    }

    let png = std::fs::read(&out_path)?;
    image::load_from_memory(&png).map_err(|e| EngineError::Decode(e.to_string()))
}

/// Encode at default quality, used by convert/resize/crop.
fn encode_default(img: &DynamicImage, target: &FormatTag) -> Result<Vec<u8>, EngineError> {
    match target {
        FormatTag::Png => {
            let mut buf = Vec::new();
            img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
                .map_err(|e| EngineError::Encode(e.to_string()))?;
            Ok(buf)
        }
        FormatTag::Jpeg | FormatTag::Jfif => encode_jpeg(img, DEFAULT_LOSSY_QUALITY),
        FormatTag::Webp => encode_webp(img, DEFAULT_LOSSY_QUALITY),
        FormatTag::Gif => {
            let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
            let mut buf = Vec::new();
            rgba.write_to(&mut Cursor::new(&mut buf), ImageFormat::Gif)
                .map_err(|e| EngineError::Encode(e.to_string()))?;
            Ok(buf)
        }
        FormatTag::Svg | FormatTag::Heic | FormatTag::Other(_) => Err(EngineError::Encode(
            format!("no encoder available for {target}"),
        )),
    }
}

/// Quality-driven encode, used by compress/compress-preview. PNG has no
/// quality knob; it gets maximum compression plus palette reduction instead.
fn encode_compressed(
    img: &DynamicImage,
    target: &FormatTag,
    quality: u8,
) -> Result<Vec<u8>, EngineError> {
    match target {
        FormatTag::Jpeg | FormatTag::Jfif => encode_jpeg(img, quality),
        FormatTag::Webp => encode_webp(img, quality),
        FormatTag::Png => {
            let mut buf = Vec::new();
            let encoder = PngEncoder::new_with_quality(
                Cursor::new(&mut buf),
                CompressionType::Best,
                PngFilterType::Adaptive,
            );
            img.write_with_encoder(encoder)
                .map_err(|e| EngineError::Encode(e.to_string()))?;
            oxipng::optimize_from_memory(&buf, &oxipng::Options::max_compression())
                .map_err(|e| EngineError::Encode(format!("PNG optimization failed: {e}")))
        }
        other => Err(EngineError::Encode(format!(
            "no compression encoder for {other}"
        ))),
    }
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, EngineError> {
    // JPEG has no alpha channel; flatten before encoding.
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut buf), quality);
    rgb.write_with_encoder(encoder)
        .map_err(|e| EngineError::Encode(e.to_string()))?;
    Ok(buf)
}

fn encode_webp(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, EngineError> {
    // The `image` crate only encodes lossless WebP; route lossy encoding
    // through libwebp.
    let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
    let encoder = webp::Encoder::from_image(&rgba)
        .map_err(|e| EngineError::Encode(format!("WebP encode failed: {e}")))?;
    Ok(encoder.encode(quality as f32).to_vec())
}

/// The SVG "export": pixels re-encoded as PNG and embedded in a wrapper
/// document sized to the image. A portable container, not vectorization.
fn svg_wrapper(img: &DynamicImage) -> Result<String, EngineError> {
    let (width, height) = img.dimensions();
    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(|e| EngineError::Encode(e.to_string()))?;
    let encoded = BASE64.encode(&png);
    Ok(format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{height}\">\n  \
         <image href=\"data:image/png;base64,{encoded}\" width=\"{width}\" height=\"{height}\"/>\n\
         </svg>\n"
    ))
}
