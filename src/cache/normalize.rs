//! Image normalization: decode, validate, fit-inside resize, flatten alpha,
//! re-encode as JPEG. Runs on a blocking thread pool from the caller, mirroring
//! the teacher's thumbnail generation which keeps `image::open`/`write_to`
//! off the async executor.

use std::io::Cursor;

use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageFormat};

const MIN_DIMENSION: u32 = 100;
const MAX_DIMENSION: u32 = 16384;
const MIN_OUTPUT_BYTES: usize = 1024;

const ALLOWED_FORMATS: &[ImageFormat] = &[
    ImageFormat::Jpeg,
    ImageFormat::Png,
    ImageFormat::WebP,
    ImageFormat::Gif,
    ImageFormat::Tiff,
    ImageFormat::Bmp,
];

#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("format not in the supported allowlist: {0:?}")]
    UnsupportedFormat(Option<ImageFormat>),
    #[error("garbage or truncated image bytes: {0}")]
    Decode(String),
    #[error("image dimensions out of bounds: {width}x{height}")]
    OutOfBounds { width: u32, height: u32 },
    #[error("re-encoded output too small ({0} bytes)")]
    OutputTooSmall(usize),
    #[error("encode failed: {0}")]
    Encode(String),
}

pub struct NormalizeParams {
    pub show_width: u32,
    pub show_height: u32,
    pub jpeg_quality: u8,
}

/// Decode `raw`, validate it against the size bounds, fit it inside
/// `show_width x show_height` without upscaling, flatten any alpha onto
/// white, and re-encode as JPEG. Blocking / CPU-bound: call via
/// `tokio::task::spawn_blocking`.
pub fn normalize(raw: &[u8], params: &NormalizeParams) -> Result<Vec<u8>, NormalizeError> {
    let format = image::guess_format(raw).ok();
    if !format.is_some_and(|f| ALLOWED_FORMATS.contains(&f)) {
        return Err(NormalizeError::UnsupportedFormat(format));
    }

    let img = image::load_from_memory(raw).map_err(|e| NormalizeError::Decode(e.to_string()))?;

    let (width, height) = img.dimensions();
    if width.min(height) < MIN_DIMENSION || width.max(height) > MAX_DIMENSION {
        return Err(NormalizeError::OutOfBounds { width, height });
    }

    let fitted = fit_inside(&img, params.show_width, params.show_height);
    let flattened = flatten_on_white(&fitted);

    let mut out = Vec::new();
    let encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut Cursor::new(&mut out), params.jpeg_quality);
    flattened
        .write_with_encoder(encoder)
        .map_err(|e| NormalizeError::Encode(e.to_string()))?;

    if out.len() < MIN_OUTPUT_BYTES {
        return Err(NormalizeError::OutputTooSmall(out.len()));
    }

    Ok(out)
}

/// Resize to fit inside the target box, preserving aspect ratio, never
/// upscaling beyond the source's own dimensions.
fn fit_inside(img: &DynamicImage, max_width: u32, max_height: u32) -> DynamicImage {
    let (width, height) = img.dimensions();
    if width <= max_width && height <= max_height {
        return img.clone();
    }
    img.resize(max_width, max_height, FilterType::Lanczos3)
}

/// Composite onto an opaque white background so JPEG (which has no alpha
/// channel) never shows a black fringe around transparent source pixels.
fn flatten_on_white(img: &DynamicImage) -> DynamicImage {
    if !img.color().has_alpha() {
        return img.clone();
    }
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut canvas = image::RgbaImage::from_pixel(width, height, image::Rgba([255, 255, 255, 255]));
    image::imageops::overlay(&mut canvas, &rgba, 0, 0);
    DynamicImage::ImageRgba8(canvas).to_rgb8().into()
}

#[cfg(test)]
#[path = "tests/normalize_tests.rs"]
mod tests;
