//! Frame validation, resizing, and data-URI encoding for vision APIs.
//!
//! Frames are downscaled to at most 1024px on the longest edge and
//! re-encoded as JPEG before upload or analysis.

use base64::{engine::general_purpose::STANDARD, Engine};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use tracing::debug;

use crate::error::PpeError;

/// Maximum dimension (width or height) for frames sent to the vision API.
pub const MAX_IMAGE_DIMENSION: u32 = 1024;

/// Smallest frame worth analyzing.
pub const MIN_IMAGE_DIMENSION: u32 = 64;

/// Default upload limit for user-selected files (10 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

const DATA_URI_PREFIX: &str = "data:image/jpeg;base64,";

/// Reject files that are not images or exceed `max_bytes`. No decoding beyond format sniffing.
pub fn validate_upload(bytes: &[u8], max_bytes: u64) -> Result<ImageFormat, PpeError> {
    if bytes.len() as u64 > max_bytes {
        return Err(PpeError::Validation(format!(
            "file is {} bytes, limit is {} bytes",
            bytes.len(),
            max_bytes
        )));
    }

    image::guess_format(bytes).map_err(|_| {
        PpeError::Validation("please select a valid image (JPG, PNG, WEBP)".to_string())
    })
}

/// Decode, validate size, downscale if needed, and re-encode as JPEG.
pub fn prepare_frame(image_bytes: &[u8]) -> Result<Vec<u8>, PpeError> {
    let img = image::load_from_memory(image_bytes)
        .map_err(|e| PpeError::Validation(format!("failed to decode image: {}", e)))?;

    let (width, height) = (img.width(), img.height());
    if width.min(height) < MIN_IMAGE_DIMENSION {
        return Err(PpeError::Validation(format!(
            "image too small for analysis: {}x{}, minimum dimension is {}px",
            width, height, MIN_IMAGE_DIMENSION
        )));
    }

    let resized = resize_if_needed(img, MAX_IMAGE_DIMENSION);
    let jpeg = encode_to_jpeg(&resized)?;
    debug!(
        "Prepared frame {}x{} -> {}x{} ({} bytes)",
        width,
        height,
        resized.width(),
        resized.height(),
        jpeg.len()
    );
    Ok(jpeg)
}

/// Resize image if either dimension exceeds max, maintaining aspect ratio.
fn resize_if_needed(img: DynamicImage, max_dimension: u32) -> DynamicImage {
    let (width, height) = (img.width(), img.height());

    if width <= max_dimension && height <= max_dimension {
        return img;
    }

    let scale = max_dimension as f32 / width.max(height) as f32;
    let new_width = (width as f32 * scale) as u32;
    let new_height = (height as f32 * scale) as u32;

    img.resize(new_width, new_height, image::imageops::FilterType::Lanczos3)
}

fn encode_to_jpeg(img: &DynamicImage) -> Result<Vec<u8>, PpeError> {
    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buffer = Cursor::new(Vec::new());
    rgb.write_to(&mut buffer, ImageFormat::Jpeg)
        .map_err(|e| PpeError::Validation(format!("failed to encode JPEG: {}", e)))?;
    Ok(buffer.into_inner())
}

/// Embed JPEG bytes as a `data:` URI.
pub fn to_data_uri(jpeg_bytes: &[u8]) -> String {
    format!("{}{}", DATA_URI_PREFIX, STANDARD.encode(jpeg_bytes))
}

pub fn is_data_uri(reference: &str) -> bool {
    reference.starts_with("data:image")
}

/// Extract the bytes of a base64 `data:image/...` URI.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>, PpeError> {
    if !is_data_uri(uri) {
        return Err(PpeError::Validation("not an image data URI".to_string()));
    }
    let (_, payload) = uri
        .split_once(',')
        .ok_or_else(|| PpeError::Validation("data URI has no payload".to_string()))?;
    STANDARD
        .decode(payload)
        .map_err(|e| PpeError::Validation(format!("invalid base64 in data URI: {}", e)))
}
