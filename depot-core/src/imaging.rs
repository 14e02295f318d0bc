//! Pixel-level helpers shared by normalization and on-demand resizing.
//!
//! Everything here is synchronous and CPU-bound; callers run it on the
//! blocking pool.
use crate::content_type::ContentType;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;
use thiserror::Error;

/// Lossy quality used for every WebP and JPEG this service encodes.
pub const ENCODE_QUALITY: u8 = 85;

#[derive(Error, Debug)]
pub enum ImagingError {
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("Failed to read image header: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to encode {format}: {reason}")]
    Encode { format: String, reason: String },
    #[error("No encoder for {0}")]
    Unsupported(String),
}

/// Width and height of an encoded image, read from its header only.
pub fn dimensions(data: &[u8]) -> Result<(u32, u32), ImagingError> {
    let reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
    Ok(reader.into_dimensions()?)
}

pub fn decode(data: &[u8]) -> Result<DynamicImage, ImagingError> {
    let reader = ImageReader::new(Cursor::new(data)).with_guessed_format()?;
    Ok(reader.decode()?)
}

/// Target size for a fit-inside resize to `max_width`.
///
/// Never enlarges: images already at most `max_width` wide keep their size.
/// Height is scaled proportionally and rounded, with a floor of one pixel.
pub fn fit_inside(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if width <= max_width || width == 0 {
        return (width, height);
    }
    let scaled = (height as f64 * max_width as f64 / width as f64).round() as u32;
    (max_width, scaled.max(1))
}

/// Downscale to `max_width`, preserving aspect ratio.
pub fn resize_to_width(image: &DynamicImage, max_width: u32) -> DynamicImage {
    let (width, height) = fit_inside(image.width(), image.height(), max_width);
    if (width, height) == (image.width(), image.height()) {
        return image.clone();
    }
    image.resize_exact(width, height, FilterType::Lanczos3)
}

/// Lossy WebP at [`ENCODE_QUALITY`].
pub fn encode_webp(image: &DynamicImage) -> Result<Vec<u8>, ImagingError> {
    let rgba = image.to_rgba8();
    let encoder = webp::Encoder::from_rgba(rgba.as_raw(), rgba.width(), rgba.height());
    let memory = encoder
        .encode_simple(false, ENCODE_QUALITY as f32)
        .map_err(|e| ImagingError::Encode {
            format: "WebP".to_string(),
            reason: format!("{e:?}"),
        })?;
    Ok(memory.to_vec())
}

/// Encode in the format matching `content_type`, so the bytes agree with the
/// `Content-Type` served for the artifact's extension.
pub fn encode_as(image: &DynamicImage, content_type: &ContentType) -> Result<Vec<u8>, ImagingError> {
    let mut buf = Vec::new();
    match content_type {
        ContentType::Webp => return encode_webp(image),
        ContentType::Jpeg => {
            let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
            rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, ENCODE_QUALITY))?;
        }
        ContentType::Png => image.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?,
        ContentType::Gif => {
            let rgba = DynamicImage::ImageRgba8(image.to_rgba8());
            rgba.write_to(&mut Cursor::new(&mut buf), ImageFormat::Gif)?;
        }
        other => return Err(ImagingError::Unsupported(other.to_string())),
    }
    Ok(buf)
}
