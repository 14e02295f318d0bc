//! Retrieval pipeline: resolve an artifact and optionally shrink it on the fly.
//!
//! Resized variants are computed per request and never written back.
use crate::content_type::ContentType;
use crate::imaging;
use crate::store::{FileStore, StoreError};
use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, warn};

/// Widths accepted for on-demand resizing. Anything else is ignored.
pub const MIN_WIDTH: u32 = 1;
pub const MAX_WIDTH: u32 = 4000;

/// Served for every successful retrieval, resized or not.
pub const CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

#[derive(Error, Debug)]
pub enum RetrieveError {
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Storage(StoreError),
}

impl From<StoreError> for RetrieveError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(name) | StoreError::InvalidName(name) => Self::NotFound(name),
            other => Self::Storage(other),
        }
    }
}

/// Which terminal state a retrieval reached.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServeMode {
    /// Stored bytes, untouched.
    Raw,
    /// A transient downscaled variant.
    Resized,
    /// Resizing was attempted and failed; stored bytes served instead.
    RawFallback,
}

#[derive(Debug)]
pub struct Retrieved {
    pub bytes: Bytes,
    pub content_type: ContentType,
    pub mode: ServeMode,
}

/// Keep a requested width only when it lies within `[MIN_WIDTH, MAX_WIDTH]`.
pub fn accepted_width(requested: Option<u32>) -> Option<u32> {
    requested.filter(|w| (MIN_WIDTH..=MAX_WIDTH).contains(w))
}

#[derive(Clone, Debug)]
pub struct RetrievalPipeline {
    store: FileStore,
}

impl RetrievalPipeline {
    pub fn new(store: FileStore) -> Self {
        Self { store }
    }

    pub async fn retrieve(
        &self,
        name: &str,
        requested_width: Option<u32>,
    ) -> Result<Retrieved, RetrieveError> {
        let content_type = ContentType::from_file_name(name);
        let raw = Bytes::from(self.store.read(name).await?);

        let width = match accepted_width(requested_width) {
            Some(width) if content_type.is_raster_image() => width,
            _ => {
                return Ok(Retrieved {
                    bytes: raw,
                    content_type,
                    mode: ServeMode::Raw,
                })
            }
        };

        let source = raw.clone();
        let target_type = content_type.clone();
        let resized = tokio::task::spawn_blocking(move || shrink(&source, width, &target_type)).await;

        let (bytes, mode) = match resized {
            Ok(Ok(Some(bytes))) => (Bytes::from(bytes), ServeMode::Resized),
            Ok(Ok(None)) => (raw, ServeMode::Raw),
            Ok(Err(e)) => {
                warn!("Resize of {name} to {width}px failed, serving original: {e}");
                (raw, ServeMode::RawFallback)
            }
            Err(e) => {
                warn!("Resize task for {name} failed, serving original: {e}");
                (raw, ServeMode::RawFallback)
            }
        };
        debug!("Serving {name} ({mode:?}, {} bytes)", bytes.len());

        Ok(Retrieved {
            bytes,
            content_type,
            mode,
        })
    }
}

/// Downscale to `width`. `None` when the image is already narrow enough.
fn shrink(
    data: &[u8],
    width: u32,
    content_type: &ContentType,
) -> Result<Option<Vec<u8>>, imaging::ImagingError> {
    let (intrinsic_width, _) = imaging::dimensions(data)?;
    if intrinsic_width <= width {
        return Ok(None);
    }
    let image = imaging::decode(data)?;
    let resized = imaging::resize_to_width(&image, width);
    imaging::encode_as(&resized, content_type).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn width_bounds() {
        assert_eq!(accepted_width(None), None);
        assert_eq!(accepted_width(Some(0)), None);
        assert_eq!(accepted_width(Some(1)), Some(1));
        assert_eq!(accepted_width(Some(4000)), Some(4000));
        assert_eq!(accepted_width(Some(4001)), None);
        assert_eq!(accepted_width(Some(9000)), None);
    }

    #[test]
    fn store_errors_map_to_not_found() {
        assert!(matches!(
            RetrieveError::from(StoreError::NotFound("a".into())),
            RetrieveError::NotFound(_)
        ));
        assert!(matches!(
            RetrieveError::from(StoreError::InvalidName("../a".into())),
            RetrieveError::NotFound(_)
        ));
        assert!(matches!(
            RetrieveError::from(StoreError::Io(std::io::Error::other("disk"))),
            RetrieveError::Storage(_)
        ));
    }

    #[test]
    fn shrink_skips_narrow_images() {
        use image::{DynamicImage, ImageFormat, RgbImage};
        let mut png = Vec::new();
        DynamicImage::ImageRgb8(RgbImage::new(100, 50))
            .write_to(&mut std::io::Cursor::new(&mut png), ImageFormat::Png)
            .unwrap();

        assert!(shrink(&png, 100, &ContentType::Png).unwrap().is_none());
        let smaller = shrink(&png, 40, &ContentType::Png).unwrap().unwrap();
        assert_eq!(imaging::dimensions(&smaller).unwrap(), (40, 20));
    }
}
